pub mod api_errors;
pub mod auth;
pub mod flutterwave;
pub mod monnify;
pub mod payaza;
pub mod payments_api;
pub mod paystack;
pub mod signature;
pub mod tickets_api;
pub mod webhook;

use crate::domain::error::PipelineError;

/// `base` with `segments` appended, each percent-encoded as a single path
/// segment so caller-supplied values cannot reshape the path.
pub(crate) fn gateway_url(base: &str, segments: &[&str]) -> Result<reqwest::Url, PipelineError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| PipelineError::Provider(format!("invalid gateway url {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| PipelineError::Provider(format!("gateway url {base} cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
