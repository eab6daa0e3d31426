use {
    axum::http::HeaderMap,
    hmac::{Hmac, Mac},
    sha2::Sha512,
    subtle::ConstantTimeEq,
};

type HmacSha512 = Hmac<Sha512>;

pub fn hmac_sha512_hex(secret: &[u8], body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha512::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Compare a hex HMAC-SHA512 signature against the body in constant time.
pub fn verify_hmac_sha512(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

pub fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Shared check for providers that sign the raw body with HMAC-SHA512.
/// A missing secret skips validation.
pub fn check_hmac_header(
    provider: &str,
    secret: Option<&str>,
    headers: &HeaderMap,
    header_name: &str,
    body: &[u8],
) -> bool {
    let Some(secret) = secret else {
        tracing::warn!(provider, "webhook secret not configured, skipping signature check");
        return true;
    };
    match header(headers, header_name) {
        Some(signature) => verify_hmac_sha512(secret.as_bytes(), body, signature),
        None => {
            tracing::warn!(provider, header = header_name, "missing signature header");
            false
        }
    }
}
