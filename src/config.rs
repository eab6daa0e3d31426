use {
    std::{env, net::SocketAddr, time::Duration},
    thiserror::Error,
};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 3600;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("{provider} is enabled but its webhook secret is not configured")]
    MissingWebhookSecret { provider: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct PaystackSettings {
    pub secret_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct FlutterwaveSettings {
    pub secret_key: String,
    pub webhook_hash: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct MonnifySettings {
    pub api_key: String,
    pub secret_key: String,
    pub contract_code: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct PayazaSettings {
    pub api_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub ticket_token_secret: String,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    pub require_webhook_secrets: bool,
    pub payment_redirect_url: Option<String>,
    pub email: Option<EmailSettings>,
    pub paystack: Option<PaystackSettings>,
    pub flutterwave: Option<FlutterwaveSettings>,
    pub monnify: Option<MonnifySettings>,
    pub payaza: Option<PayazaSettings>,
}

impl Config {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Empty values count as unset.
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store = match var("STORE").as_deref() {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STORE",
                    reason: format!("expected postgres or memory, got {other}"),
                });
            }
        };
        let database_url = var("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let bind_addr = var("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "BIND_ADDR",
                reason: e.to_string(),
            })?;

        let jwt_secret = var("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let ticket_token_secret = var("TICKET_TOKEN_SECRET").unwrap_or_else(|| jwt_secret.clone());

        let poll_interval = Duration::from_secs(parse_u64(
            var("POLL_INTERVAL_SECS"),
            "POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL_SECS,
        )?);
        let http_timeout = Duration::from_secs(parse_u64(
            var("HTTP_TIMEOUT_SECS"),
            "HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?);
        let require_webhook_secrets = parse_bool(var("REQUIRE_WEBHOOK_SECRETS"), "REQUIRE_WEBHOOK_SECRETS")?;

        let email = match (var("EMAIL_API_URL"), var("EMAIL_API_KEY")) {
            (Some(api_url), Some(api_key)) => Some(EmailSettings {
                api_url,
                api_key,
                from: var("EMAIL_FROM").unwrap_or_else(|| "Jaaiye <tickets@jaaiye.com>".to_string()),
            }),
            _ => None,
        };

        let paystack = var("PAYSTACK_SECRET_KEY").map(|secret_key| PaystackSettings {
            secret_key,
            base_url: var("PAYSTACK_BASE_URL").unwrap_or_else(|| "https://api.paystack.co".into()),
        });

        let flutterwave = var("FLUTTERWAVE_SECRET_KEY").map(|secret_key| FlutterwaveSettings {
            secret_key,
            webhook_hash: var("FLUTTERWAVE_WEBHOOK_HASH"),
            base_url: var("FLUTTERWAVE_BASE_URL")
                .unwrap_or_else(|| "https://api.flutterwave.com".into()),
        });

        let monnify = match var("MONNIFY_API_KEY") {
            Some(api_key) => Some(MonnifySettings {
                api_key,
                secret_key: var("MONNIFY_SECRET_KEY").ok_or(ConfigError::Missing("MONNIFY_SECRET_KEY"))?,
                contract_code: var("MONNIFY_CONTRACT_CODE")
                    .ok_or(ConfigError::Missing("MONNIFY_CONTRACT_CODE"))?,
                base_url: var("MONNIFY_BASE_URL")
                    .unwrap_or_else(|| "https://sandbox.monnify.com".into()),
            }),
            None => None,
        };

        let payaza = var("PAYAZA_API_KEY").map(|api_key| PayazaSettings {
            api_key,
            webhook_secret: var("PAYAZA_WEBHOOK_SECRET"),
            base_url: var("PAYAZA_BASE_URL").unwrap_or_else(|| "https://api.payaza.africa".into()),
        });

        let config = Self {
            store,
            database_url,
            bind_addr,
            jwt_secret,
            ticket_token_secret,
            poll_interval,
            http_timeout,
            require_webhook_secrets,
            payment_redirect_url: var("PAYMENT_REDIRECT_URL"),
            email,
            paystack,
            flutterwave,
            monnify,
            payaza,
        };
        config.check_webhook_secrets()?;
        Ok(config)
    }

    /// Paystack and Monnify sign with their API secret, so only Flutterwave
    /// and Payaza can run without a webhook secret.
    fn check_webhook_secrets(&self) -> Result<(), ConfigError> {
        if !self.require_webhook_secrets {
            return Ok(());
        }
        if self.flutterwave.as_ref().is_some_and(|f| f.webhook_hash.is_none()) {
            return Err(ConfigError::MissingWebhookSecret { provider: "flutterwave" });
        }
        if self.payaza.as_ref().is_some_and(|p| p.webhook_secret.is_none()) {
            return Err(ConfigError::MissingWebhookSecret { provider: "payaza" });
        }
        Ok(())
    }
}

fn parse_u64(raw: Option<String>, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
    }
}

fn parse_bool(raw: Option<String>, key: &'static str) -> Result<bool, ConfigError> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("0" | "false" | "no") => Ok(false),
        Some("1" | "true" | "yes") => Ok(true),
        Some(other) => Err(ConfigError::Invalid {
            key,
            reason: format!("expected a boolean, got {other}"),
        }),
    }
}
