use {
    super::error::PipelineError,
    rust_decimal::{Decimal, prelude::ToPrimitive},
    serde::{Deserialize, Serialize},
    std::{fmt, str::FromStr},
};

/// Amount in minor units (kobo, pesewas, cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoneyAmount(i64);

impl MoneyAmount {
    pub const ZERO: MoneyAmount = MoneyAmount(0);

    pub fn new(minor: i64) -> Result<Self, PipelineError> {
        if minor < 0 {
            return Err(PipelineError::Validation(format!(
                "MoneyAmount cannot be negative, got: {minor}"
            )));
        }
        Ok(Self(minor))
    }

    /// Parse a major-unit amount (`"5000"`, `"5000.50"`, `5000`) exactly.
    pub fn from_major(raw: &str) -> Result<Self, PipelineError> {
        let major = Decimal::from_str(raw.trim())
            .map_err(|_| PipelineError::Validation(format!("invalid amount: {raw}")))?;
        let minor = (major * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .ok_or_else(|| PipelineError::Validation(format!("amount out of range: {raw}")))?;
        Self::new(minor)
    }

    /// Major-unit amount carried in a provider JSON payload as number or string.
    pub fn from_major_json(value: &serde_json::Value) -> Result<Self, PipelineError> {
        match value {
            serde_json::Value::Number(n) => Self::from_major(&n.to_string()),
            serde_json::Value::String(s) => Self::from_major(s),
            other => Err(PipelineError::Validation(format!(
                "amount must be a number, got: {other}"
            ))),
        }
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    pub fn major(&self) -> Decimal {
        Decimal::new(self.0, 2).normalize()
    }

    /// Major-unit amount as a JSON number, for gateways that bill in naira/dollars.
    pub fn major_json(&self) -> serde_json::Value {
        self.major()
            .to_f64()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_mul(self, factor: u32) -> Option<MoneyAmount> {
        self.0.checked_mul(i64::from(factor)).map(MoneyAmount)
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Currency {
    #[default]
    Ngn,
    Ghs,
    Kes,
    Zar,
    Usd,
    Gbp,
    Eur,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ngn => "NGN",
            Self::Ghs => "GHS",
            Self::Kes => "KES",
            Self::Zar => "ZAR",
            Self::Usd => "USD",
            Self::Gbp => "GBP",
            Self::Eur => "EUR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Currency {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NGN" => Ok(Self::Ngn),
            "GHS" => Ok(Self::Ghs),
            "KES" => Ok(Self::Kes),
            "ZAR" => Ok(Self::Zar),
            "USD" => Ok(Self::Usd),
            "GBP" => Ok(Self::Gbp),
            "EUR" => Ok(Self::Eur),
            other => Err(PipelineError::Validation(format!(
                "unsupported currency: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = PipelineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::try_from(s.as_str())
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: MoneyAmount,
    currency: Currency,
}

impl Money {
    pub fn new(amount: MoneyAmount, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn amount(&self) -> MoneyAmount {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }
}
