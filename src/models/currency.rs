use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ISO 4217 currency codes a wallet may be denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "currency_code", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    EGP,
    USD,
    EUR,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::EGP, Currency::USD, Currency::EUR];

    /// Returns the ISO 4217 numeric code for the currency.
    pub fn numeric_code(&self) -> u16 {
        match self {
            Currency::EGP => 818,
            Currency::USD => 840,
            Currency::EUR => 978,
        }
    }

    /// Returns the number of decimal places for the currency.
    pub fn decimal_places(&self) -> u32 {
        2
    }

    pub fn name(&self) -> &'static str {
        match self {
            Currency::EGP => "Egyptian Pound",
            Currency::USD => "US Dollar",
            Currency::EUR => "Euro",
        }
    }

    /// Returns true if `amount` carries no more precision than the currency allows.
    pub fn accepts_scale(&self, amount: Decimal) -> bool {
        amount.normalize().scale() <= self.decimal_places()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for Currency {
    type Err = CurrencyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "EGP" => Ok(Currency::EGP),
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            _ => Err(CurrencyParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CurrencyParseError(String);

impl fmt::Display for CurrencyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Currency must be one of EGP, USD, EUR (got '{}')", self.0)
    }
}

impl std::error::Error for CurrencyParseError {}
