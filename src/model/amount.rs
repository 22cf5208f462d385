//! Amount type for handling monetary cell values leniently.
//!
//! Export formats vary, so an `Amount` always keeps the original text of the cell and, when the
//! text (minus a dollar sign and thousands separators) parses cleanly, the numeric value too.
//! The original text is what deduplication keys and round-tripping rely on.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A monetary cell value.
///
/// Equality and hashing are defined over the original text, because the original text is what
/// identifies a transaction in a deduplication key.
///
/// # Examples
///
/// ```
/// # use ledger_sync::model::Amount;
/// let amount = Amount::parse("-$1,250.00");
/// assert_eq!(amount.raw(), "-$1,250.00");
/// assert_eq!(amount.value().unwrap().to_string(), "-1250.00");
/// ```
///
/// A value that does not parse keeps its text and reports no numeric value:
/// ```
/// # use ledger_sync::model::Amount;
/// let amount = Amount::parse("N/A");
/// assert_eq!(amount.raw(), "N/A");
/// assert!(amount.value().is_none());
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Amount {
    /// The cell text exactly as it appeared in the source.
    raw: String,
    /// The parsed numerical value, when the text parsed cleanly.
    value: Option<Decimal>,
}

impl Amount {
    /// Parses a monetary string, tolerating a leading dollar sign (optionally after a minus
    /// sign) and comma thousands separators. Parsing never fails: an unparseable value keeps
    /// its text and carries no numeric value.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Self { raw, value: None };
        }

        // Strip the dollar sign, which may follow a minus sign: "-$50.00" or "$50.00".
        let without_dollar = if let Some(after_minus) = trimmed.strip_prefix('-') {
            if let Some(after_dollar) = after_minus.strip_prefix('$') {
                format!("-{after_dollar}")
            } else {
                trimmed.to_string()
            }
        } else if let Some(after_dollar) = trimmed.strip_prefix('$') {
            after_dollar.to_string()
        } else {
            trimmed.to_string()
        };

        // Strip comma thousands separators.
        let without_commas = without_dollar.replace(',', "");

        let value = Decimal::from_str(&without_commas).ok();
        Self { raw, value }
    }

    /// The original text of the cell.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The parsed numeric value, if the text parsed cleanly.
    pub fn value(&self) -> Option<Decimal> {
        self.value
    }

    /// True when the text parsed cleanly as a number.
    pub fn is_parsed(&self) -> bool {
        self.value.is_some()
    }

    /// True when the cell text is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.raw.trim().is_empty()
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.raw, f)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Amount::parse(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_dollar_sign() {
        let amount = Amount::parse("$50.00");
        assert_eq!(amount.value(), Some(Decimal::from_str("50.00").unwrap()));
        assert_eq!(amount.raw(), "$50.00");
    }

    #[test]
    fn test_parse_without_dollar_sign() {
        let amount = Amount::parse("50.00");
        assert_eq!(amount.value(), Some(Decimal::from_str("50.00").unwrap()));
    }

    #[test]
    fn test_parse_negative_with_dollar_sign() {
        let amount = Amount::parse("-$50.00");
        assert_eq!(amount.value(), Some(Decimal::from_str("-50.00").unwrap()));
    }

    #[test]
    fn test_parse_with_commas() {
        let amount = Amount::parse("$1,234,567.89");
        assert_eq!(
            amount.value(),
            Some(Decimal::from_str("1234567.89").unwrap())
        );
    }

    #[test]
    fn test_parse_empty_string() {
        let amount = Amount::parse("");
        assert!(amount.value().is_none());
        assert!(amount.is_blank());
    }

    #[test]
    fn test_parse_garbage_keeps_raw() {
        let amount = Amount::parse("twelve dollars");
        assert!(amount.value().is_none());
        assert!(!amount.is_blank());
        assert_eq!(amount.raw(), "twelve dollars");
    }

    #[test]
    fn test_display_is_raw() {
        let amount = Amount::parse("-$1,000.00");
        assert_eq!(amount.to_string(), "-$1,000.00");
    }

    #[test]
    fn test_equality_is_textual() {
        let a = Amount::parse("50.00");
        let b = Amount::parse("$50.00");
        assert_ne!(a, b);
        assert_eq!(a.value(), b.value());
    }

    #[test]
    fn test_serde_round_trip() {
        let amount = Amount::parse("-$60,000.00");
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"-$60,000.00\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(amount, back);
    }
}
