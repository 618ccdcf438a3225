use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_SYMBOL_LEN: usize = 15;

/// Normalized ticker symbol; the partition key for every model and series.
///
/// Index tickers such as `^GSPC` and currency pairs such as `EURUSD=X` are
/// accepted alongside plain equity tickers. Case is folded, so `nvda` and
/// `NVDA` name the same model.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_uppercase();

        let mut chars = normalized.chars().enumerate();
        match chars.next() {
            None => return Err(ValidationError::EmptySymbol),
            Some((_, ch)) if !(ch.is_ascii_alphabetic() || ch == '^') => {
                return Err(ValidationError::SymbolInvalidStart { ch });
            }
            Some(_) => {}
        }
        if let Some((index, ch)) =
            chars.find(|(_, ch)| !(ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '=')))
        {
            return Err(ValidationError::SymbolInvalidChar { ch, index });
        }

        // All ASCII past this point, so bytes are chars.
        if normalized.len() > MAX_SYMBOL_LEN {
            return Err(ValidationError::SymbolTooLong {
                len: normalized.len(),
                max: MAX_SYMBOL_LEN,
            });
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_case_and_whitespace() {
        let parsed = Symbol::parse(" acme ").expect("symbol");
        assert_eq!(parsed.as_str(), "ACME");
        assert_eq!(parsed, "ACME".parse::<Symbol>().expect("symbol"));
    }

    #[test]
    fn accepts_index_and_fx_tickers() {
        for raw in ["^GSPC", "EURUSD=X", "BRK.B", "BF-B"] {
            assert!(Symbol::parse(raw).is_ok(), "{raw}");
        }
    }

    #[test]
    fn rejects_malformed_tickers() {
        assert!(matches!(Symbol::parse("   "), Err(ValidationError::EmptySymbol)));
        assert!(matches!(
            Symbol::parse("1ACME"),
            Err(ValidationError::SymbolInvalidStart { ch: '1' })
        ));
        assert!(matches!(
            Symbol::parse("ACME$"),
            Err(ValidationError::SymbolInvalidChar { index: 4, .. })
        ));
        assert!(matches!(
            Symbol::parse("ABCDEFGHIJKLMNOP"),
            Err(ValidationError::SymbolTooLong { len: 16, .. })
        ));
    }

    #[test]
    fn deserializing_validates() {
        let symbol: Symbol = serde_json::from_str("\"msft\"").expect("valid");
        assert_eq!(symbol.as_str(), "MSFT");
        assert!(serde_json::from_str::<Symbol>("\"M$FT\"").is_err());
    }
}
