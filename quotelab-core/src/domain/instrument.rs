use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Normalized instrument code (e.g. `2355`).
///
/// Feed dumps carry codes as fixed-width fields padded with spaces
/// (`"2355  "`). Every code that enters the system goes through
/// [`InstrumentCode::normalize`], so two codes compare equal iff they name
/// the same instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct InstrumentCode(String);

impl InstrumentCode {
    /// Build a code from a raw (possibly padded) field.
    pub fn new(raw: &str) -> Self {
        Self(Self::normalize(raw).to_string())
    }

    /// Strip fixed-width padding without allocating.
    ///
    /// Used by the decoder's universe filter, which must reject records
    /// before doing any other work.
    #[inline]
    pub fn normalize(raw: &str) -> &str {
        raw.trim()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Borrow<str> for InstrumentCode {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for InstrumentCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstrumentCode {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for InstrumentCode {
    fn from(raw: String) -> Self {
        if Self::normalize(&raw).len() == raw.len() {
            Self(raw)
        } else {
            Self::new(&raw)
        }
    }
}

impl From<InstrumentCode> for String {
    fn from(code: InstrumentCode) -> Self {
        code.0
    }
}

impl fmt::Display for InstrumentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn trailing_padding_is_stripped() {
        assert_eq!(InstrumentCode::new("2355  ").as_str(), "2355");
        assert_eq!(InstrumentCode::new(" 8043\t").as_str(), "8043");
    }

    #[test]
    fn padded_and_clean_codes_are_equal() {
        assert_eq!(InstrumentCode::new("2355  "), InstrumentCode::new("2355"));
    }

    #[test]
    fn deserialized_codes_are_normalized() {
        let code: InstrumentCode = serde_json::from_str(r#""2355  ""#).unwrap();
        assert_eq!(code, InstrumentCode::new("2355"));
        assert_eq!(serde_json::to_string(&code).unwrap(), r#""2355""#);
    }

    #[test]
    fn set_lookup_by_str() {
        let set: HashSet<InstrumentCode> = ["2355", "8043"].into_iter().map(InstrumentCode::new).collect();
        assert!(set.contains(InstrumentCode::normalize("2355  ")));
        assert!(!set.contains("1234"));
    }
}
