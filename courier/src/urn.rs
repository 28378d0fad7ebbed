//! Uniform Resource Names for contact addresses.
//!
//! A URN identifies a contact on a particular scheme (phone number, Facebook
//! PSID, Facebook ref, ...). Courier normalizes every inbound/outbound
//! address into one of these before it reaches a handler's business logic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The scheme portion of a URN, e.g. `tel` in `tel:+2348012345678`.
///
/// Closed for the schemes Courier understands natively; `Ext` carries
/// anything else a handler wants to mint without a core code change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    Tel,
    FacebookPsid,
    FacebookRef,
    Ext(String),
}

impl Scheme {
    pub fn as_str(&self) -> &str {
        match self {
            Scheme::Tel => "tel",
            Scheme::FacebookPsid => "facebook",
            Scheme::FacebookRef => "fb-ref",
            Scheme::Ext(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for Scheme {
    fn from(s: &str) -> Self {
        match s {
            "tel" => Scheme::Tel,
            "facebook" => Scheme::FacebookPsid,
            "fb-ref" => Scheme::FacebookRef,
            other => Scheme::Ext(other.to_string()),
        }
    }
}

/// A normalized contact address: `scheme:path`, with an optional display
/// name carried alongside (not part of identity or equality).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Urn {
    pub scheme: Scheme,
    pub path: String,
    pub display: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum UrnError {
    #[error("empty urn")]
    Empty,
    #[error("urn missing scheme separator: {0}")]
    MissingSeparator(String),
    #[error("not a possible number")]
    InvalidPhone(String),
}

impl Urn {
    pub fn new(scheme: Scheme, path: impl Into<String>) -> Self {
        Self {
            scheme,
            path: path.into(),
            display: None,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// Builds a `tel:` URN, validating the path is a plausible E.164 number.
    pub fn tel(number: &str) -> Result<Self, UrnError> {
        let parsed = phonenumber::parse(None, number)
            .map_err(|_| UrnError::InvalidPhone(number.to_string()))?;
        if !phonenumber::is_valid(&parsed) {
            return Err(UrnError::InvalidPhone(number.to_string()));
        }
        let e164 = parsed.format().mode(phonenumber::Mode::E164).to_string();
        Ok(Self::new(Scheme::Tel, e164))
    }

    /// Identity used for dedup/lookup: `scheme:path`, ignoring display.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.scheme, self.path)
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.path)
    }
}

impl FromStr for Urn {
    type Err = UrnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(UrnError::Empty);
        }
        let (scheme, path) = s
            .split_once(':')
            .ok_or_else(|| UrnError::MissingSeparator(s.to_string()))?;
        Ok(Self::new(Scheme::from(scheme), path))
    }
}

impl PartialEq for Urn {
    fn eq(&self, other: &Self) -> bool {
        self.scheme == other.scheme && self.path == other.path
    }
}
impl Eq for Urn {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_and_path() {
        let urn: Urn = "tel:+2348012345678".parse().unwrap();
        assert_eq!(urn.scheme, Scheme::Tel);
        assert_eq!(urn.path, "+2348012345678");
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(matches!("notaurn".parse::<Urn>(), Err(UrnError::MissingSeparator(_))));
    }

    #[test]
    fn tel_rejects_garbage() {
        assert!(Urn::tel("not a phone number").is_err());
    }

    #[test]
    fn tel_accepts_valid_number() {
        let urn = Urn::tel("+234 801 234 5678").unwrap();
        assert_eq!(urn.scheme, Scheme::Tel);
        assert!(urn.path.starts_with('+'));
    }

    #[test]
    fn display_is_ignored_by_equality() {
        let a = Urn::new(Scheme::Tel, "+1555").with_display("Alice");
        let b = Urn::new(Scheme::Tel, "+1555").with_display("Bob");
        assert_eq!(a, b);
    }
}
