use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The HTTP status code sent with a redirection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct StatusCode(u16);

impl StatusCode {
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const SEE_OTHER: StatusCode = StatusCode(303);
    pub const TEMPORARY_REDIRECT: StatusCode = StatusCode(307);
    pub const PERMANENT_REDIRECT: StatusCode = StatusCode(308);
    pub const GONE: StatusCode = StatusCode(410);
    pub const UNAVAILABLE_FOR_LEGAL_REASONS: StatusCode = StatusCode(451);

    const SUPPORTED: [StatusCode; 7] = [
        Self::MOVED_PERMANENTLY,
        Self::FOUND,
        Self::SEE_OTHER,
        Self::TEMPORARY_REDIRECT,
        Self::PERMANENT_REDIRECT,
        Self::GONE,
        Self::UNAVAILABLE_FOR_LEGAL_REASONS,
    ];

    pub fn new(code: u16) -> Result<Self, CoreError> {
        let status = Self(code);
        if Self::SUPPORTED.contains(&status) {
            Ok(status)
        } else {
            Err(CoreError::InvalidStatusCode(format!(
                "{} is not a redirect or gone status",
                code
            )))
        }
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    /// Whether the status signals a removed resource, which carries no target.
    pub fn is_gone(self) -> bool {
        matches!(self.0, 410 | 451)
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        Self::MOVED_PERMANENTLY
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = CoreError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StatusCode> for u16 {
    fn from(value: StatusCode) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_redirect_and_gone_codes() {
        for code in [301, 302, 303, 307, 308, 410, 451] {
            assert_eq!(StatusCode::new(code).unwrap().as_u16(), code);
        }
    }

    #[test]
    fn rejects_other_codes() {
        for code in [200, 304, 404, 500] {
            assert!(StatusCode::new(code).is_err());
        }
    }

    #[test]
    fn gone_codes() {
        assert!(StatusCode::GONE.is_gone());
        assert!(StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS.is_gone());
        assert!(!StatusCode::default().is_gone());
    }
}
