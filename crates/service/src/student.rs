use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::errors::ServiceError;

/// Validated student identifier; usable as a key segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(ServiceError::invalid("student id must not be empty"));
        }
        if id.contains(':') {
            return Err(ServiceError::invalid("student id must not contain ':'"));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for StudentId {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_colon_ids() {
        assert!(StudentId::parse("  ").is_err());
        assert!(StudentId::parse("a:b").is_err());
        assert_eq!(StudentId::parse(" 42 ").map(|s| s.to_string()).ok().as_deref(), Some("42"));
        assert!("7".parse::<StudentId>().is_ok());
    }
}
