use crate::error::GuardError;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Statement kind derived from the leading keyword.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    Create,
    Alter,
    Drop,
    Other(String),
}

impl StatementKind {
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.to_ascii_uppercase().as_str() {
            "SELECT" => StatementKind::Select,
            "INSERT" => StatementKind::Insert,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            "MERGE" => StatementKind::Merge,
            "CREATE" => StatementKind::Create,
            "ALTER" => StatementKind::Alter,
            "DROP" => StatementKind::Drop,
            other => StatementKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StatementKind::Select => "SELECT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Merge => "MERGE",
            StatementKind::Create => "CREATE",
            StatementKind::Alter => "ALTER",
            StatementKind::Drop => "DROP",
            StatementKind::Other(keyword) => keyword,
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StatementKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Parses configured statement types; unknown keywords are rejected.
impl FromStr for StatementKind {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match StatementKind::from_keyword(s.trim()) {
            StatementKind::Other(_) => Err(GuardError::Config(format!(
                "Unsupported statement type: {}",
                s.trim().to_ascii_uppercase()
            ))),
            kind => Ok(kind),
        }
    }
}

/// Declared intent of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Query,
    Aggregate,
    DerivedView,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Query => "query",
            Intent::Aggregate => "aggregate",
            Intent::DerivedView => "derived_view",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_keyword_is_case_insensitive() {
        assert_eq!(StatementKind::from_keyword("select"), StatementKind::Select);
        assert_eq!(StatementKind::from_keyword("Merge"), StatementKind::Merge);
        assert_eq!(
            StatementKind::from_keyword("grant"),
            StatementKind::Other("GRANT".to_string())
        );
    }

    #[test]
    fn test_config_parsing_rejects_unknown() {
        assert_eq!("select".parse::<StatementKind>().unwrap(), StatementKind::Select);
        assert!("WITH".parse::<StatementKind>().is_err());
        assert!("GRANT".parse::<StatementKind>().is_err());
    }
}
