use crate::error::MigrationError;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// The SQL engine family a migration set is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Dialect {
    /// PostgreSQL, the primary engine.
    #[default]
    Postgres,
    /// SQLite, for embedded and local databases.
    Sqlite,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite3",
        }
    }

    /// Whether a connection reporting `backend` speaks this dialect.
    pub fn matches_backend(&self, backend: &str) -> bool {
        let expected = match self {
            Dialect::Postgres => "PostgreSQL",
            Dialect::Sqlite => "SQLite",
        };
        backend.eq_ignore_ascii_case(expected)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pgx" => Ok(Dialect::Postgres),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            _ => Err(MigrationError::UnsupportedDialect(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Dialect {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
