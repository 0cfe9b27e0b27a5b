use crate::dialect::Dialect;
use database::Interrupted;
use sqlx::migrate::MigrateError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Unsupported migration dialect `{0}`.")]
    UnsupportedDialect(String),

    #[error("Migrator is configured for {expected} but the connection speaks {actual}.")]
    DialectMismatch { expected: Dialect, actual: String },

    #[error("Failed to load migrations from {}: {source}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: MigrateError,
    },

    #[error("Database migration failed during {phase}: {source}")]
    Migrate {
        phase: &'static str,
        #[source]
        source: MigrateError,
    },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl MigrationError {
    /// True for errors caused by configuration rather than by the database.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            MigrationError::UnsupportedDialect(_) | MigrationError::DialectMismatch { .. }
        )
    }

    pub(crate) fn migrate(phase: &'static str) -> impl FnOnce(MigrateError) -> Self {
        move |source| MigrationError::Migrate { phase, source }
    }
}
