use thiserror::Error;

/// Why a scoped operation stopped before completing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    #[error("the operation was cancelled")]
    Cancelled,

    #[error("the operation deadline was exceeded")]
    DeadlineExceeded,
}

/// Coarse classification of a [`DbError`], for callers that branch on
/// "absent" versus "broken" versus "retry later".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed connection string or pool settings. Never retried.
    Config,
    /// Pool exhaustion, network failure, closed pool, finished transaction.
    Connection,
    /// The engine rejected the statement or its rows could not be decoded.
    Query,
    /// A single-row fetch returned no rows.
    NotFound,
    /// The API was used in a way it forbids (e.g. nesting transactions, or
    /// using a transaction while one of its cursors is open).
    Usage,
    /// The scope was cancelled or its deadline passed.
    Cancelled,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid database configuration: {0}")]
    Config(String),

    #[error("Database connection failed during {context}: {source}")]
    Connection {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Query `{statement}` failed: {source}")]
    Query {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Query `{statement}` returned no rows.")]
    NotFound { statement: String },

    #[error("Query `{statement}` returned more than one row.")]
    UnexpectedRows { statement: String },

    #[error("The scope already carries a transaction; nested attachment is forbidden.")]
    TransactionAttached,

    #[error("The transaction is held by an open row cursor; drop the cursor first.")]
    TransactionBusy,

    #[error("The transaction has already been committed or rolled back.")]
    TransactionFinished,

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Config(_) => ErrorKind::Config,
            DbError::Connection { .. } | DbError::TransactionFinished => ErrorKind::Connection,
            DbError::Query { .. } | DbError::UnexpectedRows { .. } => ErrorKind::Query,
            DbError::NotFound { .. } => ErrorKind::NotFound,
            DbError::TransactionAttached | DbError::TransactionBusy => ErrorKind::Usage,
            DbError::Interrupted(_) => ErrorKind::Cancelled,
        }
    }

    /// Wraps an engine error raised while running `statement`.
    pub(crate) fn statement(statement: &str, source: sqlx::Error) -> Self {
        match source {
            sqlx::Error::RowNotFound => DbError::NotFound {
                statement: statement.to_owned(),
            },
            sqlx::Error::Configuration(e) => DbError::Config(e.to_string()),
            source if is_connection_failure(&source) => DbError::Connection {
                context: format!("`{statement}`"),
                source,
            },
            source => DbError::Query {
                statement: statement.to_owned(),
                source,
            },
        }
    }

    /// Wraps an engine error raised outside any statement (ping, commit, ...).
    pub(crate) fn connection(context: &str, source: sqlx::Error) -> Self {
        match source {
            sqlx::Error::Configuration(e) => DbError::Config(e.to_string()),
            source => DbError::Connection {
                context: context.to_owned(),
                source,
            },
        }
    }
}

fn is_connection_failure(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_are_classified() {
        let not_found = DbError::statement("SELECT 1", sqlx::Error::RowNotFound);
        assert_eq!(not_found.kind(), ErrorKind::NotFound);

        let closed = DbError::statement("SELECT 1", sqlx::Error::PoolClosed);
        assert_eq!(closed.kind(), ErrorKind::Connection);
        assert!(closed.to_string().contains("SELECT 1"));

        let decode = DbError::statement("SELECT 1", sqlx::Error::ColumnNotFound("id".into()));
        assert_eq!(decode.kind(), ErrorKind::Query);

        let cancelled: DbError = Interrupted::DeadlineExceeded.into();
        assert_eq!(cancelled.kind(), ErrorKind::Cancelled);
    }
}
