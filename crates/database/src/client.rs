use crate::connection::{ClientConfig, connect};
use crate::error::DbError;
use crate::rows::{RowHandle, Rows};
use crate::scope::{Scope, TxGuard, live};
use crate::value::{DisplayArgs, Value, bind};
use futures::TryStreamExt;
use sqlx::any::{AnyQueryResult, AnyRow};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool, Connection, FromRow};

/// Where a statement issued under a given scope runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Pool,
    Transaction,
}

/// A resolved statement target.
pub(crate) enum Target {
    Pool(AnyPool),
    Transaction(TxGuard),
}

/// The transaction-aware database client.
///
/// Every statement method takes a [`Scope`]. When the scope carries a
/// [`TxHandle`](crate::TxHandle) the statement runs inside that transaction,
/// otherwise it runs on a pooled connection. The client never begins, commits
/// or rolls back a transaction itself.
///
/// The client is cheap to clone; clones share one pool.
#[derive(Debug, Clone)]
pub struct Client {
    pool: AnyPool,
}

impl Client {
    /// Validates `config` and opens the pool.
    pub async fn connect(config: &ClientConfig) -> Result<Self, DbError> {
        Ok(Self::new(connect(config).await?))
    }

    /// Wraps an existing pool.
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Reports where statements issued under `scope` will run.
    pub fn route(&self, scope: &Scope) -> Route {
        match scope.transaction() {
            Some(_) => Route::Transaction,
            None => Route::Pool,
        }
    }

    pub(crate) async fn target(&self, scope: &Scope) -> Result<Target, DbError> {
        match scope.transaction() {
            Some(tx) => Ok(Target::Transaction(tx.acquire().await?)),
            None => Ok(Target::Pool(self.pool.clone())),
        }
    }

    /// Borrows a raw connection from the pool, e.g. for schema migrations.
    pub async fn acquire(&self, scope: &Scope) -> Result<PoolConnection<Any>, DbError> {
        scope
            .guard(async {
                self.pool
                    .acquire()
                    .await
                    .map_err(|e| DbError::connection("acquire", e))
            })
            .await
    }

    /// Checks that the database is reachable. Ignores any scoped transaction.
    pub async fn ping(&self, scope: &Scope) -> Result<(), DbError> {
        let mut conn = self.acquire(scope).await?;
        scope
            .guard(async { conn.ping().await.map_err(|e| DbError::connection("ping", e)) })
            .await
    }

    /// Runs a statement that returns no rows.
    pub async fn execute(
        &self,
        scope: &Scope,
        statement: &str,
        args: &[Value],
    ) -> Result<AnyQueryResult, DbError> {
        trace_statement(statement, args);
        scope
            .guard(async {
                let query = bind(sqlx::query(statement), args);
                let result = match self.target(scope).await? {
                    Target::Pool(pool) => query.execute(&pool).await,
                    Target::Transaction(mut tx) => query.execute(live(&mut tx)?).await,
                };
                result.map_err(|e| DbError::statement(statement, e))
            })
            .await
    }

    /// Runs a statement and returns a cursor over its rows.
    ///
    /// The cursor holds its connection (or the scoped transaction) until it is
    /// dropped. Until then, other statements on the same transaction fail
    /// with [`DbError::TransactionBusy`].
    pub async fn query(
        &self,
        scope: &Scope,
        statement: &str,
        args: &[Value],
    ) -> Result<Rows, DbError> {
        trace_statement(statement, args);
        let (target, mark) = match scope.transaction() {
            Some(tx) => {
                let (guard, mark) = scope.guard(tx.acquire_for_cursor()).await?;
                (Target::Transaction(guard), Some(mark))
            }
            None => (Target::Pool(self.pool.clone()), None),
        };
        Rows::open(target, mark, scope, statement, args).await
    }

    /// Prepares a single-row statement. Nothing runs until the returned
    /// handle is fetched or scanned.
    pub fn query_row<'a>(
        &'a self,
        scope: &'a Scope,
        statement: &'a str,
        args: &'a [Value],
    ) -> RowHandle<'a> {
        trace_statement(statement, args);
        RowHandle {
            client: self,
            scope,
            statement,
            args,
        }
    }

    /// Runs a statement and decodes every row. No rows yields an empty vector.
    pub async fn scan_query<T>(
        &self,
        scope: &Scope,
        statement: &str,
        args: &[Value],
    ) -> Result<Vec<T>, DbError>
    where
        T: for<'r> FromRow<'r, AnyRow>,
    {
        trace_statement(statement, args);
        scope
            .guard(async {
                let query = bind(sqlx::query(statement), args);
                let rows = match self.target(scope).await? {
                    Target::Pool(pool) => query.fetch_all(&pool).await,
                    Target::Transaction(mut tx) => query.fetch_all(live(&mut tx)?).await,
                };
                rows.map_err(|e| DbError::statement(statement, e))?
                    .iter()
                    .map(|row| T::from_row(row))
                    .collect::<Result<Vec<T>, _>>()
                    .map_err(|e| DbError::statement(statement, e))
            })
            .await
    }

    /// Runs a statement that must return exactly one row and decodes it.
    ///
    /// Unlike every other statement method this always runs on the pool, even
    /// when `scope` carries a transaction, so it never observes uncommitted
    /// writes of that transaction. Callers that need read-your-writes inside a
    /// transaction should use [`query_row`](Self::query_row) instead.
    pub async fn scan_query_row<T>(
        &self,
        scope: &Scope,
        statement: &str,
        args: &[Value],
    ) -> Result<T, DbError>
    where
        T: for<'r> FromRow<'r, AnyRow>,
    {
        trace_statement(statement, args);
        scope
            .guard(async {
                let mut rows = bind(sqlx::query(statement), args).fetch(&self.pool);
                let first = rows
                    .try_next()
                    .await
                    .map_err(|e| DbError::statement(statement, e))?
                    .ok_or_else(|| DbError::NotFound {
                        statement: statement.to_owned(),
                    })?;
                let extra = rows
                    .try_next()
                    .await
                    .map_err(|e| DbError::statement(statement, e))?;
                if extra.is_some() {
                    return Err(DbError::UnexpectedRows {
                        statement: statement.to_owned(),
                    });
                }
                T::from_row(&first).map_err(|e| DbError::statement(statement, e))
            })
            .await
    }

    /// Closes the pool, waiting for checked-out connections to be returned.
    ///
    /// Call once, after in-flight work has finished. Clones of this client
    /// fail with a connection error afterwards.
    pub async fn close(self, scope: &Scope) -> Result<(), DbError> {
        scope
            .guard(async {
                self.pool.close().await;
                Ok::<_, DbError>(())
            })
            .await?;
        tracing::info!("Database pool closed.");
        Ok(())
    }
}

fn trace_statement(statement: &str, args: &[Value]) {
    tracing::debug!(
        target: "database::statement",
        statement,
        args = %DisplayArgs(args),
        "executing statement"
    );
}
