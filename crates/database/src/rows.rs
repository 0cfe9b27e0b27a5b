//! Row cursors and lazily evaluated single-row handles.

use crate::client::{Client, Target};
use crate::error::DbError;
use crate::scope::{CursorMark, Scope, live};
use crate::value::{Value, bind};
use futures::StreamExt;
use futures::stream::BoxStream;
use sqlx::any::AnyRow;
use sqlx::FromRow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Rows buffered ahead of the caller before the producer waits.
const ROW_BUFFER: usize = 32;

type RowResult = Result<AnyRow, DbError>;

/// A forward-only cursor over the rows of one statement.
///
/// A scoped transaction stays reserved until the cursor is
/// [`closed`](Rows::close) or dropped; a pooled connection is also returned
/// once the rows are exhausted. Dropping is always enough: there is no exit
/// path that leaks the connection.
pub struct Rows {
    statement: String,
    scope: Scope,
    first: Option<AnyRow>,
    receiver: mpsc::Receiver<RowResult>,
    producer: JoinHandle<()>,
    // Dropped after `producer` is aborted.
    _reservation: Option<CursorMark>,
}

impl Rows {
    /// Starts streaming `statement` from `target` and waits for the first row,
    /// so a rejected statement is reported here rather than mid-iteration.
    pub(crate) async fn open(
        target: Target,
        reservation: Option<CursorMark>,
        scope: &Scope,
        statement: &str,
        args: &[Value],
    ) -> Result<Self, DbError> {
        let (sender, receiver) = mpsc::channel(ROW_BUFFER);
        let producer = tokio::spawn(produce(
            target,
            statement.to_owned(),
            args.to_vec(),
            sender,
        ));

        let mut rows = Rows {
            statement: statement.to_owned(),
            scope: scope.clone(),
            first: None,
            receiver,
            producer,
            _reservation: reservation,
        };
        rows.first = rows.next().await.transpose()?;
        Ok(rows)
    }

    /// Fetches the next row, or `None` once the result set is exhausted.
    pub async fn next(&mut self) -> Option<Result<AnyRow, DbError>> {
        if let Some(row) = self.first.take() {
            return Some(Ok(row));
        }
        let Rows { scope, receiver, .. } = self;
        scope
            .guard(async { Ok::<_, DbError>(receiver.recv().await) })
            .await
            .unwrap_or_else(|e| Some(Err(e)))
    }

    /// Decodes the next row into `T`.
    pub async fn scan<T>(&mut self) -> Option<Result<T, DbError>>
    where
        T: for<'r> FromRow<'r, AnyRow>,
    {
        let row = match self.next().await? {
            Ok(row) => row,
            Err(e) => return Some(Err(e)),
        };
        Some(T::from_row(&row).map_err(|e| DbError::statement(&self.statement, e)))
    }

    /// Releases the connection or transaction held by the cursor.
    pub fn close(self) {}
}

impl Drop for Rows {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

async fn produce(
    target: Target,
    statement: String,
    args: Vec<Value>,
    sender: mpsc::Sender<RowResult>,
) {
    let query = bind(sqlx::query(&statement), &args);
    match target {
        Target::Pool(pool) => forward(query.fetch(&pool), &statement, &sender).await,
        Target::Transaction(mut tx) => match live(&mut tx) {
            Ok(conn) => forward(query.fetch(conn), &statement, &sender).await,
            Err(e) => {
                let _ = sender.send(Err(e)).await;
            }
        },
    }
}

async fn forward(
    mut rows: BoxStream<'_, Result<AnyRow, sqlx::Error>>,
    statement: &str,
    sender: &mpsc::Sender<RowResult>,
) {
    while let Some(item) = rows.next().await {
        let item = item.map_err(|e| DbError::statement(statement, e));
        let failed = item.is_err();
        // A send error means the cursor was dropped.
        if sender.send(item).await.is_err() || failed {
            break;
        }
    }
}

/// The deferred result of [`Client::query_row`].
///
/// Nothing runs until the handle is consumed; routing, execution errors and
/// the "no rows" condition all surface from [`fetch`](RowHandle::fetch) or
/// [`scan`](RowHandle::scan).
#[must_use = "a row handle does nothing until it is fetched or scanned"]
pub struct RowHandle<'a> {
    pub(crate) client: &'a Client,
    pub(crate) scope: &'a Scope,
    pub(crate) statement: &'a str,
    pub(crate) args: &'a [Value],
}

impl RowHandle<'_> {
    /// Returns the first row; extra rows are ignored.
    pub async fn fetch(self) -> Result<AnyRow, DbError> {
        let RowHandle {
            client,
            scope,
            statement,
            args,
        } = self;
        scope
            .guard(async {
                let query = bind(sqlx::query(statement), args);
                let row = match client.target(scope).await? {
                    Target::Pool(pool) => query.fetch_optional(&pool).await,
                    Target::Transaction(mut tx) => query.fetch_optional(live(&mut tx)?).await,
                };
                row.map_err(|e| DbError::statement(statement, e))?
                    .ok_or_else(|| DbError::NotFound {
                        statement: statement.to_owned(),
                    })
            })
            .await
    }

    pub async fn scan<T>(self) -> Result<T, DbError>
    where
        T: for<'r> FromRow<'r, AnyRow>,
    {
        let statement = self.statement;
        let row = self.fetch().await?;
        T::from_row(&row).map_err(|e| DbError::statement(statement, e))
    }
}
