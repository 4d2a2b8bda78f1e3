//! Connection wrapper with per-query deadlines.

use std::time::Duration;

use deadpool_postgres::Object;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::row::rows_to_json;
use crate::row::JsonRow;

/// A pooled connection to the document store.
///
/// Every query runs under the connection's deadline; exceeding it yields
/// `StoreError::Timeout`, which the engine taxonomy treats as transient.
pub struct StoreConnection {
    client: Object,
    deadline: Duration,
}

impl StoreConnection {
    pub(crate) fn new(client: Object, deadline: Duration) -> Self {
        Self { client, deadline }
    }

    /// Override the deadline for subsequent queries on this connection.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// The active per-query deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    async fn deadlined<T>(
        &self,
        fut: impl Future<Output = Result<T, tokio_postgres::Error>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout(self.deadline.as_millis() as u64)),
        }
    }

    /// Execute a query and return all rows.
    pub async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> StoreResult<Vec<Row>> {
        debug!(sql = %sql, "executing query");
        self.deadlined(self.client.query(sql, params)).await
    }

    /// Execute a query and return exactly one row.
    pub async fn query_one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> StoreResult<Row> {
        debug!(sql = %sql, "executing query_one");
        self.deadlined(self.client.query_one(sql, params)).await
    }

    /// Execute a query and return zero or one row.
    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> StoreResult<Option<Row>> {
        debug!(sql = %sql, "executing query_opt");
        self.deadlined(self.client.query_opt(sql, params)).await
    }

    /// Execute a query and return rows as ordered JSON maps.
    pub async fn query_json(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> StoreResult<Vec<JsonRow>> {
        let rows = self.query(sql, params).await?;
        rows_to_json(&rows)
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> StoreResult<u64> {
        debug!(sql = %sql, "executing statement");
        self.deadlined(self.client.execute(sql, params)).await
    }

    /// Execute a batch of statements in one round-trip.
    pub async fn batch_execute(&self, sql: &str) -> StoreResult<()> {
        debug!(sql = %sql, "executing batch");
        self.deadlined(self.client.batch_execute(sql)).await
    }

    /// Return the query plan for a statement.
    pub async fn explain(&self, sql: &str, analyze: bool) -> StoreResult<String> {
        let explain_sql = if analyze {
            format!("EXPLAIN ANALYZE {sql}")
        } else {
            format!("EXPLAIN {sql}")
        };

        let rows = self.query(&explain_sql, &[]).await?;
        let lines: Vec<String> = rows
            .iter()
            .map(|row| {
                row.try_get::<_, String>(0)
                    .map_err(|e| StoreError::conversion(format!("explain output: {e}")))
            })
            .collect::<StoreResult<_>>()?;
        Ok(lines.join("\n"))
    }

    /// The underlying tokio-postgres client, for operations this wrapper
    /// does not cover.
    pub fn inner(&self) -> &Object {
        &self.client
    }
}
