use crate::error::CheckError;
use crate::health::check::{HealthCheck, HealthCheckProperties, StatusCell};
use crate::health::status::CheckStatus;
use futures::future::BoxFuture;
use sqlx::{Connection, Executor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_SQL: &str = "SELECT 1";

pub type ConnectionFuture<C> = BoxFuture<'static, Result<C, sqlx::Error>>;

pub type ConnectionFactory<C> = Arc<dyn Fn() -> ConnectionFuture<C> + Send + Sync>;

/// Opens a fresh connection on every update, runs the configured statement
/// and closes the connection again. An empty statement only opens and closes.
pub struct SqlHealthCheck<C> {
    properties: HealthCheckProperties,
    connect: ConnectionFactory<C>,
    sql: String,
    status: StatusCell,
}

impl<C> SqlHealthCheck<C>
where
    C: Connection + 'static,
{
    pub fn new(properties: HealthCheckProperties, connect: ConnectionFactory<C>) -> Self {
        Self {
            properties,
            connect,
            sql: DEFAULT_SQL.to_string(),
            status: StatusCell::default(),
        }
    }

    /// Connects with `C::connect(url)` on every update.
    pub fn from_url(properties: HealthCheckProperties, url: impl Into<String>) -> Self {
        let url = url.into();
        let connect: ConnectionFactory<C> =
            Arc::new(move || -> ConnectionFuture<C> { C::connect(&url) });
        Self::new(properties, connect)
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = sql.into();
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl<C> SqlHealthCheck<C>
where
    C: Connection + 'static,
    for<'c> &'c mut C: Executor<'c, Database = C::Database>,
{
    async fn execute(&self) -> Result<(), CheckError> {
        debug!(name = self.properties.name(), "Accessing the database");

        let mut connection = (self.connect)().await?;

        let outcome = if self.sql.trim().is_empty() {
            Ok(())
        } else {
            connection.execute(self.sql.as_str()).await.map(|_| ())
        };

        // Close on both paths; the statement error wins over a close error.
        let closed = connection.close().await;
        outcome?;
        closed?;

        debug!(name = self.properties.name(), "Connected and query executed in the database");
        Ok(())
    }
}

#[async_trait::async_trait]
impl<C> HealthCheck for SqlHealthCheck<C>
where
    C: Connection + 'static,
    for<'c> &'c mut C: Executor<'c, Database = C::Database>,
{
    fn name(&self) -> &str {
        self.properties.name()
    }

    fn required(&self) -> bool {
        self.properties.is_required()
    }

    fn tags(&self) -> &[String] {
        self.properties.tags()
    }

    fn status(&self) -> CheckStatus {
        self.status.get()
    }

    async fn update_status(&self, cancel: &CancellationToken) -> Result<CheckStatus, CheckError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CheckError::Cancelled),
            outcome = self.execute() => {
                outcome?;
                Ok(self.status.set(CheckStatus::Green))
            }
        }
    }
}
