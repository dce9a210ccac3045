//! Database liveness/activity checks.

use std::time::Duration;

use async_trait::async_trait;
use tokio_postgres::NoTls;
use tracing::debug;

/// Session query: any client backend other than the check itself.
const ACTIVITY_QUERY: &str = "SELECT pid \
     FROM pg_stat_activity \
     WHERE backend_type = 'client backend' AND pid <> pg_backend_pid() \
     LIMIT 1";

/// Result of a single activity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    /// Reachable, with at least one active client session.
    Active,
    /// Reachable, no client sessions.
    Idle,
    /// The database could not be reached or queried.
    Unreachable,
}

/// Reports whether a database is reachable and whether it has sessions.
#[async_trait]
pub trait ActivityCheck: Send + Sync {
    /// Check `target` (a host name) once.
    async fn check(&self, target: &str) -> CheckResult;

    /// Whether `target` accepts connections at all.
    async fn is_available(&self, target: &str) -> bool {
        self.check(target).await != CheckResult::Unreachable
    }
}

/// Checks a PostgreSQL server through `pg_stat_activity`.
#[derive(Debug, Clone)]
pub struct PostgresCheck {
    port: u16,
    user: String,
    dbname: String,
    password: Option<String>,
    timeout: Duration,
}

impl Default for PostgresCheck {
    fn default() -> Self {
        Self {
            port: 5432,
            user: "postgres".to_string(),
            dbname: "postgres".to_string(),
            password: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl PostgresCheck {
    pub fn new(port: u16, user: impl Into<String>, dbname: impl Into<String>) -> Self {
        Self {
            port,
            user: user.into(),
            dbname: dbname.into(),
            ..Self::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Bound on connect + query time for one check.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn query_activity(&self, host: &str) -> Result<bool, tokio_postgres::Error> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(host)
            .port(self.port)
            .user(&self.user)
            .dbname(&self.dbname)
            .connect_timeout(self.timeout);
        if let Some(password) = &self.password {
            config.password(password);
        }

        let (client, connection) = config.connect(NoTls).await?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "check connection closed with error");
            }
        });

        let row = client.query_opt(ACTIVITY_QUERY, &[]).await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl ActivityCheck for PostgresCheck {
    async fn check(&self, target: &str) -> CheckResult {
        match tokio::time::timeout(self.timeout, self.query_activity(target)).await {
            Ok(Ok(true)) => CheckResult::Active,
            Ok(Ok(false)) => CheckResult::Idle,
            Ok(Err(e)) => {
                debug!(error = %e, %target, "activity check failed");
                CheckResult::Unreachable
            }
            Err(_) => {
                debug!(%target, "activity check timed out");
                CheckResult::Unreachable
            }
        }
    }
}
