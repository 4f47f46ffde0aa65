//! Health endpoints a tier declares through the service registry

use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use tokio::net::TcpStream;

/// One read-only health check
#[async_trait]
pub trait HealthEndpoint: Send + Sync {
    /// Name used in logs and `HealthResult::last_error`
    fn name(&self) -> &str;

    /// Probe once; `Err` carries a human-readable reason
    async fn probe(&self) -> Result<(), String>;
}

/// Healthy when a TCP connection can be established
pub struct TcpEndpoint {
    name: String,
    address: String,
}

impl TcpEndpoint {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

#[async_trait]
impl HealthEndpoint for TcpEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<(), String> {
        TcpStream::connect(&self.address)
            .await
            .map(|_| ())
            .map_err(|e| format!("connect to {} failed: {}", self.address, e))
    }
}

/// Healthy when the database accepts a connection and answers `SELECT 1`
pub struct PostgresEndpoint {
    name: String,
    url: String,
}

impl PostgresEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl HealthEndpoint for PostgresEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<(), String> {
        let mut conn = PgConnection::connect(&self.url)
            .await
            .map_err(|e| format!("connect failed: {}", e))?;

        let result = sqlx::query("SELECT 1")
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| format!("query failed: {}", e));

        let _ = conn.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_endpoint_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let endpoint = TcpEndpoint::new("control-plane-api", address);
        assert!(endpoint.probe().await.is_ok());
        assert_eq!(endpoint.name(), "control-plane-api");
    }

    #[tokio::test]
    async fn test_tcp_endpoint_reports_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let endpoint = TcpEndpoint::new("gone", address.clone());
        let err = endpoint.probe().await.unwrap_err();
        assert!(err.contains(&address));
    }
}
