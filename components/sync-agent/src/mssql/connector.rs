// Local crates
use crate::engine::ports::{Connector, SourceSession, SyncError};
use crate::helpers::connections::ConnectionConfig;
use crate::mssql::session::MssqlSession;
use crate::sql::identifiers::{quote_ident, quote_literal};

// External crates
use async_trait::async_trait;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;
use tracing::instrument;

/// Opens `tiberius` sessions with SQL logins, trusting the server
/// certificate.
#[derive(Debug, Clone)]
pub struct MssqlConnector {
    connect_timeout: Duration,
}

impl MssqlConnector {
    /// Connector whose TCP connect and login must finish within
    /// `connect_timeout`.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    #[instrument(
        name = "agent_mssql_connect",
        target = "mssql::connector",
        level = "debug",
        skip_all,
        fields(server = %connection.server, port = connection.port, database = %database)
    )]
    async fn connect(&self, connection: &ConnectionConfig, database: &str) -> Result<MssqlSession, SyncError> {
        let endpoint = format!("{}:{}/{database}", connection.server, connection.port);

        let mut config = Config::new();
        config.host(&connection.server);
        config.port(connection.port);
        config.database(database);
        config.authentication(AuthMethod::sql_server(&connection.username, connection.password()));
        config.trust_cert();

        let connect_error = |message: String| SyncError::Connect {
            endpoint: endpoint.clone(),
            message,
        };

        let attempt = async {
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| connect_error(e.to_string()))?;
            tcp.set_nodelay(true)?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| connect_error(e.to_string()))
        };

        let client = tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| SyncError::Timeout {
                endpoint: endpoint.clone(),
                secs: self.connect_timeout.as_secs(),
            })??;

        tracing::debug!("Connected");
        Ok(MssqlSession::new(client, endpoint))
    }
}

#[async_trait]
impl Connector for MssqlConnector {
    type Source = MssqlSession;
    type Target = MssqlSession;

    /// Connects to the database named in the connections file (usually
    /// `master`) to check for and create `database`.
    async fn ensure_database(&self, server: &ConnectionConfig, database: &str) -> Result<(), SyncError> {
        let mut session = self.connect(server, &server.database).await?;

        let probe = format!(
            "SELECT CASE WHEN DB_ID(N{}) IS NULL THEN 0 ELSE 1 END",
            quote_literal(database)
        );
        if session.first_text(&probe).await?.as_deref() == Some("1") {
            return Ok(());
        }

        tracing::info!(database = %database, endpoint = session.endpoint(), "Creating consolidated database");
        let create = format!(
            "IF DB_ID(N{}) IS NULL CREATE DATABASE {}",
            quote_literal(database),
            quote_ident(database)
        );
        session.batch(&create).await?;
        tracing::info!(database = %database, "Database created");
        Ok(())
    }

    async fn open_source(&self, connection: &ConnectionConfig) -> Result<MssqlSession, SyncError> {
        self.connect(connection, &connection.database).await
    }

    async fn open_target(&self, server: &ConnectionConfig, database: &str) -> Result<MssqlSession, SyncError> {
        self.connect(server, database).await
    }
}
