// External crates
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::instrument;

/// Port used when a line carries five fields.
pub const DEFAULT_PORT: u16 = 1433;

/// One SQL Server connection from the connections file.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Host name or address.
    pub server: String,
    /// TCP port.
    pub port: u16,
    /// Database the connection opens.
    pub database: String,
    /// SQL login.
    pub username: String,
    password: String,
    /// Whether this entry is flagged as the consolidation target.
    pub is_target: bool,
}

impl ConnectionConfig {
    /// Build a connection entry.
    pub fn new(
        server: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        is_target: bool,
    ) -> Self {
        Self {
            server: server.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            is_target,
        }
    }

    /// SQL login password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// `server:port/database`, for logs.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}:{}/{}", self.server, self.port, self.database)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("is_target", &self.is_target)
            .finish()
    }
}

/// Why a cycle cannot start from the connection list.
#[derive(Debug, Error)]
pub enum ConnectionsError {
    /// The connections file could not be read.
    #[error("connection file {path} could not be read: {source}")]
    Read {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// No entry is flagged as target.
    #[error("no target connection found")]
    NoTarget,
    /// Every entry is a target.
    #[error("no source connections found")]
    NoSources,
}

/// Parse the connections file content.
///
/// Malformed lines are skipped with a warning naming their line number.
#[must_use]
pub fn parse_connections(content: &str) -> Vec<ConnectionConfig> {
    let mut connections = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line_number = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let (server, port, database, username, password, flag) = match parts.as_slice() {
            [server, database, username, password, flag] => {
                (*server, DEFAULT_PORT.to_string(), *database, *username, *password, *flag)
            }
            [server, port, database, username, password, flag] => {
                (*server, port.to_string(), *database, *username, *password, *flag)
            }
            _ => {
                tracing::warn!(
                    line = line_number,
                    fields = parts.len(),
                    "Skipping malformed connection line"
                );
                continue;
            }
        };

        let Ok(port) = port.parse::<u16>() else {
            tracing::warn!(line = line_number, port = %port, "Skipping connection line with invalid port");
            continue;
        };

        connections.push(ConnectionConfig::new(
            server,
            port,
            database,
            username,
            password,
            flag.eq_ignore_ascii_case("yes"),
        ));
    }

    connections
}

/// Read and parse the connections file.
#[instrument(
    name = "agent_load_connections",
    target = "helpers::connections",
    level = "debug",
    skip_all,
    fields(path = %path.display())
)]
pub async fn load_connections(path: &Path) -> Result<Vec<ConnectionConfig>, ConnectionsError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConnectionsError::Read {
            path: path.display().to_string(),
            source,
        })?;

    let connections = parse_connections(&content);
    tracing::info!(count = connections.len(), "Loaded connection configurations");
    Ok(connections)
}

/// The consolidation target and the branches feeding it.
#[derive(Debug, Clone)]
pub struct ConnectionRoles {
    /// Target server; its `database` is only used to reach the server.
    pub target: ConnectionConfig,
    /// Branch databases.
    pub sources: Vec<ConnectionConfig>,
}

/// Split entries into the first target and the sources.
pub fn split_roles(connections: Vec<ConnectionConfig>) -> Result<ConnectionRoles, ConnectionsError> {
    let mut target = None;
    let mut sources = Vec::new();

    for connection in connections {
        if !connection.is_target {
            sources.push(connection);
        } else if target.is_none() {
            target = Some(connection);
        } else {
            tracing::warn!(
                connection = %connection.label(),
                "Ignoring additional target connection"
            );
        }
    }

    let target = target.ok_or(ConnectionsError::NoTarget)?;
    if sources.is_empty() {
        return Err(ConnectionsError::NoSources);
    }
    Ok(ConnectionRoles { target, sources })
}
