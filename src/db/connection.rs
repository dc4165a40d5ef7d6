use anyhow::{Context, Result};
use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, warn};

/// Environment variable pointing at a connections file.
pub const CONNECTIONS_ENV: &str = "GRAPHLENS_CONNECTIONS";

/// Environment variable consulted for passwords left out of the connections file.
pub const PASSWORD_ENV: &str = "GRAPHLENS_PASSWORD";

/// Where a query is sent. One variant per supported backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ConnectionDescriptor {
    /// Native property-graph engine spoken to over Bolt.
    #[serde(rename = "neo4j")]
    GraphNative(GraphNativeEndpoint),
    /// PostgreSQL with the Apache AGE extension.
    #[serde(rename = "age")]
    RelationalGraph(RelationalEndpoint),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNativeEndpoint {
    /// e.g. `bolt://localhost:7687`
    pub uri: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    #[serde(default = "default_neo4j_database")]
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationalEndpoint {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    /// AGE graph the queries run against.
    pub graph_name: String,
    #[serde(default)]
    pub ssl_mode: SslMode,
    /// Accept invalid/self-signed certificates. Use with caution.
    /// Only honoured for `Prefer` and `Require`.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Optional path to a custom CA certificate file (PEM format).
    /// If not set, the system CA store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,
}

/// SSL/TLS connection modes for PostgreSQL.
///
/// These match the standard PostgreSQL sslmode parameter:
/// - `Disable`: No SSL (unencrypted)
/// - `Prefer`: Try SSL first, fall back to non-SSL (default)
/// - `Require`: Require SSL but don't verify certificate
/// - `VerifyCa`: Require SSL and verify the server certificate is signed by a trusted CA
/// - `VerifyFull`: Like VerifyCa, but also verify the server hostname matches the certificate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

fn default_neo4j_database() -> String {
    String::from("neo4j")
}

fn default_pg_port() -> u16 {
    5432
}

impl ConnectionDescriptor {
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionDescriptor::GraphNative(_) => "neo4j",
            ConnectionDescriptor::RelationalGraph(_) => "age",
        }
    }

    pub fn display_string(&self) -> String {
        match self {
            ConnectionDescriptor::GraphNative(ep) => ep.display_string(),
            ConnectionDescriptor::RelationalGraph(ep) => ep.display_string(),
        }
    }

    pub fn password_mut(&mut self) -> &mut String {
        match self {
            ConnectionDescriptor::GraphNative(ep) => &mut ep.password,
            ConnectionDescriptor::RelationalGraph(ep) => &mut ep.password,
        }
    }
}

impl GraphNativeEndpoint {
    pub fn display_string(&self) -> String {
        format!("{}@{}/{}", self.username, self.uri, self.database)
    }
}

impl RelationalEndpoint {
    pub fn connection_string(&self) -> String {
        let sslmode = match self.ssl_mode {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        };
        format!(
            "host={} port={} dbname={} user={} password={} sslmode={} connect_timeout=10",
            quote_conn_value(&self.host),
            self.port,
            quote_conn_value(&self.database),
            quote_conn_value(&self.username),
            quote_conn_value(&self.password),
            sslmode
        )
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{} (graph {})",
            self.username, self.host, self.port, self.database, self.graph_name
        )
    }
}

impl Default for RelationalEndpoint {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: default_pg_port(),
            database: String::from("postgres"),
            username: String::from("postgres"),
            password: String::new(),
            graph_name: String::new(),
            ssl_mode: SslMode::default(),
            accept_invalid_certs: false,
            ca_cert_path: None,
        }
    }
}

/// Engine tunables, read from the `[engine]` table of the connections file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on opening a backend connection.
    pub connect_timeout_ms: u64,
    /// Extra time the client waits past `statement_timeout` before giving up on the server.
    pub statement_grace_ms: u64,
    /// Used when the caller does not pass a timeout.
    pub default_timeout_ms: u64,
    /// Bolt fetch batch size.
    pub fetch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 15_000,
            statement_grace_ms: 1_000,
            default_timeout_ms: 30_000,
            fetch_size: 500,
        }
    }
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn statement_grace(&self) -> Duration {
        Duration::from_millis(self.statement_grace_ms)
    }
}

/// A named connection as it appears in the connections file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedConnection {
    pub name: String,
    #[serde(flatten)]
    pub descriptor: ConnectionDescriptor,
}

/// Parsed connections file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub engine: EngineConfig,
    pub connections: Vec<SavedConnection>,
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    connections: Vec<toml::Value>,
}

impl Settings {
    pub fn get_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONNECTIONS_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("graphlens")
            .join("connections.toml")
    }

    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Connections file not found: {}", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read connections file: {}", path.display()))?;
        let settings = Self::parse(&content)
            .with_context(|| format!("Invalid connections file: {}", path.display()))?;
        info!(
            "Loaded {} connection(s) from {}",
            settings.connections.len(),
            path.display()
        );
        Ok(settings)
    }

    /// Parse a connections document. Entries that don't describe a valid
    /// connection are skipped with a warning rather than failing the load.
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawSettings = toml::from_str(content)?;
        let mut connections = Vec::with_capacity(raw.connections.len());
        for (i, value) in raw.connections.into_iter().enumerate() {
            match value.try_into::<SavedConnection>() {
                Ok(conn) => connections.push(conn),
                Err(e) => warn!("Skipping invalid connection at index {}: {}", i, e),
            }
        }
        Ok(Self {
            engine: raw.engine,
            connections,
        })
    }

    pub fn find(&self, name: &str) -> Option<&SavedConnection> {
        self.connections
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Open a PostgreSQL client for `endpoint`.
/// The connection future is driven on its own task; dropping the returned
/// `Client` closes the connection.
pub async fn create_client(endpoint: &RelationalEndpoint, timeout: Duration) -> Result<Client> {
    let conn_string = endpoint.connection_string();
    debug!("Connecting to {}", endpoint.display_string());

    let client = match endpoint.ssl_mode {
        SslMode::Disable => {
            let (client, connection) =
                tokio::time::timeout(timeout, tokio_postgres::connect(&conn_string, NoTls))
                    .await
                    .map_err(|_| anyhow::anyhow!("Connection timed out after {:?}", timeout))?
                    .context("Failed to connect to PostgreSQL")?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    debug!("Connection closed with error: {}", e);
                }
            });
            client
        }
        SslMode::Prefer | SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => {
            let strict = matches!(endpoint.ssl_mode, SslMode::VerifyCa | SslMode::VerifyFull);
            let tls = build_tls_connector(endpoint, strict)?;
            let (client, connection) =
                tokio::time::timeout(timeout, tokio_postgres::connect(&conn_string, tls))
                    .await
                    .map_err(|_| anyhow::anyhow!("Connection timed out after {:?}", timeout))?
                    .context("Failed to connect to PostgreSQL")?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    debug!("Connection closed with error: {}", e);
                }
            });
            client
        }
    };

    Ok(client)
}

/// Open a dedicated Bolt connection for `endpoint`.
/// The pool is capped at one connection so the `Graph` behaves as a single session.
pub async fn create_graph(
    endpoint: &GraphNativeEndpoint,
    fetch_size: usize,
    timeout: Duration,
) -> Result<neo4rs::Graph> {
    debug!("Connecting to {}", endpoint.display_string());
    let config = neo4rs::ConfigBuilder::default()
        .uri(endpoint.uri.as_str())
        .user(endpoint.username.as_str())
        .password(endpoint.password.as_str())
        .db(endpoint.database.as_str())
        .fetch_size(fetch_size)
        .max_connections(1)
        .build()
        .context("Invalid Neo4j configuration")?;
    let graph = tokio::time::timeout(timeout, neo4rs::Graph::connect(config))
        .await
        .map_err(|_| anyhow::anyhow!("Connection timed out after {:?}", timeout))?
        .context("Failed to connect to Neo4j")?;
    Ok(graph)
}

/// Build a TLS connector with appropriate certificate configuration.
///
/// # Arguments
/// * `endpoint` - Connection configuration
/// * `strict_verify` - If true, always verify certificates (for verify-ca/verify-full modes)
fn build_tls_connector(
    endpoint: &RelationalEndpoint,
    strict_verify: bool,
) -> Result<MakeTlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if endpoint.accept_invalid_certs && !strict_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else if let Some(ca_path) = &endpoint.ca_cert_path {
        let ca_data = std::fs::read(ca_path)
            .with_context(|| format!("Failed to read CA certificate file: {}", ca_path))?;
        for pem in split_pem_certificates(&ca_data)? {
            let cert = native_tls::Certificate::from_pem(pem.as_bytes())
                .context("Failed to parse certificate")?;
            builder.add_root_certificate(cert);
        }
    }

    let connector = builder.build().context("Failed to build TLS connector")?;

    Ok(MakeTlsConnector::new(connector))
}

/// Split a PEM bundle into individual certificate blocks.
fn split_pem_certificates(pem_data: &[u8]) -> Result<Vec<String>> {
    let pem_str =
        std::str::from_utf8(pem_data).context("CA certificate file is not valid UTF-8")?;

    let mut certs = Vec::new();
    let mut current = String::new();
    let mut in_cert = false;

    for line in pem_str.lines() {
        if line.contains("-----BEGIN CERTIFICATE-----") {
            in_cert = true;
            current.clear();
            current.push_str(line.trim());
            current.push('\n');
        } else if line.contains("-----END CERTIFICATE-----") {
            if in_cert {
                current.push_str(line.trim());
                current.push('\n');
                certs.push(std::mem::take(&mut current));
            }
            in_cert = false;
        } else if in_cert {
            current.push_str(line.trim());
            current.push('\n');
        }
    }

    if certs.is_empty() {
        anyhow::bail!("No valid certificates found in PEM data");
    }

    Ok(certs)
}

/// Quote a value for use in a libpq key=value connection string.
/// Wraps in single quotes and escapes backslashes and single quotes.
fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[engine]
default_timeout_ms = 5000

[[connections]]
name = "Local Neo4j"
type = "neo4j"
uri = "bolt://localhost:7687"
username = "neo4j"
password = "secret"

[[connections]]
name = "Movies AGE"
type = "age"
host = "db.internal"
database = "graphs"
username = "analyst"
graph_name = "movies"

[[connections]]
name = "Broken"
type = "age"
host = "nowhere"
"#;

    #[test]
    fn test_parse_settings() {
        let settings = Settings::parse(SAMPLE).unwrap();
        assert_eq!(settings.engine.default_timeout_ms, 5000);
        assert_eq!(settings.engine.connect_timeout_ms, 15_000);
        // The third entry is missing required fields and is skipped
        assert_eq!(settings.connections.len(), 2);

        match &settings.connections[0].descriptor {
            ConnectionDescriptor::GraphNative(ep) => {
                assert_eq!(ep.uri, "bolt://localhost:7687");
                assert_eq!(ep.database, "neo4j");
                assert_eq!(ep.password, "secret");
            }
            other => panic!("unexpected descriptor: {:?}", other),
        }
        match &settings.connections[1].descriptor {
            ConnectionDescriptor::RelationalGraph(ep) => {
                assert_eq!(ep.port, 5432);
                assert_eq!(ep.graph_name, "movies");
                assert_eq!(ep.ssl_mode, SslMode::Prefer);
                assert!(ep.password.is_empty());
            }
            other => panic!("unexpected descriptor: {:?}", other),
        }
    }

    #[test]
    fn test_find_is_case_insensitive() {
        let settings = Settings::parse(SAMPLE).unwrap();
        assert!(settings.find("movies age").is_some());
        assert!(settings.find("missing").is_none());
    }

    #[test]
    fn test_empty_document() {
        let settings = Settings::parse("").unwrap();
        assert!(settings.connections.is_empty());
        assert_eq!(settings.engine, EngineConfig::default());
    }

    #[test]
    fn test_connection_string_quotes_values() {
        let ep = RelationalEndpoint {
            password: "it's".to_string(),
            graph_name: "g".to_string(),
            ..Default::default()
        };
        let s = ep.connection_string();
        assert!(s.contains("password='it\\'s'"));
        assert!(s.contains("sslmode=prefer"));
    }

    #[test]
    fn test_descriptor_kind() {
        let neo = ConnectionDescriptor::GraphNative(GraphNativeEndpoint {
            uri: "bolt://h:7687".into(),
            username: "u".into(),
            password: String::new(),
            database: "neo4j".into(),
        });
        assert_eq!(neo.kind(), "neo4j");
        assert_eq!(neo.display_string(), "u@bolt://h:7687/neo4j");
    }

    #[test]
    fn test_split_pem() {
        let pem = b"-----BEGIN CERTIFICATE-----\nAAAA\nBBBB\n-----END CERTIFICATE-----\n\
-----BEGIN CERTIFICATE-----\nCCCC\n-----END CERTIFICATE-----\n";
        let certs = split_pem_certificates(pem).unwrap();
        assert_eq!(certs.len(), 2);
        assert!(certs[0].starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(certs[1].contains("CCCC"));
        assert!(split_pem_certificates(b"garbage").is_err());
    }
}
