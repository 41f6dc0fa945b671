use anyhow::Context;
use querydesk_sqllab::DatabaseEntry;
use querydesk_tenancy::{ExemptRoute, PoolConfig, default_exemptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub tenancy: TenancyConfig,

    #[serde(default)]
    pub sqllab: SqlLabConfig,

    /// Databases queries may run against
    #[serde(default)]
    pub databases: Vec<DatabaseEntry>,

    #[serde(default)]
    pub translator: TranslatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Keep sqlx statement logging at the configured level
    #[serde(default = "default_false")]
    pub log_sql_queries: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Connection URL of the default store
    #[serde(default = "default_database_uri")]
    pub database_uri: String,

    /// Connection template for tenant stores (`${db_name}`, `${tenant_name}`)
    #[serde(default = "default_database_template")]
    pub database_template: String,

    /// Statically configured binds (key to connection URL)
    #[serde(default)]
    pub binds: HashMap<String, String>,

    /// Endpoints that always run on the default store
    #[serde(default = "default_exemptions")]
    pub exemptions: Vec<ExemptRoute>,

    #[serde(default)]
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlLabConfig {
    /// Deadline for synchronous execution
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Dispatch through the work queue unless the request says otherwise
    #[serde(default = "default_false")]
    pub run_async: bool,

    /// Keep worker results until the task is detached
    #[serde(default = "default_true")]
    pub backend_persistence: bool,

    /// Skip limit injection for select-as-create-table queries
    #[serde(default = "default_false")]
    pub ctas_no_limit: bool,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_task_time_limit_seconds")]
    pub task_time_limit_seconds: u64,

    /// Row limit used when a request does not ask for one
    #[serde(default = "default_limit")]
    pub default_limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// Natural-language translation endpoint; translation is disabled without one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            logging: LoggingConfig::default(),
            tenancy: TenancyConfig::default(),
            sqllab: SqlLabConfig::default(),
            databases: Vec::new(),
            translator: TranslatorConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_sql_queries: false,
        }
    }
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            database_uri: default_database_uri(),
            database_template: default_database_template(),
            binds: HashMap::new(),
            exemptions: default_exemptions(),
            pool: PoolConfig::default(),
        }
    }
}

impl Default for SqlLabConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            run_async: false,
            backend_persistence: true,
            ctas_no_limit: false,
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            task_time_limit_seconds: default_task_time_limit_seconds(),
            default_limit: default_limit(),
        }
    }
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl SqlLabConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn task_time_limit(&self) -> Duration {
        Duration::from_secs(self.task_time_limit_seconds)
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents).context("Invalid TOML configuration")?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents).context("Invalid YAML configuration")?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        // Server settings
        if let Ok(val) = std::env::var("QUERYDESK_HOST") {
            self.host = val;
        }

        if let Ok(val) = std::env::var("QUERYDESK_PORT")
            && let Ok(port) = val.parse::<u16>()
        {
            self.port = port;
        }

        // Logging settings
        if let Ok(val) = std::env::var("QUERYDESK_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = std::env::var("QUERYDESK_LOG_SQL_QUERIES")
            && let Ok(enabled) = val.parse::<bool>()
        {
            self.logging.log_sql_queries = enabled;
        }

        // Tenancy settings
        if let Ok(val) = std::env::var("QUERYDESK_DATABASE_URI") {
            self.tenancy.database_uri = val;
        }

        if let Ok(val) = std::env::var("QUERYDESK_DATABASE_TEMPLATE") {
            self.tenancy.database_template = val;
        }

        // SQL Lab settings
        if let Ok(val) = std::env::var("QUERYDESK_SQLLAB_TIMEOUT")
            && let Ok(seconds) = val.parse::<u64>()
        {
            self.sqllab.timeout_seconds = seconds;
        }

        if let Ok(val) = std::env::var("QUERYDESK_RUN_ASYNC")
            && let Ok(enabled) = val.parse::<bool>()
        {
            self.sqllab.run_async = enabled;
        }

        if let Ok(val) = std::env::var("QUERYDESK_TRANSLATOR_ENDPOINT") {
            self.translator.endpoint = Some(val);
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8088
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_uri() -> String {
    "sqlite:querydesk.db?mode=rwc".to_string()
}

fn default_database_template() -> String {
    "sqlite:${db_name}.db?mode=rwc".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_task_time_limit_seconds() -> u64 {
    6 * 60 * 60
}

fn default_limit() -> i64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8088);
        assert_eq!(config.sqllab.timeout(), Duration::from_secs(30));
        assert_eq!(config.sqllab.default_limit, 1000);
        assert!(config.sqllab.backend_persistence);
        assert!(!config.sqllab.run_async);
        assert!(config.translator.endpoint.is_none());
        assert_eq!(config.tenancy.exemptions, default_exemptions());
    }

    #[test]
    fn test_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
port: 9000
tenancy:
  database_uri: "postgres://meta/querydesk"
  database_template: "postgres://tenants/${{db_name}}"
  pool:
    max_connections: 20
  exemptions:
    - endpoint: "login"
sqllab:
  timeout_seconds: 5
  run_async: true
databases:
  - id: 1
    name: analytics
    backend: postgresql
    uri: "postgres://warehouse/analytics"
    allowed_users: ["alice"]
translator:
  endpoint: "http://translator.internal/v1/translate"
"#
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.tenancy.database_uri, "postgres://meta/querydesk");
        assert_eq!(
            config.tenancy.database_template,
            "postgres://tenants/${db_name}"
        );
        assert_eq!(config.tenancy.pool.max_connections, 20);
        assert_eq!(config.tenancy.pool.min_connections, 0);
        assert_eq!(config.tenancy.exemptions, vec![ExemptRoute::new("login", &[])]);
        assert_eq!(config.sqllab.timeout_seconds, 5);
        assert!(config.sqllab.run_async);
        assert_eq!(config.sqllab.worker_count, 4);
        assert_eq!(config.databases.len(), 1);
        assert_eq!(config.databases[0].allowed_users, vec!["alice"]);
        assert!(!config.databases[0].allow_dml);
        assert_eq!(
            config.translator.endpoint.as_deref(),
            Some("http://translator.internal/v1/translate")
        );
    }

    #[test]
    fn test_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
host = "0.0.0.0"

[logging]
level = "debug"
log_sql_queries = true

[sqllab]
ctas_no_limit = true
default_limit = 500

[tenancy.binds]
reporting = "sqlite:reporting.db"
"#
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.log_sql_queries);
        assert!(config.sqllab.ctas_no_limit);
        assert_eq!(config.sqllab.default_limit, 500);
        assert_eq!(
            config.tenancy.binds.get("reporting").map(String::as_str),
            Some("sqlite:reporting.db")
        );
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = ServerConfig::from_file("/nonexistent/querydesk.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_values() {
        let mut config = ServerConfig::default();
        unsafe {
            std::env::set_var("QUERYDESK_PORT", "7001");
            std::env::set_var("QUERYDESK_SQLLAB_TIMEOUT", "12");
            std::env::set_var("QUERYDESK_RUN_ASYNC", "true");
            std::env::set_var("QUERYDESK_DATABASE_TEMPLATE", "sqlite:${db_name}_env.db");
        }

        config.merge_env();

        unsafe {
            std::env::remove_var("QUERYDESK_PORT");
            std::env::remove_var("QUERYDESK_SQLLAB_TIMEOUT");
            std::env::remove_var("QUERYDESK_RUN_ASYNC");
            std::env::remove_var("QUERYDESK_DATABASE_TEMPLATE");
        }

        assert_eq!(config.port, 7001);
        assert_eq!(config.sqllab.timeout_seconds, 12);
        assert!(config.sqllab.run_async);
        assert_eq!(config.tenancy.database_template, "sqlite:${db_name}_env.db");
    }

    #[test]
    #[serial]
    fn test_invalid_env_values_are_ignored() {
        let mut config = ServerConfig::default();
        unsafe {
            std::env::set_var("QUERYDESK_PORT", "not-a-port");
        }
        config.merge_env();
        unsafe {
            std::env::remove_var("QUERYDESK_PORT");
        }
        assert_eq!(config.port, 8088);
    }
}
