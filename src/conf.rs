use crate::{
    schema::{SchemaManifest, BULLETIN_COLLECTION, NEWS_COLLECTION},
    utils::o11y::logging::as_error,
};

use config::{Config, Environment, File, FileFormat, Map, Value, ValueKind};
use regex::Regex;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_DATABASE_NAME: &str = "crypto_news";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}:]+)(?::-(.*?))?\}").expect("placeholder pattern is valid")
});

#[derive(thiserror::Error, Debug)]
pub enum NewsDbConfigError {
    #[error("failed to load config")]
    InvalidConfigError(#[from] config::ConfigError),
    #[error("could not find config file {0}")]
    ConfigFileNotFound(String),
    #[error("failed to read config file")]
    ReadConfigError(#[from] std::io::Error),
    #[error("invalid value for {key}: {reason}")]
    InvalidValueError { key: String, reason: String },
    #[error("database username and password must be set together")]
    IncompleteCredentialsError,
    #[error("environment variable expansion error")]
    EnvExpansionError(#[from] ExpandError),
    #[error("failed to build database client")]
    BuildClientError(#[from] mongodb::error::Error),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ExpandError {
    #[error("Missing environment variable '{var_name}' for placeholder '{placeholder}'")]
    MissingVariable {
        var_name: String,
        placeholder: String,
    },
}

/// Loads environment variables from a .env file if it exists.
///
/// Looks in the current working directory first, then its parent. Having no
/// .env file at all is fine, the variables may come from the system.
pub fn load_dotenv() {
    for path in [".env", "../.env"] {
        if Path::new(path).exists() {
            match dotenvy::from_path(path) {
                Ok(_) => info!("Loaded environment variables from {} file", path),
                Err(e) => warn!("Found {} file but failed to load it: {}", path, e),
            }
            return;
        }
    }
    debug!("No .env file found, using system environment variables only");
}

/// Expands environment variable placeholders in a string.
/// Supports both ${VAR_NAME} and ${VAR_NAME:-default_value} syntax.
///
/// Examples:
/// - "${MONGO_DB_NAME}" -> reads from MONGO_DB_NAME env var
/// - "${MONGO_DB_NAME:-crypto_news}" -> reads from MONGO_DB_NAME, falls back to "crypto_news"
pub fn expand_env_vars(input: &str) -> Result<String, ExpandError> {
    let mut replacements: HashMap<String, String> = HashMap::new();

    for capture in PLACEHOLDER.captures_iter(input) {
        let full_match = &capture[0];
        if replacements.contains_key(full_match) {
            continue;
        }
        let var_name = &capture[1];
        let default_value = capture.get(2).map(|m| m.as_str());

        let env_value = match env::var(var_name) {
            Ok(value) => {
                debug!("Expanded environment variable: {} = [REDACTED]", var_name);
                value
            }
            Err(_) => match default_value {
                Some(default) => {
                    debug!("Environment variable {} not set, using default value", var_name);
                    default.to_string()
                }
                None => {
                    return Err(ExpandError::MissingVariable {
                        var_name: var_name.to_string(),
                        placeholder: full_match.to_string(),
                    })
                }
            },
        };
        replacements.insert(full_match.to_string(), env_value);
    }

    let mut result = input.to_string();
    for (placeholder, value) in &replacements {
        result = result.replace(placeholder, value);
    }
    Ok(result)
}

/// Loads the YAML config at `filepath` (placeholders expanded), layered under
/// `NEWSDB__*` environment overrides. With no file only the overrides apply.
#[instrument(err)]
pub fn load_config(filepath: Option<&str>) -> Result<Config, NewsDbConfigError> {
    let mut builder = Config::builder();

    if let Some(filepath) = filepath {
        if !Path::new(filepath).exists() {
            return Err(NewsDbConfigError::ConfigFileNotFound(filepath.to_string()));
        }
        let file_content = std::fs::read_to_string(filepath)?;
        let expanded_content = expand_env_vars(&file_content)?;
        builder = builder.add_source(File::from_str(&expanded_content, FileFormat::Yaml));
    }

    let conf = builder
        .add_source(Environment::with_prefix("NEWSDB").separator("__"))
        .build()?;

    Ok(conf)
}

fn get_table(config: &Config, key: &str) -> Result<Map<String, Value>, NewsDbConfigError> {
    match config.get_table(key) {
        Ok(table) => Ok(table),
        Err(config::ConfigError::NotFound(_)) => Ok(Map::new()),
        Err(e) => Err(e.into()),
    }
}

/// Null and empty strings both count as unset.
fn get_string(table: &Map<String, Value>, key: &str) -> Result<Option<String>, NewsDbConfigError> {
    match table.get(key) {
        None => Ok(None),
        Some(value) if matches!(value.kind, ValueKind::Nil) => Ok(None),
        Some(value) => {
            let value = value.clone().into_string()?;
            Ok(Some(value).filter(|v| !v.is_empty()))
        }
    }
}

fn get_int<T: TryFrom<i64>>(
    table: &Map<String, Value>,
    key: &str,
) -> Result<Option<T>, NewsDbConfigError> {
    match table.get(key) {
        None => Ok(None),
        Some(value) if matches!(value.kind, ValueKind::Nil) => Ok(None),
        Some(value) => {
            let raw = value.clone().into_int()?;
            T::try_from(raw)
                .map(Some)
                .map_err(|_| NewsDbConfigError::InvalidValueError {
                    key: key.to_string(),
                    reason: format!("{} is out of range", raw),
                })
        }
    }
}

/// Configuration for database connection
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// Full connection string, takes precedence over host/port/credentials.
    pub uri: Option<String>,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_pool_size: Option<u32>,
    pub replica_set: Option<String>,
    pub srv: bool,
    /// Server selection timeout.
    pub timeout_ms: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            uri: None,
            name: DEFAULT_DATABASE_NAME.to_string(),
            host: "localhost".to_string(),
            port: 27017,
            username: None,
            password: None,
            max_pool_size: None,
            replica_set: None,
            srv: false,
            timeout_ms: None,
        }
    }
}

impl DatabaseConfig {
    pub fn from_config(config: &Config) -> Result<Self, NewsDbConfigError> {
        let db_conf = get_table(config, "database")?;
        let defaults = DatabaseConfig::default();

        let username = get_string(&db_conf, "username")?;
        let password = get_string(&db_conf, "password")?;
        if username.is_some() != password.is_some() {
            return Err(NewsDbConfigError::IncompleteCredentialsError);
        }

        let srv = match db_conf.get("srv") {
            Some(srv) if !matches!(srv.kind, ValueKind::Nil) => srv.clone().into_bool()?,
            _ => defaults.srv,
        };

        let name = get_string(&db_conf, "name")?.unwrap_or(defaults.name);
        if name.contains(['/', '\\', '.', ' ', '"', '$']) {
            return Err(NewsDbConfigError::InvalidValueError {
                key: "database.name".to_string(),
                reason: format!("{:?} is not a valid database name", name),
            });
        }

        Ok(DatabaseConfig {
            uri: get_string(&db_conf, "uri")?,
            name,
            host: get_string(&db_conf, "host")?.unwrap_or(defaults.host),
            port: get_int(&db_conf, "port")?.unwrap_or(defaults.port),
            username,
            password,
            max_pool_size: get_int(&db_conf, "max_pool_size")?,
            replica_set: get_string(&db_conf, "replica_set")?,
            srv,
            timeout_ms: get_int(&db_conf, "timeout_ms")?,
        })
    }

    /// The connection string handed to the driver.
    pub fn connection_uri(&self) -> String {
        if let Some(uri) = &self.uri {
            return uri.clone();
        }

        let prefix = match self.srv {
            true => "mongodb+srv://",
            false => "mongodb://",
        };
        let mut uri = prefix.to_string();

        let credentials = self.username.as_ref().zip(self.password.as_ref());
        if let Some((username, password)) = credentials {
            uri.push_str(&urlencoding::encode(username));
            uri.push(':');
            uri.push_str(&urlencoding::encode(password));
            uri.push('@');
        }

        uri.push_str(&self.host);
        // srv records carry their own port
        if !self.srv {
            uri.push(':');
            uri.push_str(&self.port.to_string());
        }

        uri.push('/');
        uri.push_str(&self.name);

        let mut params = Vec::new();
        if !self.srv {
            params.push("directConnection=true".to_string());
        }
        if credentials.is_some() {
            params.push("authSource=admin".to_string());
        }
        if let Some(replica_set) = &self.replica_set {
            params.push(format!("replicaSet={}", replica_set));
        }
        if let Some(max_pool_size) = self.max_pool_size {
            params.push(format!("maxPoolSize={}", max_pool_size));
        }
        if !params.is_empty() {
            uri.push('?');
            uri.push_str(&params.join("&"));
        }

        uri
    }

    /// Builds the database handle. The driver connects lazily, callers that
    /// need to know the server is reachable should ping it.
    #[instrument(skip_all, fields(database = %self.name), err)]
    pub async fn build_db(&self) -> Result<mongodb::Database, NewsDbConfigError> {
        let mut options = mongodb::options::ClientOptions::parse(self.connection_uri())
            .await
            .inspect_err(as_error!("failed to parse connection string"))?;
        if let Some(timeout_ms) = self.timeout_ms {
            options.server_selection_timeout = Some(Duration::from_millis(timeout_ms));
        }
        if options.app_name.is_none() {
            options.app_name = Some("newsdb-provision".to_string());
        }

        let client = mongodb::Client::with_options(options)?;
        Ok(client.database(&self.name))
    }
}

/// Names of the collections to provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionNames {
    pub news: String,
    pub bulletin: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        CollectionNames {
            news: NEWS_COLLECTION.to_string(),
            bulletin: BULLETIN_COLLECTION.to_string(),
        }
    }
}

impl CollectionNames {
    pub fn from_config(config: &Config) -> Result<Self, NewsDbConfigError> {
        let conf = get_table(config, "collections")?;
        let defaults = CollectionNames::default();
        Ok(CollectionNames {
            news: get_string(&conf, "news")?.unwrap_or(defaults.news),
            bulletin: get_string(&conf, "bulletin")?.unwrap_or(defaults.bulletin),
        })
    }
}

/// Main application configuration that combines all sub-configurations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub collections: CollectionNames,
}

impl AppConfig {
    pub fn from_config(config: &Config) -> Result<Self, NewsDbConfigError> {
        Ok(AppConfig {
            database: DatabaseConfig::from_config(config)?,
            collections: CollectionNames::from_config(config)?,
        })
    }

    /// Uses `config.yaml` when present, otherwise defaults plus `NEWSDB__*`
    /// overrides, so the provisioner runs without any arguments.
    pub fn from_default_path() -> Result<Self, NewsDbConfigError> {
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            return Self::from_path(DEFAULT_CONFIG_PATH);
        }
        warn!(
            "{} not found, using defaults and environment overrides",
            DEFAULT_CONFIG_PATH
        );
        Self::from_config(&load_config(None)?)
    }

    pub fn from_path(config_path: &str) -> Result<Self, NewsDbConfigError> {
        Self::from_config(&load_config(Some(config_path))?)
    }

    pub async fn build_db(&self) -> Result<mongodb::Database, NewsDbConfigError> {
        self.database.build_db().await
    }

    pub fn manifest(&self) -> SchemaManifest {
        SchemaManifest::crypto_news(&self.collections.news, &self.collections.bulletin)
    }
}
