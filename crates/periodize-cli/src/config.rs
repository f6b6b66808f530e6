//! Configuration file management for periodize.
//!
//! Provides a TOML-based config file at `~/.config/periodize/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use periodize_core::payment::MercadoPagoConfig;
use periodize_core::payment::mercadopago;
use periodize_core::renderer::AnthropicConfig;
use periodize_core::renderer::anthropic;
use periodize_core::worker::{DEFAULT_GENERATION_TIMEOUT, PoolConfig};
use periodize_db::config::DbConfig;

pub const ENV_GATEWAY_ACCESS_TOKEN: &str = "PERIODIZE_GATEWAY_ACCESS_TOKEN";
pub const ENV_GATEWAY_BASE_URL: &str = "PERIODIZE_GATEWAY_BASE_URL";
pub const ENV_WEBHOOK_SECRET: &str = "PERIODIZE_WEBHOOK_SECRET";
pub const ENV_RENDERER_API_KEY: &str = "PERIODIZE_RENDERER_API_KEY";
pub const ENV_STORAGE_ROOT: &str = "PERIODIZE_STORAGE_ROOT";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub renderer: RendererSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub worker: WorkerSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub base_url: Option<String>,
    pub access_token: Option<String>,
    /// Public URL of this service, used to build the webhook address.
    pub notification_base_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSection {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    /// Bound on one whole generation attempt.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub root: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub concurrency: Option<usize>,
    pub lease_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the periodize config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/periodize` or
/// `~/.config/periodize`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("periodize");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("periodize")
}

/// Return the path to the periodize config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default location for rendered documents.
pub fn default_storage_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("periodize")
        .join("documents")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix, since it holds credentials.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct PeriodizeConfig {
    pub db_config: DbConfig,
    pub gateway: MercadoPagoConfig,
    /// Webhook signatures are verified only when this is set.
    pub webhook_secret: Option<String>,
    pub renderer: AnthropicConfig,
    pub generation_timeout: Duration,
    pub storage_root: PathBuf,
    pub pool: PoolConfig,
}

fn env_or(var: &str, file_value: Option<&String>) -> Option<String> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| file_value.cloned())
}

impl PeriodizeConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    ///
    /// Credentials (gateway access token, renderer API key) resolve to an
    /// empty string when unset; the clients refuse to call out without
    /// them, so commands that never reach the gateway or renderer still
    /// work.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file = load_config().ok().unwrap_or_default();

        // DB URL resolution.
        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DbConfig::ENV_VAR) {
            url
        } else if !file.database.url.is_empty() {
            file.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        let gateway = MercadoPagoConfig {
            base_url: env_or(ENV_GATEWAY_BASE_URL, file.gateway.base_url.as_ref())
                .unwrap_or_else(|| mercadopago::DEFAULT_BASE_URL.to_string()),
            access_token: env_or(ENV_GATEWAY_ACCESS_TOKEN, file.gateway.access_token.as_ref())
                .unwrap_or_default(),
            notification_base_url: file
                .gateway
                .notification_base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            timeout: file
                .gateway
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(mercadopago::DEFAULT_TIMEOUT),
        };
        let webhook_secret = env_or(ENV_WEBHOOK_SECRET, file.gateway.webhook_secret.as_ref());

        let renderer = AnthropicConfig {
            api_url: file
                .renderer
                .api_url
                .clone()
                .unwrap_or_else(|| anthropic::DEFAULT_API_URL.to_string()),
            api_key: env_or(ENV_RENDERER_API_KEY, file.renderer.api_key.as_ref())
                .unwrap_or_default(),
            model: file
                .renderer
                .model
                .clone()
                .unwrap_or_else(|| anthropic::DEFAULT_MODEL.to_string()),
            max_tokens: file
                .renderer
                .max_tokens
                .unwrap_or(anthropic::DEFAULT_MAX_TOKENS),
        };
        let generation_timeout = file
            .renderer
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_GENERATION_TIMEOUT);

        let storage_root = env_or(ENV_STORAGE_ROOT, file.storage.root.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(default_storage_root);

        let defaults = PoolConfig::default();
        let pool = PoolConfig {
            concurrency: file.worker.concurrency.unwrap_or(defaults.concurrency),
            lease: file
                .worker
                .lease_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.lease),
            poll_interval: file
                .worker
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        };

        Ok(Self {
            db_config,
            gateway,
            webhook_secret,
            renderer,
            generation_timeout,
            storage_root,
            pool,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
