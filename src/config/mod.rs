use anyhow::{Context, Result};
use serde::Deserialize;

/// Complete application configuration.
///
/// Loaded from an optional TOML file, then overridden from environment
/// variables (see [`AppConfig::apply_env`]).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub vendor: VendorConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Frontend origin; used for CORS and post-login redirects
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
}

fn default_port() -> u16 {
    3000
}

fn default_frontend_url() -> String {
    "http://localhost:5173".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            frontend_url: default_frontend_url(),
        }
    }
}

/// SQLite database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "sonos-panel.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Vendor OAuth client registration and endpoints
#[derive(Clone, Deserialize)]
pub struct VendorConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_redirect_uri() -> String {
    "http://localhost:3000/auth/callback".to_string()
}

fn default_auth_url() -> String {
    "https://api.sonos.com/login/v3/oauth".to_string()
}

fn default_token_url() -> String {
    "https://api.sonos.com/login/v3/oauth/access".to_string()
}

fn default_api_base_url() -> String {
    "https://api.ws.sonos.com/control/api/v1".to_string()
}

fn default_scope() -> String {
    "playback-control-all".to_string()
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
            scope: default_scope(),
        }
    }
}

// Hand-written so the client secret never reaches logs.
impl std::fmt::Debug for VendorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("api_base_url", &self.api_base_url)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Token encryption key material
#[derive(Clone, Default, Deserialize)]
pub struct EncryptionConfig {
    /// 64 hex characters (32 bytes)
    #[serde(default)]
    pub key: Option<String>,
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// API session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_hours")]
    pub ttl_hours: i64,
}

fn default_session_ttl_hours() -> i64 {
    24 * 7
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_session_ttl_hours(),
        }
    }
}

impl AppConfig {
    /// Loads configuration: the TOML file named by `SONOS_PANEL_CONFIG` (if
    /// set), then environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("SONOS_PANEL_CONFIG") {
            Ok(path) => load_config(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Overrides fields from environment variables, ignoring unparsable values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PORT") {
            if let Ok(port) = v.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Some(v) = lookup("FRONTEND_URL") {
            self.server.frontend_url = v;
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            self.database.path = v;
        }
        if let Some(v) = lookup("SONOS_CLIENT_ID") {
            self.vendor.client_id = v;
        }
        if let Some(v) = lookup("SONOS_CLIENT_SECRET") {
            self.vendor.client_secret = v;
        }
        if let Some(v) = lookup("SONOS_REDIRECT_URI") {
            self.vendor.redirect_uri = v;
        }
        if let Some(v) = lookup("SONOS_AUTH_URL") {
            self.vendor.auth_url = v;
        }
        if let Some(v) = lookup("SONOS_TOKEN_URL") {
            self.vendor.token_url = v;
        }
        if let Some(v) = lookup("SONOS_API_BASE_URL") {
            self.vendor.api_base_url = v;
        }
        if let Some(v) = lookup("ENCRYPTION_KEY") {
            self.encryption.key = Some(v);
        }
        if let Some(v) = lookup("SESSION_TTL_HOURS") {
            if let Ok(hours) = v.parse::<i64>() {
                self.session.ttl_hours = hours;
            }
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: AppConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
