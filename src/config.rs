use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, UlNzbError};
use crate::nntp::AuthMethod;
use crate::yenc::LineEnding;

type Result<T> = std::result::Result<T, UlNzbError>;

/// Default `X-Newsposter` value
pub const DEFAULT_POSTER: &str = concat!(
    "ul-nzb v",
    env!("CARGO_PKG_VERSION"),
    " - ",
    env!("CARGO_PKG_REPOSITORY")
);

/// Expand tilde (~) in paths to the actual home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if path_str == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub usenet: UsenetConfig,

    #[serde(default)]
    pub posting: PostingConfig,

    #[serde(default)]
    pub nzb: NzbConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsenetConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub ssl: bool,
    pub verify_ssl_certs: bool,
    pub connections: u16,
    pub timeout: u64, // seconds
    /// Attempts per article before giving up, 0 retries forever
    pub retry_attempts: u32,
    pub reconnect_delay: u64, // seconds
    pub auth_method: AuthMethod,
}

// Custom Debug implementation to hide sensitive data
impl std::fmt::Debug for UsenetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsenetConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("ssl", &self.ssl)
            .field("verify_ssl_certs", &self.verify_ssl_certs)
            .field("connections", &self.connections)
            .field("timeout", &self.timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("auth_method", &self.auth_method)
            .finish()
    }
}

impl UsenetConfig {
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostingConfig {
    pub from: String,
    pub groups: Vec<String>,
    /// Prepended verbatim to every subject
    pub prefix: String,
    /// Raw bytes per article
    pub article_size: u32,
    /// `X-Newsposter` header, omitted when empty
    pub poster: String,
    pub x_no_archive: bool,
    /// STAT every article after posting
    pub header_check: bool,
    pub line_ending: LineEnding,
    pub generate_message_id: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NzbConfig {
    pub enabled: bool,
    /// Where NZB files are written, the current directory when unset
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
    pub format: String,
}

// Default implementations
impl Default for UsenetConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: 563, // Default SSL port
            username: String::new(),
            password: String::new(),
            ssl: true,
            verify_ssl_certs: true,
            connections: 8,
            timeout: 30,
            retry_attempts: 0,
            reconnect_delay: 5,
            auth_method: AuthMethod::default(),
        }
    }
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            from: String::new(),
            groups: Vec::new(),
            prefix: String::new(),
            article_size: 750 * 1024,
            poster: DEFAULT_POSTER.to_string(),
            x_no_archive: true,
            header_check: false,
            line_ending: LineEnding::Lf,
            generate_message_id: false,
        }
    }
}

impl Default for NzbConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            format: "pretty".to_string(),
        }
    }
}

/// Split a comma-separated newsgroup list
pub fn parse_groups(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load configuration from environment variables
fn load_env_overrides(mut config: Config) -> Config {
    // Override with UL_NZB_ prefixed environment variables
    if let Ok(val) = env::var("UL_NZB_USENET_SERVER") {
        config.usenet.server = val;
    }
    if let Ok(val) = env::var("UL_NZB_USENET_PORT") {
        if let Ok(port) = val.parse() {
            config.usenet.port = port;
        }
    }
    if let Ok(val) = env::var("UL_NZB_USENET_USERNAME") {
        config.usenet.username = val;
    }
    if let Ok(val) = env::var("UL_NZB_USENET_PASSWORD") {
        config.usenet.password = val;
    }
    if let Ok(val) = env::var("UL_NZB_USENET_SSL") {
        if let Ok(ssl) = val.parse() {
            config.usenet.ssl = ssl;
        }
    }
    if let Ok(val) = env::var("UL_NZB_USENET_CONNECTIONS") {
        if let Ok(connections) = val.parse() {
            config.usenet.connections = connections;
        }
    }
    if let Ok(val) = env::var("UL_NZB_POSTING_GROUPS") {
        config.posting.groups = parse_groups(&val);
    }
    if let Ok(val) = env::var("UL_NZB_POSTING_FROM") {
        config.posting.from = val;
    }

    config
}

impl Config {
    /// Get the standard config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::Invalid {
            field: "config_dir".to_string(),
            reason: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("ul-nzb").join("config.toml"))
    }

    /// Path the next `load` will read from
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(expand_tilde(path));
        }
        let local_config = PathBuf::from("ul-nzb.toml");
        if local_config.exists() {
            return Ok(local_config);
        }
        Self::config_path()
    }

    /// Load configuration from an explicit path, the local file or the standard location
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(explicit)?;

        if !config_path.exists() {
            if explicit.is_some() {
                return Err(ConfigError::NotFound(config_path).into());
            }

            tracing::debug!(
                "Config file not found, creating default at: {}",
                config_path.display()
            );
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Self::create_sample(&config_path)?;
            tracing::info!(
                "Created default configuration at {}, edit it with your server details",
                config_path.display()
            );
        }

        tracing::debug!("Loaded configuration from: {}", config_path.display());
        let content = std::fs::read_to_string(&config_path)?;
        let config = Self::from_toml(&content)?;
        let mut config = load_env_overrides(config);

        if let Some(dir) = config.nzb.output_dir.as_ref() {
            config.nzb.output_dir = Some(expand_tilde(dir));
        }
        if let Some(log_file) = config.logging.file.as_ref() {
            config.logging.file = Some(expand_tilde(log_file));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse config: {}", e)).into())
    }

    /// Create a sample configuration file
    pub fn create_sample<P: AsRef<Path>>(path: P) -> Result<()> {
        let sample = Self::default();
        let content = toml::to_string_pretty(&sample)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {}", e)))?;

        let commented_content = format!(
            r#"# ul-nzb Configuration File
#
# This file configures the ul-nzb Usenet poster.
# Server settings can be overridden via environment variables with the UL_NZB_ prefix.
# For example: UL_NZB_USENET_SERVER=news.example.com
#
# REQUIRED: server, from and groups

{}

# Configuration Guide:
#
# [usenet]
# server          - Your Usenet provider's server address (REQUIRED)
# port            - Usually 563 for SSL, 119 for non-SSL
# username        - Account username, leave empty if the server needs none
# password        - Account password
# connections     - Number of parallel posting connections (1-100)
# timeout         - Network timeout in seconds
# retry_attempts  - Attempts per article before giving up (0 = retry forever)
# reconnect_delay - Seconds to wait before retrying a failed article
# auth_method     - original, simple, plain or cram-md5
#
# [posting]
# from                - Poster identity, e.g. "Poster <poster@example.com>" (REQUIRED)
# groups              - Newsgroups to post to (REQUIRED)
# prefix              - Text prepended to every subject
# article_size        - Raw bytes per article
# poster              - X-Newsposter header, empty to omit
# x_no_archive        - Add "X-No-Archive: yes"
# header_check        - Verify every article with STAT after posting
# line_ending         - "lf" or "crlf" inside yEnc bodies
# generate_message_id - Send a Message-ID header instead of letting the server assign one
#
# [nzb]
# enabled    - Write an NZB file after the upload
# output_dir - Directory for NZB files (default: current directory)
"#,
            content
        );

        std::fs::write(path, commented_content)?;
        Ok(())
    }

    /// Validate basic configuration (always run)
    /// Does not require server details - use validate_for_upload() before posting
    pub fn validate(&self) -> Result<()> {
        if self.usenet.connections == 0 || self.usenet.connections > 100 {
            return Err(ConfigError::InvalidConnections {
                count: self.usenet.connections,
            }
            .into());
        }

        if self.posting.article_size == 0 {
            return Err(ConfigError::Invalid {
                field: "article_size".to_string(),
                reason: "Must be at least 1 byte".to_string(),
            }
            .into());
        }

        if self.usenet.username.is_empty() != self.usenet.password.is_empty() {
            return Err(ConfigError::IncompleteCredentials.into());
        }

        if let Some(dir) = &self.nzb.output_dir {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::InvalidPath {
                    path: dir.clone(),
                    reason: "NZB output directory is empty".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Validate configuration for upload operations
    pub fn validate_for_upload(&self) -> Result<()> {
        self.validate()?;

        if self.usenet.server.is_empty() {
            return Err(ConfigError::NoServer.into());
        }

        if self.posting.groups.is_empty() {
            return Err(ConfigError::NoGroups.into());
        }

        if self.posting.from.trim().is_empty() {
            return Err(ConfigError::NoFrom.into());
        }

        if !self.usenet.auth_method.is_implemented() {
            tracing::warn!(
                "Authentication method '{}' is not implemented, login will fail",
                self.usenet.auth_method
            );
        }

        Ok(())
    }

    /// Directory NZB files are written to
    pub fn nzb_dir(&self) -> PathBuf {
        self.nzb
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Ensure required directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        if self.nzb.enabled {
            std::fs::create_dir_all(self.nzb_dir())?;
        }

        if let Some(log_file) = &self.logging.file {
            if let Some(parent) = log_file.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(())
    }

    /// Apply command-line overrides
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(username) = overrides.username {
            self.usenet.username = username;
        }
        if let Some(password) = overrides.password {
            self.usenet.password = password;
        }
        if let Some(connections) = overrides.connections {
            self.usenet.connections = connections;
        }
        if let Some(groups) = overrides.groups {
            self.posting.groups = groups;
        }
        if overrides.header_check {
            self.posting.header_check = true;
        }
        if overrides.no_nzb {
            self.nzb.enabled = false;
        }
        if let Some(dir) = overrides.nzb_dir {
            self.nzb.output_dir = Some(dir);
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }
}

/// Command-line configuration overrides
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub username: Option<String>,
    pub password: Option<String>,
    pub connections: Option<u16>,
    pub groups: Option<Vec<String>>,
    pub header_check: bool,
    pub no_nzb: bool,
    pub nzb_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}
