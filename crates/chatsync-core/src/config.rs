//! Configuration management
//!
//! 設定は以下の優先順位で読み込まれます:
//! 1. 環境変数
//! 2. chatsync.toml 設定ファイル
//! 3. デフォルト値
//!
//! 設定ファイル内では `${VAR_NAME}` 形式で環境変数を展開できます。

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::store::DEFAULT_STORAGE_KEY;
use crate::{Error, Result};

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "chatsync.toml";

/// Local (anonymous) store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Key the session collection is stored under
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            storage_key: default_storage_key(),
        }
    }
}

/// Remote store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    /// Base URL of the session service (remote features are off when unset)
    pub base_url: Option<String>,

    /// Bearer token supplied by the identity provider
    #[serde(skip_serializing)]
    pub api_token: Option<String>,

    /// Request timeout; expiry surfaces as a network error
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Move local sessions to the remote store on sign-in
    #[serde(default = "default_auto_migrate")]
    pub auto_migrate_on_sign_in: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_migrate_on_sign_in: default_auto_migrate(),
        }
    }
}

/// Main configuration for chatsync
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub local: LocalConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_db_path() -> String {
    "data/chatsync.db".to_string()
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_auto_migrate() -> bool {
    true
}

impl Config {
    /// 設定ファイルから環境変数を展開する
    ///
    /// `${VAR_NAME}` 形式の文字列を環境変数の値に置換します。
    /// 環境変数が存在しない場合は空文字列になります。
    fn expand_env_vars(value: &str) -> String {
        Self::expand_vars(value, |name| std::env::var(name).ok())
    }

    /// `${VAR_NAME}` を `lookup` の結果で置換する
    fn expand_vars(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
        let mut result = String::with_capacity(value.len());
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next(); // '{' を消費

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Some(var_value) = lookup(&var_name) {
                    result.push_str(&var_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// TOML 文字列から設定を読み込む (環境変数の展開あり、上書きなし)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Self::parse_toml(&Self::expand_env_vars(content))
    }

    fn parse_toml(expanded: &str) -> Result<Self> {
        toml::from_str(expanded).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// TOML 設定ファイルから設定を読み込む
    ///
    /// ファイルの値を読み込んだ後、環境変数で上書きします。
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// デフォルトパスから設定を読み込む
    ///
    /// `./chatsync.toml` があればそれを、なければ環境変数のみを使います。
    pub fn load() -> Result<Self> {
        if Path::new(CONFIG_FILE_NAME).exists() {
            return Self::from_toml_file(CONFIG_FILE_NAME);
        }
        Ok(Self::from_env())
    }

    /// 環境変数で設定を上書きする
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(path) = non_empty("CHATSYNC_DB_PATH") {
            self.local.db_path = path;
        }
        if let Some(key) = non_empty("CHATSYNC_STORAGE_KEY") {
            self.local.storage_key = key;
        }
        if let Some(url) = non_empty("CHATSYNC_REMOTE_URL") {
            self.remote.base_url = Some(url);
        }
        if let Some(token) = non_empty("CHATSYNC_API_TOKEN") {
            self.remote.api_token = Some(token);
        }
        if let Some(secs) = non_empty("CHATSYNC_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.remote.timeout_secs = secs;
        }
        if let Some(enabled) = non_empty("CHATSYNC_AUTO_MIGRATE") {
            self.sync.auto_migrate_on_sign_in = enabled.to_lowercase() != "false";
        }
    }

    /// Whether a remote store is configured
    pub fn remote_enabled(&self) -> bool {
        self.remote.base_url.is_some()
    }
}
