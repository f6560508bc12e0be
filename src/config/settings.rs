use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::gate::{ANONYMOUS_CLIENT_ID, DEFAULT_STAMP_PREFIX, SENSOR_TOPIC};
use crate::persistence::{SaveMode, SavePolicy, WriterOptions};

/// Top-level configuration settings for the application.
///
/// Covers the credential check, retained message storage, logging and the
/// publish/subscribe rule lists.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub auth: AuthSettings,
    pub retained: RetainedSettings,
    pub logging: LoggingSettings,
    pub rules: RuleSettings,
}

/// The single identity/secret pair accepted by the connection gate.
#[derive(Deserialize, Clone)]
pub struct AuthSettings {
    pub identity: String,
    pub secret: String,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Sled,
}

impl StoreBackend {
    /// Record file for `file`, database directory for `sled`.
    pub fn default_path(self) -> PathBuf {
        match self {
            StoreBackend::File => PathBuf::from("RetainedMessages.json"),
            StoreBackend::Sled => PathBuf::from("retained_db"),
        }
    }
}

/// Where and how retained messages are persisted.
#[derive(Debug, Deserialize, Clone)]
pub struct RetainedSettings {
    pub backend: StoreBackend,
    /// Defaults to [`StoreBackend::default_path`] of the chosen backend.
    pub path: PathBuf,
    pub save_mode: SaveMode,
    pub save_attempts: u32,
    pub save_backoff_ms: u64,
    pub start_empty_on_corrupt: bool,
}

impl RetainedSettings {
    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            mode: self.save_mode,
            policy: SavePolicy {
                attempts: self.save_attempts.max(1),
                backoff: Duration::from_millis(self.save_backoff_ms),
            },
            start_empty_on_corrupt: self.start_empty_on_corrupt,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    /// Enables the daily rolling log file in this directory.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RuleSettings {
    #[serde(default)]
    pub publish: Vec<PublishRuleSettings>,
    #[serde(default)]
    pub subscribe: Vec<SubscribeRuleSettings>,
}

/// One publish rule as written in configuration.
///
/// The matcher fields that are present must all hold. `action` is one of
/// `reject`, `stamp_time` or `set_payload`.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct PublishRuleSettings {
    pub name: String,
    pub topic: Option<String>,
    pub topic_prefix: Option<String>,
    pub client_id: Option<String>,
    pub action: String,
    pub prefix: Option<String>,
    pub payload: Option<String>,
}

/// One subscription rule as written in configuration.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SubscribeRuleSettings {
    pub name: String,
    pub filter: Option<String>,
    pub filter_prefix: Option<String>,
    pub client_id: Option<String>,
    pub accept: Option<bool>,
    #[serde(default)]
    pub close_connection: bool,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub auth: Option<PartialAuthSettings>,
    pub retained: Option<PartialRetainedSettings>,
    pub logging: Option<PartialLoggingSettings>,
    pub rules: Option<PartialRuleSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialAuthSettings {
    pub identity: Option<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialRetainedSettings {
    pub backend: Option<StoreBackend>,
    pub path: Option<PathBuf>,
    pub save_mode: Option<SaveMode>,
    pub save_attempts: Option<u32>,
    pub save_backoff_ms: Option<u64>,
    pub start_empty_on_corrupt: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
    pub directory: Option<PathBuf>,
}

/// A list given here replaces the default list as a whole.
#[derive(Debug, Deserialize, Default)]
pub struct PartialRuleSettings {
    pub publish: Option<Vec<PublishRuleSettings>>,
    pub subscribe: Option<Vec<SubscribeRuleSettings>>,
}

/// Provides default values for `Settings`.
///
/// Matches the stock deployment: one fixed credential pair, a JSON record
/// in the working directory and the two built-in publish rules.
impl Default for Settings {
    fn default() -> Self {
        Self {
            auth: AuthSettings {
                identity: "anousone".to_string(),
                secret: "qwertyanousone".to_string(),
            },
            retained: RetainedSettings {
                backend: StoreBackend::File,
                path: StoreBackend::File.default_path(),
                save_mode: SaveMode::Sync,
                save_attempts: 3,
                save_backoff_ms: 50,
                start_empty_on_corrupt: false,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                directory: None,
            },
            rules: RuleSettings {
                publish: vec![
                    PublishRuleSettings {
                        name: "reject-anonymous".to_string(),
                        client_id: Some(ANONYMOUS_CLIENT_ID.to_string()),
                        action: "reject".to_string(),
                        ..Default::default()
                    },
                    PublishRuleSettings {
                        name: "stamp-wsm-sensor".to_string(),
                        topic: Some(SENSOR_TOPIC.to_string()),
                        action: "stamp_time".to_string(),
                        prefix: Some(DEFAULT_STAMP_PREFIX.to_string()),
                        ..Default::default()
                    },
                ],
                subscribe: Vec::new(),
            },
        }
    }
}
