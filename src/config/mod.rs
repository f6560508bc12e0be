mod rules;
mod settings;

use std::path::Path;

use config::{Config, Environment, File};

use crate::config::settings::PartialSettings;
use crate::utils::error::Result;

pub use rules::{build_publish_rules, build_subscription_rules};
pub use settings::{
    AuthSettings, LoggingSettings, PublishRuleSettings, RetainedSettings, RuleSettings, Settings,
    StoreBackend, SubscribeRuleSettings,
};

/// File looked up when no other path is given. The extension is optional.
pub const DEFAULT_CONFIG_PATH: &str = "config/default";

/// Prefix of environment overrides, e.g. `MQGATE__RETAINED__PATH`.
pub const ENV_PREFIX: &str = "MQGATE";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct containing every section
pub fn load_config() -> Result<Settings> {
    load_config_from(DEFAULT_CONFIG_PATH)
}

/// Same as [`load_config`], reading the optional file at `path` instead.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref().to_string_lossy().into_owned();
    let builder = Config::builder()
        .add_source(File::with_name(&path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    Ok(merge(partial, Settings::default()))
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let auth = partial.auth.unwrap_or_default();
    let retained = partial.retained.unwrap_or_default();
    let logging = partial.logging.unwrap_or_default();
    let rules = partial.rules.unwrap_or_default();
    let backend = retained.backend.unwrap_or(default.retained.backend);

    Settings {
        auth: AuthSettings {
            identity: auth.identity.unwrap_or(default.auth.identity),
            secret: auth.secret.unwrap_or(default.auth.secret),
        },
        retained: RetainedSettings {
            backend,
            path: retained.path.unwrap_or_else(|| backend.default_path()),
            save_mode: retained.save_mode.unwrap_or(default.retained.save_mode),
            save_attempts: retained
                .save_attempts
                .unwrap_or(default.retained.save_attempts),
            save_backoff_ms: retained
                .save_backoff_ms
                .unwrap_or(default.retained.save_backoff_ms),
            start_empty_on_corrupt: retained
                .start_empty_on_corrupt
                .unwrap_or(default.retained.start_empty_on_corrupt),
        },
        logging: LoggingSettings {
            level: logging.level.unwrap_or(default.logging.level),
            directory: logging.directory.or(default.logging.directory),
        },
        rules: RuleSettings {
            publish: rules.publish.unwrap_or(default.rules.publish),
            subscribe: rules.subscribe.unwrap_or(default.rules.subscribe),
        },
    }
}

#[cfg(test)]
mod tests;
