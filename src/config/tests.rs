use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;
use tempfile::tempdir;

use super::settings::Settings;
use super::{
    PublishRuleSettings, StoreBackend, SubscribeRuleSettings, build_publish_rules,
    build_subscription_rules, load_config_from,
};
use crate::broker::message::Message;
use crate::gate::{PublishInterceptor, SubscriptionGate, SubscriptionRequest};
use crate::persistence::SaveMode;
use crate::utils::error::Error;

const OVERRIDES: [(&str, Option<&str>); 4] = [
    ("MQGATE__AUTH__IDENTITY", None),
    ("MQGATE__RETAINED__SAVE_MODE", None),
    ("MQGATE__RETAINED__SAVE_ATTEMPTS", None),
    ("MQGATE__LOGGING__LEVEL", None),
];

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.auth.identity, "anousone");
    assert_eq!(settings.auth.secret, "qwertyanousone");
    assert_eq!(settings.retained.backend, StoreBackend::File);
    assert_eq!(settings.retained.path, PathBuf::from("RetainedMessages.json"));
    assert_eq!(settings.retained.save_mode, SaveMode::Sync);
    assert_eq!(settings.retained.save_attempts, 3);
    assert_eq!(settings.retained.save_backoff_ms, 50);
    assert!(!settings.retained.start_empty_on_corrupt);
    assert_eq!(settings.logging.level, "info");
    assert!(settings.logging.directory.is_none());
    assert_eq!(settings.rules.publish.len(), 2);
    assert!(settings.rules.subscribe.is_empty());
}

#[test]
fn test_auth_debug_hides_secret() {
    let settings = Settings::default();
    let printed = format!("{settings:?}");
    assert!(printed.contains("anousone"));
    assert!(!printed.contains("qwertyanousone"));
}

#[test]
fn test_writer_options_from_settings() {
    let mut settings = Settings::default();
    settings.retained.save_mode = SaveMode::Deferred;
    settings.retained.save_attempts = 0;
    settings.retained.save_backoff_ms = 10;

    let options = settings.retained.writer_options();
    assert_eq!(options.mode, SaveMode::Deferred);
    assert_eq!(options.policy.attempts, 1);
    assert_eq!(options.policy.backoff, Duration::from_millis(10));
    assert!(!options.start_empty_on_corrupt);
}

#[test]
#[serial]
fn test_missing_file_gives_defaults() {
    let dir = tempdir().unwrap();
    temp_env::with_vars(OVERRIDES, || {
        let settings = load_config_from(dir.path().join("absent")).unwrap();
        assert_eq!(settings.auth.identity, "anousone");
        assert_eq!(settings.retained.save_mode, SaveMode::Sync);
        assert_eq!(settings.rules.publish, Settings::default().rules.publish);
    });
}

#[test]
#[serial]
fn test_file_overrides_some_values() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mqgate.toml");
    fs::write(
        &path,
        r#"
[retained]
backend = "sled"
path = "state/retained_db"
save_mode = "deferred"

[logging]
level = "debug"

[[rules.subscribe]]
name = "no-hackers"
filter_prefix = "hack"
client_id = "hacker"
accept = false
close_connection = true
"#,
    )
    .unwrap();

    temp_env::with_vars(OVERRIDES, || {
        let settings = load_config_from(&path).unwrap();
        assert_eq!(settings.retained.backend, StoreBackend::Sled);
        assert_eq!(settings.retained.path, PathBuf::from("state/retained_db"));
        assert_eq!(settings.retained.save_mode, SaveMode::Deferred);
        // Untouched values keep their defaults.
        assert_eq!(settings.retained.save_attempts, 3);
        assert_eq!(settings.auth.identity, "anousone");
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.rules.publish.len(), 2);
        assert_eq!(
            settings.rules.subscribe,
            vec![SubscribeRuleSettings {
                name: "no-hackers".to_string(),
                filter_prefix: Some("hack".to_string()),
                client_id: Some("hacker".to_string()),
                accept: Some(false),
                close_connection: true,
                ..Default::default()
            }]
        );
    });
}

#[test]
#[serial]
fn test_sled_backend_gets_its_own_default_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mqgate.toml");
    fs::write(&path, "[retained]\nbackend = \"sled\"\n").unwrap();

    temp_env::with_vars(OVERRIDES, || {
        let settings = load_config_from(&path).unwrap();
        assert_eq!(settings.retained.backend, StoreBackend::Sled);
        assert_eq!(settings.retained.path, PathBuf::from("retained_db"));
    });

    // An explicit path still wins.
    fs::write(&path, "[retained]\nbackend = \"sled\"\npath = \"state/db\"\n").unwrap();
    temp_env::with_vars(OVERRIDES, || {
        let settings = load_config_from(&path).unwrap();
        assert_eq!(settings.retained.path, PathBuf::from("state/db"));
    });
}

#[test]
#[serial]
fn test_file_rule_list_replaces_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mqgate.toml");
    fs::write(
        &path,
        r#"
[[rules.publish]]
name = "mask-secrets"
topic_prefix = "secret/"
action = "set_payload"
payload = "***"
"#,
    )
    .unwrap();

    temp_env::with_vars(OVERRIDES, || {
        let settings = load_config_from(&path).unwrap();
        assert_eq!(settings.rules.publish.len(), 1);
        assert_eq!(settings.rules.publish[0].name, "mask-secrets");
        assert_eq!(settings.rules.publish[0].payload.as_deref(), Some("***"));
    });
}

#[test]
#[serial]
fn test_env_overrides_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mqgate.toml");
    fs::write(&path, "[auth]\nidentity = \"from-file\"\n").unwrap();

    temp_env::with_vars(
        [
            ("MQGATE__AUTH__IDENTITY", Some("from-env")),
            ("MQGATE__RETAINED__SAVE_MODE", Some("deferred")),
            ("MQGATE__RETAINED__SAVE_ATTEMPTS", Some("5")),
            ("MQGATE__LOGGING__LEVEL", None),
        ],
        || {
            let settings = load_config_from(&path).unwrap();
            assert_eq!(settings.auth.identity, "from-env");
            assert_eq!(settings.auth.secret, "qwertyanousone");
            assert_eq!(settings.retained.save_mode, SaveMode::Deferred);
            assert_eq!(settings.retained.save_attempts, 5);
        },
    );
}

#[test]
#[serial]
fn test_unknown_backend_is_config_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mqgate.toml");
    fs::write(&path, "[retained]\nbackend = \"postgres\"\n").unwrap();

    temp_env::with_vars(OVERRIDES, || {
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    });
}

#[test]
fn test_default_rules_build_in_order() {
    let rules = build_publish_rules(&Settings::default().rules.publish).unwrap();
    let interceptor = PublishInterceptor::new(rules);
    assert_eq!(
        interceptor.rule_names(),
        vec!["reject-anonymous", "stamp-wsm-sensor"]
    );

    let decision = interceptor.intercept(Message::new("device1", "wsm/sensor", "raw"));
    assert!(decision.accept);
    let text = decision.message.payload_text().unwrap().into_owned();
    assert!(text.starts_with("DateTime: "), "{text}");

    let decision = interceptor.intercept(Message::new("anonymous", "wsm/sensor", "raw"));
    assert!(!decision.accept);
}

#[test]
fn test_set_payload_rule() {
    let rules = build_publish_rules(&[PublishRuleSettings {
        name: "mask".to_string(),
        topic_prefix: Some("secret/".to_string()),
        action: "set_payload".to_string(),
        payload: Some("***".to_string()),
        ..Default::default()
    }])
    .unwrap();
    let interceptor = PublishInterceptor::new(rules);

    let masked = interceptor.intercept(Message::new("d", "secret/pin", "1234"));
    assert_eq!(masked.message.payload.as_deref(), Some(&b"***"[..]));
    let plain = interceptor.intercept(Message::new("d", "public/pin", "1234"));
    assert_eq!(plain.message.payload.as_deref(), Some(&b"1234"[..]));
}

#[test]
fn test_invalid_publish_rules() {
    let no_condition = PublishRuleSettings {
        name: "everything".to_string(),
        action: "reject".to_string(),
        ..Default::default()
    };
    let unknown_action = PublishRuleSettings {
        name: "odd".to_string(),
        topic: Some("t".to_string()),
        action: "explode".to_string(),
        ..Default::default()
    };
    let missing_payload = PublishRuleSettings {
        name: "blank".to_string(),
        topic: Some("t".to_string()),
        action: "set_payload".to_string(),
        ..Default::default()
    };
    let unnamed = PublishRuleSettings {
        topic: Some("t".to_string()),
        action: "reject".to_string(),
        ..Default::default()
    };

    for entry in [no_condition, unknown_action, missing_payload, unnamed] {
        let err = build_publish_rules(&[entry.clone()]).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "{entry:?}: {err}");
    }
}

#[test]
fn test_subscription_rules_from_settings() {
    let rules = build_subscription_rules(&[SubscribeRuleSettings {
        name: "no-hackers".to_string(),
        filter_prefix: Some("hack".to_string()),
        client_id: Some("hacker".to_string()),
        accept: Some(false),
        close_connection: true,
        ..Default::default()
    }])
    .unwrap();
    let gate = SubscriptionGate::new(rules);

    let decision = gate.evaluate(&SubscriptionRequest::new("hacker", "hack/all"));
    assert!(!decision.accept);
    assert!(decision.close_connection);

    let decision = gate.evaluate(&SubscriptionRequest::new("device1", "hack/all"));
    assert!(decision.accept);
    assert!(!decision.close_connection);
}

#[test]
fn test_invalid_subscription_rules() {
    let no_effect = SubscribeRuleSettings {
        name: "noop".to_string(),
        filter: Some("t".to_string()),
        ..Default::default()
    };
    let no_condition = SubscribeRuleSettings {
        name: "all".to_string(),
        accept: Some(false),
        ..Default::default()
    };

    for entry in [no_effect, no_condition] {
        let err = build_subscription_rules(&[entry.clone()]).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "{entry:?}: {err}");
    }
}
