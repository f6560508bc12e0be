//! The `gate` module holds the three decision points the broker engine calls
//! synchronously: connection admission, publish interception and
//! subscription admission.
//!
//! All of them are pure functions of their input plus read-only policy, so
//! they can be invoked concurrently from any number of connection handlers.

pub mod connection;
pub mod matcher;
pub mod publish;
pub mod subscription;

pub use connection::{
    ConnectDecision, ConnectionAttempt, ConnectionGate, Credential, CredentialCheck,
    CredentialVerifier, Secret, StaticCredentials,
};
pub use matcher::{Matcher, Subject};
pub use publish::{
    ANONYMOUS_CLIENT_ID, DEFAULT_STAMP_PREFIX, MessageCounter, PublishAction, PublishDecision,
    PublishInterceptor, PublishRule, SENSOR_TOPIC, TIMESTAMP_FORMAT, Transform,
    default_publish_rules,
};
pub use subscription::{
    SubscriptionDecision, SubscriptionGate, SubscriptionRequest, SubscriptionRule,
};

#[cfg(test)]
mod tests;
