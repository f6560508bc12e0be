//! Connection gate
//!
//! Decides whether a CONNECT is accepted before the broker engine sends its
//! CONNACK. The credential check itself is delegated to a
//! [`CredentialVerifier`] so deployments can swap the static pair for any
//! other source without touching the gate.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

/// A client secret. Never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct Secret(String);

impl Secret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison.
    pub fn matches(&self, other: &Secret) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub identity: String,
    pub secret: Secret,
}

impl Credential {
    pub fn new(identity: impl Into<String>, secret: impl Into<Secret>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionAttempt {
    pub client_id: String,
    pub endpoint: String,
    pub credential: Credential,
}

impl ConnectionAttempt {
    pub fn new(
        client_id: impl Into<String>,
        endpoint: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            endpoint: endpoint.into(),
            credential,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectDecision {
    Accepted,
    BadCredentials,
    OtherReject,
}

impl ConnectDecision {
    pub fn is_accepted(self) -> bool {
        self == ConnectDecision::Accepted
    }

    /// MQTT 5 CONNACK reason code.
    pub fn reason_code_v5(self) -> u8 {
        match self {
            ConnectDecision::Accepted => 0x00,
            ConnectDecision::BadCredentials => 0x86,
            ConnectDecision::OtherReject => 0x80,
        }
    }

    /// MQTT 3.1.1 CONNACK return code.
    pub fn return_code_v3(self) -> u8 {
        match self {
            ConnectDecision::Accepted => 0,
            ConnectDecision::BadCredentials => 4,
            ConnectDecision::OtherReject => 3,
        }
    }
}

/// Outcome of a credential lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialCheck {
    Valid,
    UnknownIdentity,
    WrongSecret,
    /// The verifier could not reach a verdict.
    Unavailable,
}

pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, credential: &Credential) -> CredentialCheck;

    /// Verifier name for logging
    fn name(&self) -> &str;
}

/// Fixed allow-list of identity/secret pairs, read-only after construction.
#[derive(Default)]
pub struct StaticCredentials {
    entries: HashMap<String, Secret>,
}

impl StaticCredentials {
    pub fn single(identity: impl Into<String>, secret: impl Into<Secret>) -> Self {
        Self::default().with(identity, secret)
    }

    pub fn with(mut self, identity: impl Into<String>, secret: impl Into<Secret>) -> Self {
        self.entries.insert(identity.into(), secret.into());
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialVerifier for StaticCredentials {
    fn verify(&self, credential: &Credential) -> CredentialCheck {
        // Identity first; the secret is only looked at for a known identity.
        let Some(expected) = self.entries.get(&credential.identity) else {
            return CredentialCheck::UnknownIdentity;
        };
        if expected.matches(&credential.secret) {
            CredentialCheck::Valid
        } else {
            CredentialCheck::WrongSecret
        }
    }

    fn name(&self) -> &str {
        "static"
    }
}

pub struct ConnectionGate {
    verifier: Arc<dyn CredentialVerifier>,
}

impl ConnectionGate {
    pub fn new(verifier: impl CredentialVerifier + 'static) -> Self {
        Self {
            verifier: Arc::new(verifier),
        }
    }

    pub fn with_verifier(verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self { verifier }
    }

    pub fn evaluate(&self, attempt: &ConnectionAttempt) -> ConnectDecision {
        info!(
            client_id = %attempt.client_id,
            endpoint = %attempt.endpoint,
            username = %attempt.credential.identity,
            "New connection"
        );

        let check = self.verifier.verify(&attempt.credential);
        let decision = match check {
            CredentialCheck::Valid => ConnectDecision::Accepted,
            CredentialCheck::UnknownIdentity | CredentialCheck::WrongSecret => {
                ConnectDecision::BadCredentials
            }
            CredentialCheck::Unavailable => ConnectDecision::OtherReject,
        };

        if decision.is_accepted() {
            debug!(client_id = %attempt.client_id, "Connection accepted");
        } else {
            warn!(
                client_id = %attempt.client_id,
                verifier = %self.verifier.name(),
                check = ?check,
                decision = ?decision,
                "Connection rejected"
            );
        }
        decision
    }
}

impl fmt::Debug for ConnectionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionGate")
            .field("verifier", &self.verifier.name())
            .finish()
    }
}
