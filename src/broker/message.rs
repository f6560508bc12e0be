//! Message definitions shared with the broker engine.
//!
//! `Message` is the in-flight PUBLISH as this layer sees it. The engine hands
//! it to the publish interceptor, gets it back (possibly with a new payload)
//! and owns it from then on.
//!
//! Notes on fields:
//! - `client_id`: the publishing client
//! - `topic`: topic name used for routing; never changed by interception
//! - `payload`: raw bytes, `None` when the packet carried no payload
//! - `qos`: delivery level carried through unchanged
//! - `retain`: whether the engine should keep this as the topic's retained message

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::error::{Error, Result};

/// MQTT delivery guarantee. Opaque to the policy layer beyond being carried
/// along and persisted with retained messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(Error::InvalidQos(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> u8 {
        qos.as_u8()
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub client_id: String,
    pub topic: String,
    pub payload: Option<Vec<u8>>,
    pub qos: QoS,
    pub retain: bool,
}

impl Message {
    pub fn new(
        client_id: impl Into<String>,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            topic: topic.into(),
            payload: Some(payload.into()),
            qos: QoS::default(),
            retain: false,
        }
    }

    /// A message without any payload bytes.
    pub fn empty(client_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            topic: topic.into(),
            payload: None,
            qos: QoS::default(),
            retain: false,
        }
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn retained(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// True when there is no payload or it is zero length. A retained
    /// message like this clears the topic's retained entry.
    pub fn has_empty_payload(&self) -> bool {
        self.payload.as_ref().is_none_or(|p| p.is_empty())
    }

    /// Best-effort UTF-8 view of the payload for logs and reports.
    ///
    /// Binary payloads are replaced by a placeholder instead of failing.
    pub fn payload_text(&self) -> Option<Cow<'_, str>> {
        let bytes = self.payload.as_deref()?;
        Some(match std::str::from_utf8(bytes) {
            Ok(text) => Cow::Borrowed(text),
            Err(_) => Cow::Owned(format!("<binary {} bytes>", bytes.len())),
        })
    }
}
