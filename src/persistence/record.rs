//! On-disk representation of the retained set.
//!
//! The record is one JSON document:
//!
//! ```json
//! {"schema":"mqgate/retained","version":1,"saved_at":"2026-10-18T09:30:00Z",
//!  "messages":[{"client_id":"device1","topic":"wsm/sensor",
//!               "payload":"RGF0ZVRpbWU6IC4uLg==","qos":0,"retain":true}]}
//! ```
//!
//! Payloads are base64 so binary content survives. Unknown fields are
//! ignored, which lets older binaries read records written by newer ones as
//! long as the version number has not moved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::message::{Message, QoS};
use crate::persistence::retained::RetainedSet;
use crate::utils::error::{Error, Result};

pub const SCHEMA: &str = "mqgate/retained";
pub const VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug)]
struct RetainedRecord {
    schema: String,
    version: u32,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    messages: Vec<StoredMessage>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredMessage {
    pub client_id: String,
    pub topic: String,
    #[serde(default, with = "base64_payload")]
    pub payload: Option<Vec<u8>>,
    #[serde(default)]
    pub qos: u8,
    #[serde(default = "default_retain")]
    pub retain: bool,
}

fn default_retain() -> bool {
    true
}

impl From<&Message> for StoredMessage {
    fn from(message: &Message) -> Self {
        Self {
            client_id: message.client_id.clone(),
            topic: message.topic.clone(),
            payload: message.payload.clone(),
            qos: message.qos.as_u8(),
            retain: message.retain,
        }
    }
}

impl TryFrom<StoredMessage> for Message {
    type Error = Error;

    fn try_from(stored: StoredMessage) -> Result<Self> {
        Ok(Message {
            qos: QoS::try_from(stored.qos)?,
            client_id: stored.client_id,
            topic: stored.topic,
            payload: stored.payload,
            retain: stored.retain,
        })
    }
}

mod base64_payload {
    use base64::prelude::{BASE64_STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match payload {
            Some(bytes) => s.serialize_some(&BASE64_STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|text| BASE64_STANDARD.decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

fn to_record(set: &RetainedSet) -> RetainedRecord {
    // Sorted so identical sets produce identical bytes.
    let mut messages: Vec<StoredMessage> = set.iter().map(StoredMessage::from).collect();
    messages.sort_by(|a, b| a.topic.cmp(&b.topic));
    RetainedRecord {
        schema: SCHEMA.to_string(),
        version: VERSION,
        saved_at: Some(Utc::now()),
        messages,
    }
}

pub fn encode(set: &RetainedSet) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&to_record(set))?)
}

pub fn encode_pretty(set: &RetainedSet) -> Result<String> {
    Ok(serde_json::to_string_pretty(&to_record(set))?)
}

/// Parses a record. `location` only feeds error messages.
pub fn decode(bytes: &[u8], location: &str) -> Result<RetainedSet> {
    let record: RetainedRecord =
        serde_json::from_slice(bytes).map_err(|e| Error::corrupt(location, e.to_string()))?;

    if record.schema != SCHEMA {
        return Err(Error::corrupt(
            location,
            format!("unexpected schema {:?}", record.schema),
        ));
    }
    if record.version == 0 || record.version > VERSION {
        return Err(Error::corrupt(
            location,
            format!(
                "unsupported version {} (this build reads up to {VERSION})",
                record.version
            ),
        ));
    }

    let mut set = RetainedSet::new();
    for stored in record.messages {
        let topic = stored.topic.clone();
        let message = Message::try_from(stored)
            .map_err(|e| Error::corrupt(location, format!("topic {topic}: {e}")))?;
        set.merge(message);
    }
    Ok(set)
}
