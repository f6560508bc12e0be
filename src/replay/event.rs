use serde::{Deserialize, Serialize};

use crate::gate::{ConnectDecision, Secret};

fn default_endpoint() -> String {
    "replay".to_string()
}

/// One line of a replay script.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "connect")]
    Connect {
        client_id: String,
        #[serde(default = "default_endpoint")]
        endpoint: String,
        username: String,
        password: Secret,
    },

    #[serde(rename = "publish")]
    Publish {
        client_id: String,
        topic: String,
        /// Absent or empty clears the retained message when `retain` is set.
        #[serde(default)]
        payload: Option<String>,
        #[serde(default)]
        qos: u8,
        #[serde(default)]
        retain: bool,
    },

    #[serde(rename = "subscribe")]
    Subscribe { client_id: String, topic: String },
}

/// The decision printed for each event.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Outcome {
    #[serde(rename = "connack")]
    Connack {
        client_id: String,
        decision: ConnectDecision,
        reason_code: u8,
    },

    #[serde(rename = "publish")]
    Publish {
        message_id: u64,
        client_id: String,
        topic: String,
        accepted: bool,
        payload: Option<String>,
        retained: bool,
    },

    #[serde(rename = "suback")]
    Suback {
        client_id: String,
        topic: String,
        accepted: bool,
        close_connection: bool,
    },

    #[serde(rename = "error")]
    Error { line: usize, error: String },
}
