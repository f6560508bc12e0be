//! # mqgate
//!
//! `mqgate` is the policy and persistence layer of an MQTT broker. The broker
//! engine keeps the network side (sessions, routing, fan-out) and calls into
//! this crate at three points: when a client connects, when a message is
//! published and when a client subscribes. Retained messages are kept in
//! memory and written through to a durable store on every change.
//!
//! ## Core Modules
//!
//! - `broker`: The `PolicyEngine` entry point and the message type it works on.
//! - `gate`: Connection admission, publish interception and subscription admission.
//! - `persistence`: The retained message set, its record format and the file and sled stores.
//! - `config`: Layered configuration from file and environment, and rule building.
//! - `replay`: Drives the engine from a JSON-lines script for dry runs.
//! - `utils`: Shared error type and logging setup.

pub mod broker;
pub mod config;
pub mod gate;
pub mod persistence;
pub mod replay;
pub mod utils;

pub use utils::error::{Error, Result};
