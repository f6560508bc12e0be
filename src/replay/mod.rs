//! The `replay` module drives a [`PolicyEngine`](crate::broker::PolicyEngine)
//! from a JSON-lines script instead of live MQTT traffic, so policy and
//! retained persistence can be dry-run without a broker.
//!
//! Input lines look like:
//!
//! ```text
//! {"type":"connect","client_id":"c1","username":"anousone","password":"qwertyanousone"}
//! {"type":"publish","client_id":"device1","topic":"wsm/sensor","payload":"21.5","retain":true}
//! {"type":"subscribe","client_id":"c1","topic":"wsm/#"}
//! ```

pub mod event;
pub mod runner;

pub use event::{Event, Outcome};
pub use runner::{ReplaySummary, handle_event, handle_line, run};
