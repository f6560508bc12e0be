pub mod engine;
pub mod message;

pub use engine::PolicyEngine;
pub use message::{Message, QoS};
