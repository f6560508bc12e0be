//! Publish interception
//!
//! Every PUBLISH passes through [`PublishInterceptor::intercept`] before the
//! broker engine routes or retains it. The interceptor numbers and logs the
//! message, then walks its ordered rule list: a `Reject` rule vetoes the
//! publish and ends evaluation, a `Transform` rule rewrites the message and
//! lets evaluation continue with the rewritten copy.
//!
//! The rule list sits behind an `ArcSwap`. Evaluations load a snapshot, so
//! `replace_rules` never exposes a half-updated list to a concurrent publish.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use chrono::Local;
use tracing::{debug, info};

use crate::broker::message::Message;
use crate::gate::matcher::Matcher;

/// Layout of the timestamps written by [`Transform::StampTime`].
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Prefix the default sensor rule puts in front of the timestamp.
pub const DEFAULT_STAMP_PREFIX: &str = "DateTime: ";

/// Client id whose publishes the default rules veto.
pub const ANONYMOUS_CLIENT_ID: &str = "anonymous";

/// Topic whose payload the default rules replace with the broker's clock.
pub const SENSOR_TOPIC: &str = "wsm/sensor";

/// Process-wide publish sequence, used only to correlate log lines.
#[derive(Debug, Default)]
pub struct MessageCounter(AtomicU64);

impl MessageCounter {
    /// Increments and returns the new value. The first call returns 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

pub type TransformFn = Arc<dyn Fn(Message) -> Message + Send + Sync>;

pub enum Transform {
    /// Replace the payload with `prefix` followed by the current local time.
    StampTime { prefix: String },
    SetPayload(Vec<u8>),
    Custom(TransformFn),
}

impl Transform {
    pub fn apply(&self, mut message: Message) -> Message {
        match self {
            Transform::StampTime { prefix } => {
                message.payload = Some(stamp(prefix).into_bytes());
                message
            }
            Transform::SetPayload(payload) => {
                message.payload = Some(payload.clone());
                message
            }
            Transform::Custom(f) => {
                let topic = message.topic.clone();
                let client_id = message.client_id.clone();
                let mut out = f(message);
                // Only the payload and flags are rewritable.
                out.topic = topic;
                out.client_id = client_id;
                out
            }
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::StampTime { prefix } => {
                f.debug_struct("StampTime").field("prefix", prefix).finish()
            }
            Transform::SetPayload(p) => f.debug_tuple("SetPayload").field(&p.len()).finish(),
            Transform::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn stamp(prefix: &str) -> String {
    format!("{prefix}{}", Local::now().format(TIMESTAMP_FORMAT))
}

#[derive(Debug)]
pub enum PublishAction {
    Reject,
    Transform(Transform),
}

#[derive(Debug)]
pub struct PublishRule {
    pub name: String,
    pub matcher: Matcher<Message>,
    pub action: PublishAction,
}

impl PublishRule {
    pub fn new(name: impl Into<String>, matcher: Matcher<Message>, action: PublishAction) -> Self {
        Self {
            name: name.into(),
            matcher,
            action,
        }
    }

    pub fn reject(name: impl Into<String>, matcher: Matcher<Message>) -> Self {
        Self::new(name, matcher, PublishAction::Reject)
    }

    pub fn transform(name: impl Into<String>, matcher: Matcher<Message>, transform: Transform) -> Self {
        Self::new(name, matcher, PublishAction::Transform(transform))
    }

    pub fn transform_fn(
        name: impl Into<String>,
        matcher: Matcher<Message>,
        f: impl Fn(Message) -> Message + Send + Sync + 'static,
    ) -> Self {
        Self::transform(name, matcher, Transform::Custom(Arc::new(f)))
    }

    /// A rule whose condition is an arbitrary predicate over the message.
    pub fn predicate_fn(
        name: impl Into<String>,
        predicate: impl Fn(&Message) -> bool + Send + Sync + 'static,
        action: PublishAction,
    ) -> Self {
        Self::new(name, Matcher::custom(predicate), action)
    }
}

/// Rules of the stock deployment, in evaluation order: anonymous publishers
/// are vetoed first, then sensor readings get the broker's timestamp.
pub fn default_publish_rules() -> Vec<PublishRule> {
    vec![
        PublishRule::reject("reject-anonymous", Matcher::client_id(ANONYMOUS_CLIENT_ID)),
        PublishRule::transform(
            "stamp-wsm-sensor",
            Matcher::topic(SENSOR_TOPIC),
            Transform::StampTime {
                prefix: DEFAULT_STAMP_PREFIX.to_string(),
            },
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishDecision {
    pub accept: bool,
    pub message: Message,
}

impl PublishDecision {
    pub fn accept(message: Message) -> Self {
        Self {
            accept: true,
            message,
        }
    }

    pub fn reject(message: Message) -> Self {
        Self {
            accept: false,
            message,
        }
    }
}

pub struct PublishInterceptor {
    rules: ArcSwap<Vec<PublishRule>>,
    counter: MessageCounter,
}

impl PublishInterceptor {
    pub fn new(rules: Vec<PublishRule>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
            counter: MessageCounter::default(),
        }
    }

    /// Swap in a new rule list. In-flight evaluations finish on the old one.
    pub fn replace_rules(&self, rules: Vec<PublishRule>) {
        info!(count = rules.len(), "Replacing publish rules");
        self.rules.store(Arc::new(rules));
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules.load().iter().map(|r| r.name.clone()).collect()
    }

    pub fn counter(&self) -> &MessageCounter {
        &self.counter
    }

    pub fn intercept(&self, message: Message) -> PublishDecision {
        let seq = self.counter.next();
        info!(
            message_id = seq,
            timestamp = %Local::now().to_rfc3339(),
            client_id = %message.client_id,
            topic = %message.topic,
            payload = ?message.payload_text(),
            qos = message.qos.as_u8(),
            retain = message.retain,
            "Message received"
        );

        let rules = self.rules.load();
        let mut message = message;
        for rule in rules.iter() {
            if !rule.matcher.matches(&message) {
                continue;
            }
            match &rule.action {
                PublishAction::Reject => {
                    info!(
                        message_id = seq,
                        rule = %rule.name,
                        client_id = %message.client_id,
                        topic = %message.topic,
                        "Publish rejected"
                    );
                    return PublishDecision::reject(message);
                }
                PublishAction::Transform(transform) => {
                    message = transform.apply(message);
                    debug!(message_id = seq, rule = %rule.name, "Publish rewritten");
                }
            }
        }

        debug!(message_id = seq, "Publish accepted");
        PublishDecision::accept(message)
    }
}

impl Default for PublishInterceptor {
    fn default() -> Self {
        Self::new(default_publish_rules())
    }
}

impl fmt::Debug for PublishInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishInterceptor")
            .field("rules", &self.rule_names())
            .field("counter", &self.counter.current())
            .finish()
    }
}
