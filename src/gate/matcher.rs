use std::fmt;
use std::sync::Arc;

use crate::broker::message::Message;
use crate::gate::subscription::SubscriptionRequest;

/// Something a rule can be matched against.
pub trait Subject {
    /// Topic for a publish, topic filter for a subscription.
    fn topic(&self) -> &str;
    fn client_id(&self) -> &str;
}

impl Subject for Message {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Subject for SubscriptionRequest {
    fn topic(&self) -> &str {
        &self.topic_filter
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }
}

pub type Predicate<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// Predicate half of a rule.
///
/// Topic comparisons are literal: `Topic` is string equality and
/// `TopicPrefix` a plain prefix test. Wildcard matching belongs to the broker
/// engine.
pub enum Matcher<S> {
    Any,
    Topic(String),
    TopicPrefix(String),
    ClientId(String),
    AllOf(Vec<Matcher<S>>),
    Custom(Predicate<S>),
}

impl<S: Subject> Matcher<S> {
    pub fn topic(topic: impl Into<String>) -> Self {
        Matcher::Topic(topic.into())
    }

    pub fn topic_prefix(prefix: impl Into<String>) -> Self {
        Matcher::TopicPrefix(prefix.into())
    }

    pub fn client_id(client_id: impl Into<String>) -> Self {
        Matcher::ClientId(client_id.into())
    }

    pub fn custom(predicate: impl Fn(&S) -> bool + Send + Sync + 'static) -> Self {
        Matcher::Custom(Arc::new(predicate))
    }

    /// Combine with another condition; both must hold.
    pub fn and(self, other: Matcher<S>) -> Self {
        match self {
            Matcher::AllOf(mut all) => {
                all.push(other);
                Matcher::AllOf(all)
            }
            Matcher::Any => other,
            first => Matcher::AllOf(vec![first, other]),
        }
    }

    pub fn matches(&self, subject: &S) -> bool {
        match self {
            Matcher::Any => true,
            Matcher::Topic(topic) => subject.topic() == topic,
            Matcher::TopicPrefix(prefix) => subject.topic().starts_with(prefix.as_str()),
            Matcher::ClientId(client_id) => subject.client_id() == client_id,
            Matcher::AllOf(all) => all.iter().all(|m| m.matches(subject)),
            Matcher::Custom(predicate) => predicate(subject),
        }
    }
}

impl<S> fmt::Debug for Matcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Any => f.write_str("Any"),
            Matcher::Topic(t) => f.debug_tuple("Topic").field(t).finish(),
            Matcher::TopicPrefix(p) => f.debug_tuple("TopicPrefix").field(p).finish(),
            Matcher::ClientId(c) => f.debug_tuple("ClientId").field(c).finish(),
            Matcher::AllOf(all) => f.debug_tuple("AllOf").field(all).finish(),
            Matcher::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
