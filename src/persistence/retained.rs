use std::collections::HashMap;
use std::collections::hash_map::{Entry, Values};

use crate::broker::message::Message;
use crate::utils::error::Result;

/// Last retained message per topic.
///
/// A message with an empty payload is never stored: merging one clears the
/// topic instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetainedSet {
    messages: HashMap<String, Message>,
}

impl RetainedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a retained publish. Returns true when the set changed.
    pub fn merge(&mut self, message: Message) -> bool {
        if message.has_empty_payload() {
            return self.messages.remove(&message.topic).is_some();
        }
        match self.messages.entry(message.topic.clone()) {
            Entry::Occupied(mut slot) => {
                if slot.get() == &message {
                    false
                } else {
                    slot.insert(message);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(message);
                true
            }
        }
    }

    pub fn remove(&mut self, topic: &str) -> Option<Message> {
        self.messages.remove(topic)
    }

    pub fn get(&self, topic: &str) -> Option<&Message> {
        self.messages.get(topic)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.messages.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> Values<'_, String, Message> {
        self.messages.values()
    }

    /// Topics in lexical order.
    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.messages.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }
}

impl FromIterator<Message> for RetainedSet {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        let mut set = RetainedSet::new();
        for message in iter {
            set.merge(message);
        }
        set
    }
}

impl<'a> IntoIterator for &'a RetainedSet {
    type Item = &'a Message;
    type IntoIter = Values<'a, String, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Durable home of the retained set.
///
/// `load` runs once at startup; `save_all` replaces the whole record and must
/// leave either the previous or the new content readable, never a mix.
pub trait RetainedStore: Send + Sync {
    /// Missing record yields an empty set; an unreadable one is `CorruptState`.
    fn load(&self) -> Result<RetainedSet>;

    fn save_all(&self, set: &RetainedSet) -> Result<()>;

    /// Human readable location for logs.
    fn describe(&self) -> String;
}
