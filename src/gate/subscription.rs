use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tracing::{debug, info};

use crate::gate::matcher::Matcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub client_id: String,
    pub topic_filter: String,
}

impl SubscriptionRequest {
    pub fn new(client_id: impl Into<String>, topic_filter: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            topic_filter: topic_filter.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubscriptionDecision {
    pub accept: bool,
    pub close_connection: bool,
}

/// Permissive: subscriptions nobody objects to go through.
impl Default for SubscriptionDecision {
    fn default() -> Self {
        Self {
            accept: true,
            close_connection: false,
        }
    }
}

/// One entry of the subscription policy.
///
/// `accept` overrides the running decision when set; `close_connection`
/// ends evaluation and asks the engine to drop the client.
#[derive(Debug)]
pub struct SubscriptionRule {
    pub name: String,
    pub matcher: Matcher<SubscriptionRequest>,
    pub accept: Option<bool>,
    pub close_connection: bool,
}

impl SubscriptionRule {
    pub fn new(
        name: impl Into<String>,
        matcher: Matcher<SubscriptionRequest>,
        accept: Option<bool>,
        close_connection: bool,
    ) -> Self {
        Self {
            name: name.into(),
            matcher,
            accept,
            close_connection,
        }
    }

    pub fn allow(name: impl Into<String>, matcher: Matcher<SubscriptionRequest>) -> Self {
        Self::new(name, matcher, Some(true), false)
    }

    pub fn deny(name: impl Into<String>, matcher: Matcher<SubscriptionRequest>) -> Self {
        Self::new(name, matcher, Some(false), false)
    }

    pub fn deny_and_close(name: impl Into<String>, matcher: Matcher<SubscriptionRequest>) -> Self {
        Self::new(name, matcher, Some(false), true)
    }
}

pub struct SubscriptionGate {
    rules: ArcSwap<Vec<SubscriptionRule>>,
}

impl SubscriptionGate {
    pub fn new(rules: Vec<SubscriptionRule>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
        }
    }

    pub fn replace_rules(&self, rules: Vec<SubscriptionRule>) {
        info!(count = rules.len(), "Replacing subscription rules");
        self.rules.store(Arc::new(rules));
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules.load().iter().map(|r| r.name.clone()).collect()
    }

    pub fn evaluate(&self, request: &SubscriptionRequest) -> SubscriptionDecision {
        let rules = self.rules.load();
        let mut decision = SubscriptionDecision::default();

        for rule in rules.iter() {
            if !rule.matcher.matches(request) {
                continue;
            }
            debug!(
                rule = %rule.name,
                client_id = %request.client_id,
                topic_filter = %request.topic_filter,
                "Subscription rule matched"
            );
            if let Some(accept) = rule.accept {
                decision.accept = accept;
            }
            if rule.close_connection {
                decision.close_connection = true;
                break;
            }
        }

        info!(
            client_id = %request.client_id,
            topic_filter = %request.topic_filter,
            accept = decision.accept,
            close_connection = decision.close_connection,
            "Subscription evaluated"
        );
        decision
    }
}

impl Default for SubscriptionGate {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for SubscriptionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGate")
            .field("rules", &self.rule_names())
            .finish()
    }
}
