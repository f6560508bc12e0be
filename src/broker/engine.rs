use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::broker::message::Message;
use crate::config::{Settings, build_publish_rules, build_subscription_rules};
use crate::gate::{
    ConnectDecision, ConnectionAttempt, ConnectionGate, PublishDecision, PublishInterceptor,
    StaticCredentials, SubscriptionDecision, SubscriptionGate, SubscriptionRequest,
};
use crate::persistence::{
    DurabilityStatus, RetainUpdate, RetainedSet, RetainedStore, RetainedWriter, WriterOptions,
    open_store,
};
use crate::utils::error::Result;

/// The policy layer a broker engine calls into.
///
/// Bundles the connection gate, the publish interceptor and the subscription
/// gate with the retained message writer. The engine calls `on_connect`
/// before answering CONNACK, `on_publish` for every PUBLISH before fan-out
/// and `on_subscribe` once per topic filter of a SUBSCRIBE.
///
/// Every method takes `&self`, so one engine can be shared behind an `Arc`
/// by all connection handlers.
#[derive(Debug)]
pub struct PolicyEngine {
    connections: ConnectionGate,
    publishes: PublishInterceptor,
    subscriptions: SubscriptionGate,
    retained: RetainedWriter,
}

impl PolicyEngine {
    /// Loads the retained store and assembles the engine.
    ///
    /// Must complete before the broker accepts connections. A corrupt
    /// retained record fails startup unless the writer options allow
    /// starting empty.
    pub fn start(
        connections: ConnectionGate,
        publishes: PublishInterceptor,
        subscriptions: SubscriptionGate,
        store: Arc<dyn RetainedStore>,
        options: WriterOptions,
    ) -> Result<Self> {
        let retained = RetainedWriter::open(store, options)?;
        info!(
            publish_rules = ?publishes.rule_names(),
            subscription_rules = ?subscriptions.rule_names(),
            retained = retained.len(),
            save_mode = ?retained.mode(),
            "Policy engine started"
        );
        Ok(Self {
            connections,
            publishes,
            subscriptions,
            retained,
        })
    }

    /// Builds every part from configuration.
    ///
    /// Rule lists are validated first, so a bad rule is reported before the
    /// store is touched.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let publish_rules = build_publish_rules(&settings.rules.publish)?;
        let subscription_rules = build_subscription_rules(&settings.rules.subscribe)?;
        let verifier = StaticCredentials::single(
            settings.auth.identity.clone(),
            settings.auth.secret.clone(),
        );
        let store = open_store(&settings.retained)?;

        Self::start(
            ConnectionGate::new(verifier),
            PublishInterceptor::new(publish_rules),
            SubscriptionGate::new(subscription_rules),
            store,
            settings.retained.writer_options(),
        )
    }

    pub fn on_connect(&self, attempt: &ConnectionAttempt) -> ConnectDecision {
        self.connections.evaluate(attempt)
    }

    /// Runs the publish rules, then records the result as the topic's
    /// retained message when it was accepted with the retain flag.
    ///
    /// In `Sync` save mode the record is on disk (or durability is marked
    /// degraded) by the time this returns.
    pub fn on_publish(&self, message: Message) -> PublishDecision {
        let decision = self.publishes.intercept(message);
        if !decision.accept || !decision.message.retain {
            return decision;
        }

        let topic = decision.message.topic.clone();
        let clears = decision.message.has_empty_payload();
        match self.retained.merge(decision.message.clone()) {
            RetainUpdate::Degraded => {
                warn!(topic = %topic, "Retained message not persisted, kept in memory");
            }
            update => {
                debug!(topic = %topic, cleared = clears, update = ?update, "Retained message updated");
            }
        }
        decision
    }

    pub fn on_subscribe(&self, request: &SubscriptionRequest) -> SubscriptionDecision {
        self.subscriptions.evaluate(request)
    }

    /// The retained message to deliver for `topic`, if any.
    pub fn retained_for(&self, topic: &str) -> Option<Message> {
        self.retained.get(topic)
    }

    pub fn retained_snapshot(&self) -> RetainedSet {
        self.retained.snapshot()
    }

    /// Drops the retained message of `topic` outside the publish path.
    pub fn purge_retained(&self, topic: &str) -> RetainUpdate {
        let update = self.retained.remove(topic);
        if update != RetainUpdate::Unchanged {
            info!(topic = %topic, "Retained message purged");
        }
        update
    }

    pub fn durability(&self) -> DurabilityStatus {
        self.retained.status()
    }

    /// Number of publishes seen since startup.
    pub fn messages_received(&self) -> u64 {
        self.publishes.counter().current()
    }

    pub fn connections(&self) -> &ConnectionGate {
        &self.connections
    }

    pub fn publishes(&self) -> &PublishInterceptor {
        &self.publishes
    }

    pub fn subscriptions(&self) -> &SubscriptionGate {
        &self.subscriptions
    }

    /// Waits for pending saves and stops the background writer.
    pub fn shutdown(&self) {
        self.retained.flush();
        self.retained.close();
        let status = self.retained.status();
        if status.degraded {
            warn!(
                failed_saves = status.failed_saves,
                last_error = ?status.last_error,
                "Shut down with retained state not fully persisted"
            );
        } else {
            info!(retained = self.retained.len(), "Policy engine shut down");
        }
    }
}
