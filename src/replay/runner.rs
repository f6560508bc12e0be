use std::borrow::Cow;
use std::io;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::broker::PolicyEngine;
use crate::broker::message::{Message, QoS};
use crate::gate::{ConnectionAttempt, Credential, SubscriptionRequest};
use crate::replay::event::{Event, Outcome};
use crate::utils::error::{Error, Result};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub events: usize,
    pub errors: usize,
    pub connects_rejected: usize,
    pub publishes_rejected: usize,
    pub subscriptions_rejected: usize,
}

impl ReplaySummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Connack { decision, .. } if !decision.is_accepted() => {
                self.connects_rejected += 1
            }
            Outcome::Publish { accepted: false, .. } => self.publishes_rejected += 1,
            Outcome::Suback { accepted: false, .. } => self.subscriptions_rejected += 1,
            Outcome::Error { .. } => self.errors += 1,
            _ => {}
        }
    }
}

/// Feeds one event through the engine the way a broker would.
pub fn handle_event(engine: &PolicyEngine, event: Event) -> Result<Outcome> {
    let outcome = match event {
        Event::Connect {
            client_id,
            endpoint,
            username,
            password,
        } => {
            let attempt =
                ConnectionAttempt::new(client_id.clone(), endpoint, Credential::new(username, password));
            let decision = engine.on_connect(&attempt);
            Outcome::Connack {
                client_id,
                decision,
                reason_code: decision.reason_code_v5(),
            }
        }
        Event::Publish {
            client_id,
            topic,
            payload,
            qos,
            retain,
        } => {
            let qos = QoS::try_from(qos)?;
            let message = match payload {
                Some(payload) => Message::new(client_id.clone(), topic.clone(), payload),
                None => Message::empty(client_id.clone(), topic.clone()),
            };
            let decision = engine.on_publish(message.with_qos(qos).retained(retain));
            Outcome::Publish {
                message_id: engine.messages_received(),
                client_id,
                topic,
                accepted: decision.accept,
                payload: decision.message.payload_text().map(Cow::into_owned),
                retained: decision.accept && decision.message.retain,
            }
        }
        Event::Subscribe { client_id, topic } => {
            let decision = engine.on_subscribe(&SubscriptionRequest::new(client_id.clone(), topic.clone()));
            Outcome::Suback {
                client_id,
                topic,
                accepted: decision.accept,
                close_connection: decision.close_connection,
            }
        }
    };
    Ok(outcome)
}

/// Decodes and handles one input line. Blank lines and `#` comments yield
/// nothing; undecodable lines become an error outcome.
pub fn handle_line(engine: &PolicyEngine, line_no: usize, line: &str) -> Option<Outcome> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let result = serde_json::from_str::<Event>(trimmed)
        .map_err(|e| e.to_string())
        .and_then(|event| handle_event(engine, event).map_err(|e| e.to_string()));

    Some(match result {
        Ok(outcome) => outcome,
        Err(error) => {
            warn!(line = line_no, error = %error, "Replay event skipped");
            Outcome::Error {
                line: line_no,
                error,
            }
        }
    })
}

/// Reads JSON-lines events from `input` and writes one JSON outcome line per
/// event to `output`.
///
/// Each event runs on the blocking pool, since a retained publish may wait on
/// the store. Dropping the returned future stops reading, but the event
/// already handed to the pool still completes.
pub async fn run<R, W>(engine: Arc<PolicyEngine>, input: R, mut output: W) -> Result<ReplaySummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut summary = ReplaySummary::default();
    let mut lines = input.lines();
    let mut line_no = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| Error::io("reading replay input", e))?
    {
        line_no += 1;
        let worker = engine.clone();
        let handled = tokio::task::spawn_blocking(move || handle_line(&worker, line_no, &line))
            .await
            .map_err(|e| Error::io("handling replay event", io::Error::other(e)))?;
        let Some(outcome) = handled else {
            continue;
        };
        summary.events += 1;
        summary.record(&outcome);

        let mut text = serde_json::to_string(&outcome)?;
        text.push('\n');
        output
            .write_all(text.as_bytes())
            .await
            .map_err(|e| Error::io("writing replay output", e))?;
    }

    output
        .flush()
        .await
        .map_err(|e| Error::io("writing replay output", e))?;
    debug!(?summary, "Replay finished");
    Ok(summary)
}
