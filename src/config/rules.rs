//! Turns the rule lists from configuration into gate rules.

use crate::broker::message::Message;
use crate::config::settings::{PublishRuleSettings, SubscribeRuleSettings};
use crate::gate::{
    DEFAULT_STAMP_PREFIX, Matcher, PublishRule, Subject, SubscriptionRequest, SubscriptionRule,
    Transform,
};
use crate::utils::error::{Error, Result};

fn matcher_from<S: Subject>(
    name: &str,
    exact: Option<&str>,
    prefix: Option<&str>,
    client_id: Option<&str>,
) -> Result<Matcher<S>> {
    let mut matcher = Matcher::Any;
    if let Some(topic) = exact {
        matcher = matcher.and(Matcher::topic(topic));
    }
    if let Some(prefix) = prefix {
        matcher = matcher.and(Matcher::topic_prefix(prefix));
    }
    if let Some(client_id) = client_id {
        matcher = matcher.and(Matcher::client_id(client_id));
    }
    if matches!(matcher, Matcher::Any) {
        return Err(Error::InvalidConfig(format!(
            "rule {name:?} has no condition; set a topic, a prefix or a client_id"
        )));
    }
    Ok(matcher)
}

fn check_name(name: &str, index: usize, list: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidConfig(format!(
            "rules.{list}[{index}] needs a name"
        )));
    }
    Ok(())
}

pub fn build_publish_rules(entries: &[PublishRuleSettings]) -> Result<Vec<PublishRule>> {
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            check_name(&entry.name, index, "publish")?;
            let matcher: Matcher<Message> = matcher_from(
                &entry.name,
                entry.topic.as_deref(),
                entry.topic_prefix.as_deref(),
                entry.client_id.as_deref(),
            )?;

            let rule = match entry.action.trim().to_lowercase().as_str() {
                "reject" => PublishRule::reject(&entry.name, matcher),
                "stamp_time" => PublishRule::transform(
                    &entry.name,
                    matcher,
                    Transform::StampTime {
                        prefix: entry
                            .prefix
                            .clone()
                            .unwrap_or_else(|| DEFAULT_STAMP_PREFIX.to_string()),
                    },
                ),
                "set_payload" => {
                    let payload = entry.payload.as_ref().ok_or_else(|| {
                        Error::InvalidConfig(format!(
                            "rule {:?} uses set_payload without a payload",
                            entry.name
                        ))
                    })?;
                    PublishRule::transform(
                        &entry.name,
                        matcher,
                        Transform::SetPayload(payload.clone().into_bytes()),
                    )
                }
                other => {
                    return Err(Error::InvalidConfig(format!(
                        "rule {:?} has unknown action {other:?}; expected reject, stamp_time or set_payload",
                        entry.name
                    )));
                }
            };
            Ok(rule)
        })
        .collect()
}

pub fn build_subscription_rules(
    entries: &[SubscribeRuleSettings],
) -> Result<Vec<SubscriptionRule>> {
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            check_name(&entry.name, index, "subscribe")?;
            let matcher: Matcher<SubscriptionRequest> = matcher_from(
                &entry.name,
                entry.filter.as_deref(),
                entry.filter_prefix.as_deref(),
                entry.client_id.as_deref(),
            )?;
            if entry.accept.is_none() && !entry.close_connection {
                return Err(Error::InvalidConfig(format!(
                    "rule {:?} neither sets accept nor closes the connection",
                    entry.name
                )));
            }
            Ok(SubscriptionRule::new(
                &entry.name,
                matcher,
                entry.accept,
                entry.close_connection,
            ))
        })
        .collect()
}
