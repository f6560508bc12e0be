use std::sync::Arc;
use std::thread;

use chrono::{Local, NaiveDateTime};

use super::publish::{DEFAULT_STAMP_PREFIX, TIMESTAMP_FORMAT};
use super::*;
use crate::broker::message::{Message, QoS};

fn gate() -> ConnectionGate {
    ConnectionGate::new(StaticCredentials::single("anousone", "qwertyanousone"))
}

fn attempt(identity: &str, secret: &str) -> ConnectionAttempt {
    ConnectionAttempt::new("client-1", "127.0.0.1:50123", Credential::new(identity, secret))
}

fn assert_fresh_stamp(payload: &[u8]) {
    let text = std::str::from_utf8(payload).expect("stamp is utf-8");
    let stamp = text
        .strip_prefix(DEFAULT_STAMP_PREFIX)
        .unwrap_or_else(|| panic!("missing prefix in {text:?}"));
    let parsed = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .unwrap_or_else(|e| panic!("unparseable stamp {stamp:?}: {e}"));
    let age = Local::now().naive_local() - parsed;
    assert!(age.num_seconds().abs() < 5, "stamp {stamp} is not fresh");
}

#[test]
fn test_connect_with_configured_credentials_is_accepted() {
    let decision = gate().evaluate(&attempt("anousone", "qwertyanousone"));
    assert_eq!(decision, ConnectDecision::Accepted);
    assert!(decision.is_accepted());
}

#[test]
fn test_connect_with_wrong_secret_is_bad_credentials() {
    let decision = gate().evaluate(&attempt("anousone", "wrong"));
    assert_eq!(decision, ConnectDecision::BadCredentials);
}

#[test]
fn test_connect_accepted_only_when_both_fields_match() {
    let gate = gate();
    let identities = ["anousone", "admin", "", "ANOUSONE", "anousone "];
    let secrets = ["qwertyanousone", "wrong", "", "qwertyanousone\0", "QWERTYANOUSONE"];

    for identity in identities {
        for secret in secrets {
            let decision = gate.evaluate(&attempt(identity, secret));
            let expected = if identity == "anousone" && secret == "qwertyanousone" {
                ConnectDecision::Accepted
            } else {
                ConnectDecision::BadCredentials
            };
            assert_eq!(decision, expected, "identity={identity:?} secret={secret:?}");
        }
    }
}

#[test]
fn test_unknown_identity_never_reaches_secret_check() {
    let verifier = StaticCredentials::single("anousone", "qwertyanousone");
    assert_eq!(
        verifier.verify(&Credential::new("intruder", "qwertyanousone")),
        CredentialCheck::UnknownIdentity
    );
    assert_eq!(
        verifier.verify(&Credential::new("anousone", "nope")),
        CredentialCheck::WrongSecret
    );
}

#[test]
fn test_static_credentials_can_hold_several_pairs() {
    let verifier = StaticCredentials::single("anousone", "qwertyanousone").with("api", "s3cret");
    assert_eq!(verifier.len(), 2);
    let gate = ConnectionGate::new(verifier);
    assert!(gate.evaluate(&attempt("api", "s3cret")).is_accepted());
    assert!(gate.evaluate(&attempt("anousone", "qwertyanousone")).is_accepted());
    assert!(!gate.evaluate(&attempt("api", "qwertyanousone")).is_accepted());
}

struct OfflineVerifier;

impl CredentialVerifier for OfflineVerifier {
    fn verify(&self, _credential: &Credential) -> CredentialCheck {
        CredentialCheck::Unavailable
    }

    fn name(&self) -> &str {
        "offline"
    }
}

#[test]
fn test_unavailable_verifier_is_other_reject() {
    let gate = ConnectionGate::new(OfflineVerifier);
    let decision = gate.evaluate(&attempt("anousone", "qwertyanousone"));
    assert_eq!(decision, ConnectDecision::OtherReject);
}

#[test]
fn test_connect_decision_reason_codes() {
    assert_eq!(ConnectDecision::Accepted.reason_code_v5(), 0x00);
    assert_eq!(ConnectDecision::BadCredentials.reason_code_v5(), 0x86);
    assert_eq!(ConnectDecision::OtherReject.reason_code_v5(), 0x80);
    assert_eq!(ConnectDecision::Accepted.return_code_v3(), 0);
    assert_eq!(ConnectDecision::BadCredentials.return_code_v3(), 4);
    assert_eq!(ConnectDecision::OtherReject.return_code_v3(), 3);
}

#[test]
fn test_secret_is_redacted_in_debug_output() {
    let credential = Credential::new("anousone", "qwertyanousone");
    let rendered = format!("{credential:?} {:?}", attempt("anousone", "qwertyanousone"));
    assert!(!rendered.contains("qwertyanousone"));
    assert!(rendered.contains("Secret(***)"));
}

#[test]
fn test_sensor_payload_is_replaced_with_timestamp() {
    let interceptor = PublishInterceptor::default();
    let originals: Vec<Option<Vec<u8>>> = vec![
        Some(b"raw".to_vec()),
        Some(Vec::new()),
        None,
        Some(vec![0xff, 0xfe, 0x00]),
        Some(br#"{"temp":21.5}"#.to_vec()),
    ];

    for original in originals {
        let mut message = Message::new("device1", "wsm/sensor", "");
        message.payload = original.clone();
        let decision = interceptor.intercept(message);
        assert!(decision.accept);
        let payload = decision.message.payload.expect("stamped payload");
        assert_ne!(Some(payload.clone()), original);
        assert_fresh_stamp(&payload);
    }
}

#[test]
fn test_other_topics_are_left_alone() {
    let interceptor = PublishInterceptor::default();
    let message = Message::new("device1", "wsm/sensor/extra", "raw").with_qos(QoS::AtLeastOnce);
    let decision = interceptor.intercept(message.clone());
    assert!(decision.accept);
    assert_eq!(decision.message, message);
}

#[test]
fn test_anonymous_publish_is_rejected() {
    let interceptor = PublishInterceptor::default();
    for topic in ["wsm/sensor", "any/topic"] {
        let message = Message::new("anonymous", topic, "raw").retained(true);
        let decision = interceptor.intercept(message);
        assert!(!decision.accept, "topic {topic}");
        // Veto stops evaluation before the stamp rule.
        assert_eq!(decision.message.payload.as_deref(), Some(&b"raw"[..]));
    }
}

#[test]
fn test_rules_run_in_order_and_see_rewritten_message() {
    let rules = vec![
        PublishRule::transform(
            "set",
            Matcher::topic_prefix("lab/"),
            Transform::SetPayload(b"first".to_vec()),
        ),
        PublishRule::transform_fn("append", Matcher::Any, |mut m: Message| {
            let mut payload = m.payload.take().unwrap_or_default();
            payload.extend_from_slice(b"+second");
            m.payload = Some(payload);
            m
        }),
        PublishRule::reject(
            "reject-when-rewritten",
            Matcher::custom(|m: &Message| m.payload.as_deref() == Some(&b"first+second"[..])),
        ),
    ];
    let interceptor = PublishInterceptor::new(rules);

    let decision = interceptor.intercept(Message::new("c", "lab/one", "x"));
    assert!(!decision.accept);

    let decision = interceptor.intercept(Message::new("c", "home/one", "x"));
    assert!(decision.accept);
    assert_eq!(decision.message.payload.as_deref(), Some(&b"x+second"[..]));
}

#[test]
fn test_custom_transform_cannot_change_topic() {
    let interceptor = PublishInterceptor::new(vec![PublishRule::transform_fn(
        "reroute",
        Matcher::Any,
        |mut m: Message| {
            m.topic = "elsewhere".to_string();
            m.client_id = "someone-else".to_string();
            m.retain = true;
            m
        },
    )]);
    let decision = interceptor.intercept(Message::new("c", "lab/one", "x"));
    assert_eq!(decision.message.topic, "lab/one");
    assert_eq!(decision.message.client_id, "c");
    assert!(decision.message.retain);
}

#[test]
fn test_predicate_rule_rejects_oversized_payloads() {
    let interceptor = PublishInterceptor::new(vec![PublishRule::predicate_fn(
        "too-large",
        |m: &Message| m.payload.as_ref().is_some_and(|p| p.len() > 4),
        PublishAction::Reject,
    )]);
    assert!(!interceptor.intercept(Message::new("c", "t", "123456")).accept);
    assert!(interceptor.intercept(Message::new("c", "t", "1234")).accept);
    assert!(interceptor.intercept(Message::empty("c", "t")).accept);
}

#[test]
fn test_matcher_all_of() {
    let matcher = Matcher::<Message>::topic_prefix("hack").and(Matcher::client_id("hacker"));
    assert!(matcher.matches(&Message::new("hacker", "hack/this", "")));
    assert!(!matcher.matches(&Message::new("visitor", "hack/this", "")));
    assert!(!matcher.matches(&Message::new("hacker", "api/this", "")));
    assert!(Matcher::<Message>::Any.and(Matcher::topic("a")).matches(&Message::new("x", "a", "")));
}

#[test]
fn test_counter_increments_once_per_publish() {
    let interceptor = PublishInterceptor::default();
    assert_eq!(interceptor.counter().current(), 0);
    interceptor.intercept(Message::new("device1", "a", "1"));
    interceptor.intercept(Message::new("anonymous", "a", "2"));
    interceptor.intercept(Message::empty("device1", "wsm/sensor"));
    assert_eq!(interceptor.counter().current(), 3);
}

#[test]
fn test_concurrent_publishes_do_not_lose_counter_updates() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;

    let interceptor = Arc::new(PublishInterceptor::default());
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let interceptor = interceptor.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let topic = if i % 2 == 0 { "wsm/sensor" } else { "other" };
                    interceptor.intercept(Message::new(format!("device{t}"), topic, "x"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(interceptor.counter().current(), (THREADS * PER_THREAD) as u64);
}

#[test]
fn test_replace_publish_rules() {
    let interceptor = PublishInterceptor::default();
    assert_eq!(interceptor.rule_names(), vec!["reject-anonymous", "stamp-wsm-sensor"]);

    interceptor.replace_rules(Vec::new());
    assert!(interceptor.rule_names().is_empty());
    let decision = interceptor.intercept(Message::new("anonymous", "wsm/sensor", "raw"));
    assert!(decision.accept);
    assert_eq!(decision.message.payload.as_deref(), Some(&b"raw"[..]));
}

#[test]
fn test_subscription_default_is_permissive() {
    let gate = SubscriptionGate::default();
    let decision = gate.evaluate(&SubscriptionRequest::new("api", "wsm/#"));
    assert_eq!(decision, SubscriptionDecision::default());
    assert!(decision.accept);
    assert!(!decision.close_connection);
}

#[test]
fn test_subscription_deny_and_later_override() {
    let gate = SubscriptionGate::new(vec![
        SubscriptionRule::deny("only-api", Matcher::custom(|r: &SubscriptionRequest| {
            !r.topic_filter.starts_with("api")
        })),
        SubscriptionRule::allow(
            "api-reads-wsm",
            Matcher::topic_prefix("wsm").and(Matcher::client_id("api")),
        ),
    ]);

    assert!(gate.evaluate(&SubscriptionRequest::new("dev", "api/status")).accept);
    assert!(!gate.evaluate(&SubscriptionRequest::new("dev", "wsm/sensor")).accept);
    assert!(gate.evaluate(&SubscriptionRequest::new("api", "wsm/sensor")).accept);
}

#[test]
fn test_subscription_close_stops_evaluation() {
    let gate = SubscriptionGate::new(vec![
        SubscriptionRule::deny_and_close(
            "hacker",
            Matcher::topic_prefix("hack").and(Matcher::client_id("hacker")),
        ),
        SubscriptionRule::allow("allow-all", Matcher::Any),
    ]);

    let decision = gate.evaluate(&SubscriptionRequest::new("hacker", "hack/all"));
    assert!(!decision.accept);
    assert!(decision.close_connection);

    let decision = gate.evaluate(&SubscriptionRequest::new("hacker", "news"));
    assert!(decision.accept);
    assert!(!decision.close_connection);
}

#[test]
fn test_close_without_veto_keeps_accept() {
    let gate = SubscriptionGate::new(vec![SubscriptionRule::new(
        "kick",
        Matcher::topic("bye"),
        None,
        true,
    )]);
    let decision = gate.evaluate(&SubscriptionRequest::new("c", "bye"));
    assert!(decision.accept);
    assert!(decision.close_connection);
}
