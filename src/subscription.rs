//! client side subscription bookkeeping for a single relay connection
//!
//! the manager never touches a socket: it hands back the messages to send and
//! turns every inbound frame into either something to deliver or an anomaly to
//! discard. a subscription goes `Open -> Streaming -> Closed` and never back.

use crate::crypto::{Digester, Schnorr, SignatureVerifier};
use crate::envelopes::{ClientMessage, CountResponse, RelayMessage};
use crate::filter::{matches_any, validate_request, FilterRejected};
use crate::normalize::{normalize_url, ReasonMessage};
use crate::relay_information::Limitation;
use crate::signature::{SignatureGate, Verification};
use crate::{Event, EventTemplate, Filter, Kind, Tags, ID};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("subscription '{0}' is already open")]
    AlreadyOpen(String),

    #[error("too many subscriptions, maximum is {0}")]
    TooMany(usize),

    #[error("{0}")]
    Rejected(#[from] FilterRejected),

    #[error("no AUTH challenge received yet")]
    NoChallenge,

    #[error("invalid relay URL: {0}")]
    RelayUrl(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, SubscriptionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    Open,
    Streaming,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ClosedByUs,
    ClosedByThemWithReason(ReasonMessage),
    ConnectionClosed,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub filters: Vec<Filter>,
    pub state: SubscriptionState,
    pub close_reason: Option<CloseReason>,
    pub received: usize,
}

impl Subscription {
    pub fn is_live(&self) -> bool {
        self.state != SubscriptionState::Closed
    }

    fn close(&mut self, reason: CloseReason) {
        self.state = SubscriptionState::Closed;
        self.close_reason = Some(reason);
    }
}

/// something the application should see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occurrence {
    Event {
        subscription_id: String,
        event: Event,
    },
    Eose(String),
    Closed {
        subscription_id: String,
        reason: CloseReason,
    },
    Count {
        subscription_id: String,
        count: CountResponse,
    },
    Ok {
        event_id: ID,
        accepted: bool,
        reason: ReasonMessage,
    },
    Notice(String),
    AuthChallenge(String),
}

/// an inbound frame that was dropped, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    UnknownSubscription(String),
    DuplicateEose(String),
    AfterClose(String),
    RejectedEvent {
        subscription_id: String,
        verification: Verification,
    },
    FilterMismatch {
        subscription_id: String,
        event_id: ID,
    },
    UnknownOk(ID),
    Undecodable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Deliver(Occurrence),
    Discard(Anomaly),
}

impl Dispatch {
    pub fn occurrence(self) -> Option<Occurrence> {
        match self {
            Dispatch::Deliver(occurrence) => Some(occurrence),
            Dispatch::Discard(_) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterOptions {
    /// run every received event through the id and signature checks
    pub verify_events: bool,
    /// drop events that match none of the subscription's filters
    pub match_filters: bool,
    /// after EOSE, ignore `since`/`until` when checking events against filters
    pub relax_time_after_eose: bool,
    /// limits the relay declared, applied to outgoing REQ and COUNT
    pub limitation: Limitation,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            verify_events: true,
            match_filters: true,
            relax_time_after_eose: true,
            limitation: Limitation::default(),
        }
    }
}

pub struct SubscriptionManager<D = Schnorr, V = Schnorr> {
    options: RouterOptions,
    gate: SignatureGate<D, V>,
    subscriptions: HashMap<String, Subscription>,
    pending_counts: HashSet<String>,
    pending_oks: HashSet<ID>,
    challenge: Option<String>,
}

impl SubscriptionManager {
    pub fn new(options: RouterOptions) -> Self {
        Self::with_gate(options, SignatureGate::default())
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new(RouterOptions::default())
    }
}

impl<D: Digester, V: SignatureVerifier> SubscriptionManager<D, V> {
    pub fn with_gate(options: RouterOptions, gate: SignatureGate<D, V>) -> Self {
        Self {
            options,
            gate,
            subscriptions: HashMap::new(),
            pending_counts: HashSet::new(),
            pending_oks: HashSet::new(),
            challenge: None,
        }
    }

    /// register a subscription and get the REQ to send for it
    pub fn open(&mut self, sub_id: &str, filters: Vec<Filter>) -> Result<ClientMessage> {
        if self.subscriptions.get(sub_id).is_some_and(Subscription::is_live)
            || self.pending_counts.contains(sub_id)
        {
            return Err(SubscriptionError::AlreadyOpen(sub_id.to_string()));
        }
        validate_request(sub_id, &filters, &self.options.limitation)?;

        if let Some(max) = self.options.limitation.max_subscriptions {
            if self.live().count() >= max {
                return Err(SubscriptionError::TooMany(max));
            }
        }

        self.subscriptions.insert(
            sub_id.to_string(),
            Subscription {
                id: sub_id.to_string(),
                filters: filters.clone(),
                state: SubscriptionState::Open,
                close_reason: None,
                received: 0,
            },
        );
        log::debug!("opened subscription {}", sub_id);

        Ok(ClientMessage::Req {
            subscription_id: sub_id.to_string(),
            filters,
        })
    }

    /// close a live subscription; anything else yields no message
    pub fn close(&mut self, sub_id: &str) -> Option<ClientMessage> {
        let sub = self.subscriptions.get_mut(sub_id)?;
        if !sub.is_live() {
            return None;
        }
        sub.close(CloseReason::ClosedByUs);
        Some(ClientMessage::Close(sub_id.to_string()))
    }

    /// a one-shot COUNT, answered by the first COUNT or CLOSED for `sub_id`
    pub fn count(&mut self, sub_id: &str, filters: Vec<Filter>) -> Result<ClientMessage> {
        if self.subscriptions.get(sub_id).is_some_and(Subscription::is_live)
            || self.pending_counts.contains(sub_id)
        {
            return Err(SubscriptionError::AlreadyOpen(sub_id.to_string()));
        }
        validate_request(sub_id, &filters, &self.options.limitation)?;

        self.pending_counts.insert(sub_id.to_string());
        Ok(ClientMessage::Count {
            subscription_id: sub_id.to_string(),
            filters,
        })
    }

    /// send an event and expect an OK for it
    pub fn publish(&mut self, event: Event) -> ClientMessage {
        self.pending_oks.insert(event.id);
        ClientMessage::Event(event)
    }

    /// answer the relay's challenge with a signed kind 22242 event
    pub fn authenticate(&mut self, event: Event) -> ClientMessage {
        self.pending_oks.insert(event.id);
        ClientMessage::Auth(event)
    }

    pub fn challenge(&self) -> Option<&str> {
        self.challenge.as_deref()
    }

    /// the unsigned AUTH event for the last challenge this relay sent
    pub fn auth_template(&self, relay_url: &str) -> Result<EventTemplate> {
        let challenge = self.challenge.as_ref().ok_or(SubscriptionError::NoChallenge)?;
        let relay = normalize_url(relay_url)?;

        Ok(EventTemplate::new(Kind::CLIENT_AUTHENTICATION, "").tags(
            Tags::new()
                .with(["relay", relay.as_str()])
                .with(["challenge", challenge.as_str()]),
        ))
    }

    /// the connection went away: every live subscription is closed and
    /// nothing pending will be answered
    pub fn teardown(&mut self) -> Vec<Occurrence> {
        self.pending_counts.clear();
        self.pending_oks.clear();
        self.challenge = None;

        let mut closed = Vec::new();
        for sub in self.subscriptions.values_mut().filter(|s| s.is_live()) {
            sub.close(CloseReason::ConnectionClosed);
            closed.push(Occurrence::Closed {
                subscription_id: sub.id.clone(),
                reason: CloseReason::ConnectionClosed,
            });
        }
        closed
    }

    pub fn state(&self, sub_id: &str) -> Option<SubscriptionState> {
        self.subscriptions.get(sub_id).map(|s| s.state)
    }

    pub fn get(&self, sub_id: &str) -> Option<&Subscription> {
        self.subscriptions.get(sub_id)
    }

    pub fn live(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.values().filter(|s| s.is_live())
    }

    /// forget closed subscriptions
    pub fn prune_closed(&mut self) {
        self.subscriptions.retain(|_, s| s.is_live());
    }

    /// decode and route one inbound text frame
    pub fn handle_text(&mut self, text: &str) -> Dispatch {
        match RelayMessage::decode(text) {
            Ok(message) => self.handle(message),
            Err(err) => self.discard(Anomaly::Undecodable(err.to_string())),
        }
    }

    pub fn handle(&mut self, message: RelayMessage) -> Dispatch {
        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => self.handle_event(subscription_id, event),
            RelayMessage::Eose(subscription_id) => {
                let Some(sub) = self.subscriptions.get_mut(&subscription_id) else {
                    return self.discard(Anomaly::UnknownSubscription(subscription_id));
                };
                match sub.state {
                    SubscriptionState::Open => {
                        sub.state = SubscriptionState::Streaming;
                        Dispatch::Deliver(Occurrence::Eose(subscription_id))
                    }
                    SubscriptionState::Streaming => {
                        self.discard(Anomaly::DuplicateEose(subscription_id))
                    }
                    SubscriptionState::Closed => self.discard(Anomaly::AfterClose(subscription_id)),
                }
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                let reason = CloseReason::ClosedByThemWithReason(ReasonMessage::parse(&message));
                if self.pending_counts.remove(&subscription_id) {
                    return Dispatch::Deliver(Occurrence::Closed {
                        subscription_id,
                        reason,
                    });
                }

                let Some(sub) = self.subscriptions.get_mut(&subscription_id) else {
                    return self.discard(Anomaly::UnknownSubscription(subscription_id));
                };
                if !sub.is_live() {
                    return self.discard(Anomaly::AfterClose(subscription_id));
                }

                log::info!("subscription {} closed by relay: {}", subscription_id, message);
                sub.close(reason.clone());
                Dispatch::Deliver(Occurrence::Closed {
                    subscription_id,
                    reason,
                })
            }
            RelayMessage::Count {
                subscription_id,
                count,
            } => {
                if self.pending_counts.remove(&subscription_id) {
                    Dispatch::Deliver(Occurrence::Count {
                        subscription_id,
                        count,
                    })
                } else {
                    self.discard(Anomaly::UnknownSubscription(subscription_id))
                }
            }
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                if self.pending_oks.remove(&event_id) {
                    Dispatch::Deliver(Occurrence::Ok {
                        event_id,
                        accepted,
                        reason: ReasonMessage::parse(&message),
                    })
                } else {
                    self.discard(Anomaly::UnknownOk(event_id))
                }
            }
            RelayMessage::Notice(notice) => {
                log::info!("received notice: {}", notice);
                Dispatch::Deliver(Occurrence::Notice(notice))
            }
            RelayMessage::Auth { challenge } => {
                self.challenge = Some(challenge.clone());
                Dispatch::Deliver(Occurrence::AuthChallenge(challenge))
            }
        }
    }

    fn handle_event(&mut self, subscription_id: String, event: Event) -> Dispatch {
        let Some(sub) = self.subscriptions.get(&subscription_id) else {
            return self.discard(Anomaly::UnknownSubscription(subscription_id));
        };
        if !sub.is_live() {
            return self.discard(Anomaly::AfterClose(subscription_id));
        }

        if self.options.match_filters {
            let matched = if sub.state == SubscriptionState::Streaming
                && self.options.relax_time_after_eose
            {
                sub.filters.iter().any(|f| f.matches_except_time(&event))
            } else {
                matches_any(&event, &sub.filters)
            };
            if !matched {
                return self.discard(Anomaly::FilterMismatch {
                    subscription_id,
                    event_id: event.id,
                });
            }
        }

        if self.options.verify_events {
            let verification = self.gate.verify(&event);
            if !verification.is_valid() {
                return self.discard(Anomaly::RejectedEvent {
                    subscription_id,
                    verification,
                });
            }
        }

        if let Some(sub) = self.subscriptions.get_mut(&subscription_id) {
            sub.received += 1;
        }
        Dispatch::Deliver(Occurrence::Event {
            subscription_id,
            event,
        })
    }

    fn discard(&self, anomaly: Anomaly) -> Dispatch {
        match &anomaly {
            Anomaly::RejectedEvent {
                subscription_id,
                verification,
            } => log::warn!(
                "dropping event on {}: {:?}",
                subscription_id,
                verification
            ),
            Anomaly::Undecodable(err) => log::info!("wrong message: {}", err),
            other => log::info!("discarding: {:?}", other),
        }
        Dispatch::Discard(anomaly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::MachineReadablePrefix;
    use crate::{SecretKey, Timestamp};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn signed(kind: Kind, created_at: u64) -> Event {
        EventTemplate::new(kind, "hi")
            .created_at(Timestamp(created_at))
            .finalize(&SecretKey::generate())
    }

    fn relay_event(sub: &str, event: &Event) -> String {
        RelayMessage::Event {
            subscription_id: sub.to_string(),
            event: event.clone(),
        }
        .encode()
    }

    #[test]
    fn test_lifecycle() {
        let mut manager = SubscriptionManager::default();
        let req = manager.open("sub1", vec![Filter::new().kinds([Kind::TEXT])]).unwrap();
        assert_eq!(req.label(), "REQ");
        assert_eq!(manager.state("sub1"), Some(SubscriptionState::Open));

        let event = signed(Kind::TEXT, 10);
        assert!(matches!(
            manager.handle_text(&relay_event("sub1", &event)),
            Dispatch::Deliver(Occurrence::Event { .. })
        ));

        assert_eq!(
            manager.handle_text(r#"["EOSE","sub1"]"#),
            Dispatch::Deliver(Occurrence::Eose("sub1".to_string()))
        );
        assert_eq!(manager.state("sub1"), Some(SubscriptionState::Streaming));
        assert_eq!(
            manager.handle_text(r#"["EOSE","sub1"]"#),
            Dispatch::Discard(Anomaly::DuplicateEose("sub1".to_string()))
        );

        assert_eq!(
            manager.close("sub1"),
            Some(ClientMessage::Close("sub1".to_string()))
        );
        assert_eq!(manager.close("sub1"), None);
        assert_eq!(manager.state("sub1"), Some(SubscriptionState::Closed));

        assert_eq!(
            manager.handle_text(&relay_event("sub1", &event)),
            Dispatch::Discard(Anomaly::AfterClose("sub1".to_string()))
        );
        assert_eq!(manager.get("sub1").unwrap().received, 1);
    }

    #[test]
    fn test_reopen_rules() {
        let mut manager = SubscriptionManager::default();
        manager.open("s", vec![Filter::new()]).unwrap();
        assert!(matches!(
            manager.open("s", vec![Filter::new()]),
            Err(SubscriptionError::AlreadyOpen(_))
        ));
        manager.close("s");
        assert!(manager.open("s", vec![Filter::new()]).is_ok());
        assert_eq!(manager.state("s"), Some(SubscriptionState::Open));

        assert!(matches!(
            manager.open("t", vec![]),
            Err(SubscriptionError::Rejected(_))
        ));
        assert!(matches!(
            manager.open("", vec![Filter::new()]),
            Err(SubscriptionError::Rejected(_))
        ));
    }

    #[test]
    fn test_unknown_subscription() {
        let mut manager = SubscriptionManager::default();
        let event = signed(Kind::TEXT, 1);
        for text in [
            relay_event("ghost", &event),
            r#"["EOSE","ghost"]"#.to_string(),
            r#"["CLOSED","ghost","error: x"]"#.to_string(),
            r#"["COUNT","ghost",{"count":1}]"#.to_string(),
        ] {
            assert_eq!(
                manager.handle_text(&text),
                Dispatch::Discard(Anomaly::UnknownSubscription("ghost".to_string())),
                "{text}"
            );
        }
    }

    #[test]
    fn test_closed_by_relay() {
        let mut manager = SubscriptionManager::default();
        manager.open("s", vec![Filter::new()]).unwrap();

        match manager.handle_text(r#"["CLOSED","s","auth-required: please"]"#) {
            Dispatch::Deliver(Occurrence::Closed {
                reason: CloseReason::ClosedByThemWithReason(reason),
                ..
            }) => {
                assert_eq!(reason.prefix(), Some(MachineReadablePrefix::AuthRequired));
                assert_eq!(reason.detail(), "please");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(manager.state("s"), Some(SubscriptionState::Closed));
        assert_eq!(manager.close("s"), None);
    }

    #[test]
    fn test_rejects_forged_and_mismatched_events() {
        let mut manager = SubscriptionManager::default();
        manager
            .open("s", vec![Filter::new().kinds([Kind::TEXT]).since(Timestamp(100))])
            .unwrap();

        let mut forged = signed(Kind::TEXT, 150);
        forged.content = "tampered".to_string();
        assert!(matches!(
            manager.handle_text(&relay_event("s", &forged)),
            Dispatch::Discard(Anomaly::RejectedEvent {
                verification: Verification::InvalidId,
                ..
            })
        ));

        let reaction = signed(Kind::REACTION, 150);
        assert!(matches!(
            manager.handle_text(&relay_event("s", &reaction)),
            Dispatch::Discard(Anomaly::FilterMismatch { .. })
        ));

        let old = signed(Kind::TEXT, 50);
        assert!(matches!(
            manager.handle_text(&relay_event("s", &old)),
            Dispatch::Discard(Anomaly::FilterMismatch { .. })
        ));

        // once streaming, time bounds no longer apply
        manager.handle_text(r#"["EOSE","s"]"#);
        assert!(matches!(
            manager.handle_text(&relay_event("s", &old)),
            Dispatch::Deliver(Occurrence::Event { .. })
        ));
    }

    #[test]
    fn test_verification_happens_through_the_gate() {
        struct Counting(AtomicUsize);
        impl SignatureVerifier for Counting {
            fn verify(&self, _: &crate::PubKey, _: &ID, _: &crate::Signature) -> bool {
                self.0.fetch_add(1, Ordering::SeqCst);
                true
            }
        }

        let gate = SignatureGate::with(Schnorr, Counting(AtomicUsize::new(0)));
        let mut manager = SubscriptionManager::with_gate(RouterOptions::default(), gate);
        manager.open("s", vec![Filter::new()]).unwrap();
        manager.handle_text(&relay_event("s", &signed(Kind::TEXT, 1)));
        assert_eq!(manager.gate.verifier().0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_count_is_one_shot() {
        let mut manager = SubscriptionManager::default();
        let msg = manager.count("c", vec![Filter::new()]).unwrap();
        assert_eq!(msg.label(), "COUNT");

        assert_eq!(
            manager.handle_text(r#"["COUNT","c",{"count":7,"approximate":true}]"#),
            Dispatch::Deliver(Occurrence::Count {
                subscription_id: "c".to_string(),
                count: CountResponse {
                    count: 7,
                    approximate: Some(true),
                },
            })
        );
        assert!(matches!(
            manager.handle_text(r#"["COUNT","c",{"count":7}]"#),
            Dispatch::Discard(Anomaly::UnknownSubscription(_))
        ));

        manager.count("d", vec![Filter::new()]).unwrap();
        assert!(matches!(
            manager.handle_text(r#"["CLOSED","d","restricted: no counting"]"#),
            Dispatch::Deliver(Occurrence::Closed { .. })
        ));
    }

    #[test]
    fn test_ok_correlation() {
        let mut manager = SubscriptionManager::default();
        let event = signed(Kind::TEXT, 1);
        assert_eq!(manager.publish(event.clone()).label(), "EVENT");

        let ok = RelayMessage::ok(event.id, false, "duplicate: seen it");
        match manager.handle(ok.clone()) {
            Dispatch::Deliver(Occurrence::Ok {
                accepted, reason, ..
            }) => {
                assert!(!accepted);
                assert_eq!(reason.prefix(), Some(MachineReadablePrefix::Duplicate));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(manager.handle(ok), Dispatch::Discard(Anomaly::UnknownOk(event.id)));
    }

    #[test]
    fn test_auth_flow() {
        let mut manager = SubscriptionManager::default();
        assert!(matches!(
            manager.auth_template("wss://relay.example.com"),
            Err(SubscriptionError::NoChallenge)
        ));

        assert_eq!(
            manager.handle_text(r#"["AUTH","challenge-string"]"#),
            Dispatch::Deliver(Occurrence::AuthChallenge("challenge-string".to_string()))
        );

        let template = manager.auth_template("Relay.Example.com").unwrap();
        assert_eq!(template.kind, Kind::CLIENT_AUTHENTICATION);
        assert_eq!(template.tags.relay(), Some("wss://relay.example.com/"));
        assert_eq!(template.tags.challenge(), Some("challenge-string"));

        let auth = template.finalize(&SecretKey::generate());
        let id = auth.id;
        assert_eq!(manager.authenticate(auth).label(), "AUTH");
        assert!(matches!(
            manager.handle(RelayMessage::ok(id, true, "")),
            Dispatch::Deliver(Occurrence::Ok { accepted: true, .. })
        ));
    }

    #[test]
    fn test_teardown_and_prune() {
        let mut manager = SubscriptionManager::default();
        manager.open("a", vec![Filter::new()]).unwrap();
        manager.open("b", vec![Filter::new()]).unwrap();
        manager.close("b");

        let closed = manager.teardown();
        assert_eq!(
            closed,
            vec![Occurrence::Closed {
                subscription_id: "a".to_string(),
                reason: CloseReason::ConnectionClosed,
            }]
        );
        assert_eq!(manager.live().count(), 0);

        manager.prune_closed();
        assert!(manager.get("a").is_none());
        assert!(manager.get("b").is_none());
    }

    #[test]
    fn test_undecodable_and_notice() {
        let mut manager = SubscriptionManager::default();
        assert!(matches!(
            manager.handle_text("garbage"),
            Dispatch::Discard(Anomaly::Undecodable(_))
        ));
        assert_eq!(
            manager.handle_text(r#"["NOTICE","be nice"]"#).occurrence(),
            Some(Occurrence::Notice("be nice".to_string()))
        );
    }

    #[test]
    fn test_max_subscriptions() {
        let options = RouterOptions {
            limitation: Limitation {
                max_subscriptions: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut manager = SubscriptionManager::new(options);
        manager.open("a", vec![Filter::new()]).unwrap();
        assert!(matches!(
            manager.open("b", vec![Filter::new()]),
            Err(SubscriptionError::TooMany(1))
        ));
    }

    #[test]
    fn test_router_options_from_json() {
        let options: RouterOptions =
            serde_json::from_str(r#"{"verify_events": false, "limitation": {"max_filters": 3}}"#)
                .unwrap();
        assert!(!options.verify_events);
        assert!(options.match_filters);
        assert_eq!(options.limitation.max_filters, Some(3));
    }
}
