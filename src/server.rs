//! relay side of the protocol
//!
//! [`RelayHub`] owns every connected client's subscriptions and applies the
//! same codec, gate and filter engine the client side uses. it is transport
//! agnostic: the embedding server feeds it text frames per connection and
//! forwards whatever shows up on the connection's outbound channel.

use crate::envelopes::{ClientMessage, CountResponse, DecodeError, RelayMessage};
use crate::filter::{validate_request, FilterRejected};
use crate::helpers::{extract_event_id, is_valid_relay_url};
use crate::normalize::{normalize_ok_message, normalize_url, MachineReadablePrefix};
use crate::relay_information::{Limitation, RelayInformationDocument};
use crate::signature::{GateError, SignatureGate};
use crate::tag_index::TagIndex;
use crate::{Event, Filter, Kind, PubKey, Timestamp, ID};
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};

/// how far an AUTH event's created_at may be from now
const AUTH_WINDOW_SECS: u64 = 600;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error(transparent)]
    Gate(#[from] GateError),
}

pub type Result<T> = std::result::Result<T, RelayError>;

pub type ConnectionId = u64;

/// trait for custom relay implementations
///
/// errors are reasons; a reason without a known prefix is sent as `error: ...`.
pub trait CustomRelay: Send + Sync {
    fn handle_event(&mut self, _event: &Event) -> std::result::Result<(), String> {
        Err("can't handle anything".to_string())
    }

    fn handle_request(&mut self, _filter: &Filter) -> std::result::Result<Vec<Event>, String> {
        Err("can't handle anything".to_string())
    }

    /// defaults to counting the distinct events every filter would return
    fn handle_count(&mut self, filters: &[Filter]) -> std::result::Result<CountResponse, String> {
        let mut seen = HashSet::new();
        for filter in filters {
            let unlimited = Filter {
                limit: None,
                ..filter.clone()
            };
            for event in self.handle_request(&unlimited)? {
                seen.insert(event.id);
            }
        }
        Ok(CountResponse {
            count: seen.len() as u64,
            approximate: None,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// our own URL, checked against the `relay` tag of AUTH events
    pub relay_url: Option<String>,
    pub limitation: Limitation,
    /// limit applied to filters that carry none
    pub default_limit: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            relay_url: None,
            limitation: Limitation::default(),
            default_limit: 500,
        }
    }
}

impl From<&RelayInformationDocument> for SessionOptions {
    fn from(info: &RelayInformationDocument) -> Self {
        let limitation = info.limitation();
        Self {
            relay_url: Some(info.url.clone()).filter(|url| !url.is_empty()),
            default_limit: limitation.default_limit.unwrap_or(500),
            limitation,
        }
    }
}

struct Connection {
    sender: mpsc::UnboundedSender<String>,
    subscriptions: RwLock<HashMap<String, Vec<Filter>>>,
    challenge: String,
    authed: RwLock<Option<PubKey>>,
}

impl Connection {
    fn send(&self, message: RelayMessage) {
        if self.sender.send(message.encode()).is_err() {
            log::debug!("dropping {} for a closed connection", message.label());
        }
    }
}

/// main relay state
pub struct RelayHub {
    /// relay information for NIP-11
    pub info: RelayInformationDocument,
    pub options: SessionOptions,
    custom_relay: Mutex<Box<dyn CustomRelay>>,
    gate: Arc<SignatureGate>,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    next_id: AtomicU64,
}

impl RelayHub {
    pub fn new(info: RelayInformationDocument, custom_relay: impl CustomRelay + 'static) -> Self {
        let options = SessionOptions::from(&info);
        Self::with_options(info, options, custom_relay)
    }

    pub fn with_options(
        info: RelayInformationDocument,
        options: SessionOptions,
        custom_relay: impl CustomRelay + 'static,
    ) -> Self {
        Self {
            info,
            options,
            custom_relay: Mutex::new(Box::new(custom_relay)),
            gate: Arc::new(SignatureGate::new()),
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// register a client; everything the relay sends it comes out of the receiver,
    /// starting with an AUTH challenge
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        let challenge = lowercase_hex::encode(secp256k1::rand::random::<[u8; 16]>());

        let conn = Arc::new(Connection {
            sender,
            subscriptions: RwLock::new(HashMap::new()),
            challenge: challenge.clone(),
            authed: RwLock::new(None),
        });
        conn.send(RelayMessage::Auth { challenge });

        self.connections.insert(id, conn);
        log::debug!("connection {} opened", id);
        (id, receiver)
    }

    /// forget a client and all its subscriptions
    pub fn disconnect(&self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            log::debug!("connection {} closed", id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// the pubkey a connection authenticated as, if any
    pub async fn authed(&self, id: ConnectionId) -> Result<Option<PubKey>> {
        Ok(*self.connection(id)?.authed.read().await)
    }

    fn connection(&self, id: ConnectionId) -> Result<Arc<Connection>> {
        self.connections
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(RelayError::UnknownConnection(id))
    }

    /// process one inbound text frame from a connection
    pub async fn handle_text(&self, id: ConnectionId, text: &str) -> Result<()> {
        let conn = self.connection(id)?;

        if let Some(max) = self.options.limitation.max_message_length {
            if text.len() > max {
                conn.send(RelayMessage::Notice(
                    MachineReadablePrefix::Invalid.with("message too large"),
                ));
                return Ok(());
            }
        }

        match ClientMessage::decode(text) {
            Ok(ClientMessage::Event(event)) => self.handle_event(&conn, event).await,
            Ok(ClientMessage::Req {
                subscription_id,
                filters,
            }) => self.handle_req(&conn, subscription_id, filters).await,
            Ok(ClientMessage::Count {
                subscription_id,
                filters,
            }) => self.handle_count(&conn, subscription_id, filters).await,
            Ok(ClientMessage::Close(subscription_id)) => {
                conn.subscriptions.write().await.remove(&subscription_id);
                Ok(())
            }
            Ok(ClientMessage::Auth(event)) => self.handle_auth(&conn, event).await,
            Err(err) => {
                self.reject_undecodable(&conn, text, err);
                Ok(())
            }
        }
    }

    fn reject_undecodable(&self, conn: &Connection, text: &str, err: DecodeError) {
        log::info!("failed to parse message: {}", err);
        match extract_event_id(text) {
            Some(event_id) => conn.send(RelayMessage::ok(
                event_id,
                false,
                MachineReadablePrefix::Invalid.with(&err.to_string()),
            )),
            None => conn.send(RelayMessage::Notice(format!(
                "failed to parse message: {}",
                err
            ))),
        }
    }

    async fn handle_event(&self, conn: &Connection, event: Event) -> Result<()> {
        let (event, verification) = self.gate.clone().verify_async(event).await?;
        if let Some(reason) = verification.ok_reason() {
            log::info!("rejected event {}: {}", event.id, reason);
            conn.send(RelayMessage::ok(event.id, false, reason));
            return Ok(());
        }

        if let Err(reason) = self.check_limits(&event) {
            conn.send(RelayMessage::ok(event.id, false, reason));
            return Ok(());
        }

        if self.options.limitation.auth_required == Some(true) && conn.authed.read().await.is_none()
        {
            conn.send(RelayMessage::ok(
                event.id,
                false,
                MachineReadablePrefix::AuthRequired.with("authenticate to publish"),
            ));
            return Ok(());
        }

        // storing and fanning out happen under the relay lock, so a REQ sees
        // each event either in its stored results or live, never both
        let mut relay = self.custom_relay.lock().await;

        // ephemeral events are only relayed
        if !event.kind.is_ephemeral() {
            if let Err(e) = relay.handle_event(&event) {
                conn.send(RelayMessage::ok(
                    event.id,
                    false,
                    normalize_ok_message(&e, MachineReadablePrefix::Error),
                ));
                return Ok(());
            }
        }

        conn.send(RelayMessage::ok(event.id, true, ""));
        self.broadcast(&event).await;
        drop(relay);
        Ok(())
    }

    fn check_limits(&self, event: &Event) -> std::result::Result<(), String> {
        let limits = &self.options.limitation;

        if let Some(max) = limits.max_content_length {
            if event.content.chars().count() > max {
                return Err(MachineReadablePrefix::Invalid.with("content too long"));
            }
        }

        if let Some(max) = limits.max_event_tags {
            if event.tags.len() > max {
                return Err(MachineReadablePrefix::Invalid.with("too many tags"));
            }
        }

        if let Some(min) = limits.min_pow_difficulty {
            let difficulty = event.id.difficulty();
            if difficulty < min {
                return Err(MachineReadablePrefix::Pow.with(&format!(
                    "difficulty {difficulty} is less than {min}"
                )));
            }
        }

        let now = Timestamp::now();
        if let Some(lower) = limits.created_at_lower_limit {
            if event.created_at < now && now.distance(event.created_at) > lower {
                return Err(MachineReadablePrefix::Invalid.with("created_at too far in the past"));
            }
        }
        if let Some(upper) = limits.created_at_upper_limit {
            if event.created_at > now && now.distance(event.created_at) > upper {
                return Err(MachineReadablePrefix::Invalid.with("created_at too far in the future"));
            }
        }

        Ok(())
    }

    /// send an accepted event to every subscription whose filters it matches
    pub async fn broadcast(&self, event: &Event) {
        let index = TagIndex::build(event);
        let conns: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for conn in conns {
            let subscriptions = conn.subscriptions.read().await;
            for (subscription_id, filters) in subscriptions.iter() {
                if filters.iter().any(|f| f.matches_indexed(event, &index)) {
                    conn.send(RelayMessage::Event {
                        subscription_id: subscription_id.clone(),
                        event: event.clone(),
                    });
                }
            }
        }
    }

    async fn check_request(
        &self,
        conn: &Connection,
        subscription_id: &str,
        filters: &[Filter],
    ) -> std::result::Result<(), FilterRejected> {
        validate_request(subscription_id, filters, &self.options.limitation)?;

        if self.options.limitation.auth_required == Some(true) && conn.authed.read().await.is_none()
        {
            return Err(FilterRejected {
                prefix: MachineReadablePrefix::AuthRequired,
                message: "authenticate to read".to_string(),
            });
        }

        Ok(())
    }

    async fn handle_req(
        &self,
        conn: &Connection,
        subscription_id: String,
        filters: Vec<Filter>,
    ) -> Result<()> {
        if let Err(rejected) = self.check_request(conn, &subscription_id, &filters).await {
            conn.send(RelayMessage::closed(subscription_id, rejected.to_string()));
            return Ok(());
        }

        // the subscription goes live only once the stored events are in hand,
        // and before the relay lock is released
        let mut relay = self.custom_relay.lock().await;

        let mut stored = Vec::new();
        let mut seen = HashSet::<ID>::new();
        for filter in &filters {
            let mut limit = filter.limit.unwrap_or(self.options.default_limit);
            if let Some(max) = self.options.limitation.max_limit {
                limit = limit.min(max);
            }
            let bounded = filter.clone().limit(limit);

            // query events
            let events = match relay.handle_request(&bounded) {
                Ok(events) => events,
                Err(e) => {
                    drop(relay);
                    conn.subscriptions.write().await.remove(&subscription_id);
                    conn.send(RelayMessage::closed(
                        subscription_id,
                        normalize_ok_message(&e, MachineReadablePrefix::Error),
                    ));
                    return Ok(());
                }
            };

            for event in bounded.select(&events) {
                if seen.insert(event.id) {
                    stored.push(event.clone());
                }
            }
        }

        {
            let mut subscriptions = conn.subscriptions.write().await;
            if let Some(max) = self.options.limitation.max_subscriptions {
                if !subscriptions.contains_key(&subscription_id) && subscriptions.len() >= max {
                    drop(subscriptions);
                    drop(relay);
                    conn.send(RelayMessage::closed(
                        subscription_id,
                        MachineReadablePrefix::Restricted.with("too many subscriptions"),
                    ));
                    return Ok(());
                }
            }
            subscriptions.insert(subscription_id.clone(), filters);
        }

        for event in stored {
            conn.send(RelayMessage::Event {
                subscription_id: subscription_id.clone(),
                event,
            });
        }
        conn.send(RelayMessage::Eose(subscription_id));
        drop(relay);
        Ok(())
    }

    async fn handle_count(
        &self,
        conn: &Connection,
        subscription_id: String,
        filters: Vec<Filter>,
    ) -> Result<()> {
        if let Err(rejected) = self.check_request(conn, &subscription_id, &filters).await {
            conn.send(RelayMessage::closed(subscription_id, rejected.to_string()));
            return Ok(());
        }

        let counted = self.custom_relay.lock().await.handle_count(&filters);
        match counted {
            Ok(count) => conn.send(RelayMessage::Count {
                subscription_id,
                count,
            }),
            Err(e) => conn.send(RelayMessage::closed(
                subscription_id,
                normalize_ok_message(&e, MachineReadablePrefix::Error),
            )),
        }
        Ok(())
    }

    async fn handle_auth(&self, conn: &Connection, event: Event) -> Result<()> {
        let (event, verification) = self.gate.clone().verify_async(event).await?;
        let outcome = match verification.ok_reason() {
            Some(reason) => Err(reason),
            None => self.check_auth_event(conn, &event),
        };

        match outcome {
            Ok(()) => {
                *conn.authed.write().await = Some(event.pubkey);
                log::info!("connection authenticated as {}", event.pubkey);
                conn.send(RelayMessage::ok(event.id, true, ""));
            }
            Err(reason) => conn.send(RelayMessage::ok(event.id, false, reason)),
        }
        Ok(())
    }

    fn check_auth_event(&self, conn: &Connection, event: &Event) -> std::result::Result<(), String> {
        if event.kind != Kind::CLIENT_AUTHENTICATION {
            return Err(MachineReadablePrefix::Invalid.with("not an authentication event"));
        }

        if event.tags.challenge() != Some(conn.challenge.as_str()) {
            return Err(MachineReadablePrefix::Invalid.with("challenge does not match"));
        }

        if event.created_at.distance(Timestamp::now()) > AUTH_WINDOW_SECS {
            return Err(MachineReadablePrefix::Invalid.with("created_at is too far from now"));
        }

        let Some(relay) = event.tags.relay() else {
            return Err(MachineReadablePrefix::Invalid.with("missing relay tag"));
        };
        if let Some(ours) = &self.options.relay_url {
            let same = match (normalize_url(relay), normalize_url(ours)) {
                (Ok(theirs), Ok(ours)) => {
                    is_valid_relay_url(theirs.as_str()) && theirs.host_str() == ours.host_str()
                }
                _ => false,
            };
            if !same {
                return Err(MachineReadablePrefix::Invalid.with("relay tag does not match"));
            }
        }

        Ok(())
    }
}
