//! # ritual-protocol
//!
//! nostr protocol core
//!
//! this library provides the pieces both ends of a Nostr connection share:
//! events and their canonical ids, signature checking, filters, the wire
//! messages, a client-side subscription manager and a transport-agnostic relay hub.

pub mod crypto;
pub mod envelopes;
pub mod event;
pub mod event_template;
pub mod filter;
pub mod helpers;
pub mod keys;
pub mod normalize;
pub mod relay_information;
pub mod server;
pub mod signature;
pub mod subscription;
pub mod tag_index;
pub mod tags;
pub mod timestamp;

mod types;

// re-export commonly used types
pub use envelopes::{ClientMessage, CountResponse, DecodeError, Envelope, RelayMessage};
pub use event::{Event, EventError};
pub use event_template::{compute_id, EventTemplate, UnsignedEvent};
pub use filter::{matches_any, validate_request, Filter, FilterRejected, SearchMatcher};
pub use keys::{PubKey, SecretKey};
pub use normalize::*;
pub use relay_information::{Limitation, RelayInformationDocument};
pub use server::{CustomRelay, RelayHub, SessionOptions};
pub use signature::{SignatureGate, Verification};
pub use subscription::{
    Anomaly, CloseReason, Dispatch, Occurrence, RouterOptions, Subscription, SubscriptionManager,
    SubscriptionState,
};
pub use tag_index::TagIndex;
pub use tags::{Tag, Tags};
pub use timestamp::Timestamp;
pub use types::*;
