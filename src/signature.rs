//! two-stage event verification
//!
//! the id is recomputed first; only when it matches is the (much more
//! expensive) signature check run. a forged id therefore never reaches the
//! verifier.

use crate::crypto::{Digester, Schnorr, SignatureVerifier};
use crate::event::EventError;
use crate::{Event, ID};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// outcome of verifying an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Valid,
    InvalidId,
    InvalidSignature,
    Malformed(EventError),
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid)
    }

    /// the prefixed reason a relay sends back in a rejecting OK
    pub fn ok_reason(&self) -> Option<String> {
        match self {
            Verification::Valid => None,
            Verification::InvalidId => Some("invalid: event id does not match".to_string()),
            Verification::InvalidSignature => {
                Some("invalid: signature verification failed".to_string())
            }
            Verification::Malformed(err) => Some(format!("invalid: {err}")),
        }
    }
}

#[derive(Error, Debug)]
pub enum GateError {
    #[error("verification task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Default)]
pub struct SignatureGate<D = Schnorr, V = Schnorr> {
    digester: D,
    verifier: V,
}

impl SignatureGate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<D: Digester, V: SignatureVerifier> SignatureGate<D, V> {
    pub fn with(digester: D, verifier: V) -> Self {
        Self { digester, verifier }
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    pub fn verify(&self, event: &Event) -> Verification {
        let computed = ID::from_bytes(self.digester.hash(&event.canonicalize()));
        if computed != event.id {
            return Verification::InvalidId;
        }

        if self.verifier.verify(&event.pubkey, &event.id, &event.sig) {
            Verification::Valid
        } else {
            Verification::InvalidSignature
        }
    }

    /// classify raw JSON, shape errors included
    pub fn verify_value(&self, value: &Value) -> Verification {
        match Event::from_value(value) {
            Ok(event) => self.verify(&event),
            Err(err) => Verification::Malformed(err),
        }
    }
}

impl<D, V> SignatureGate<D, V>
where
    D: Digester + 'static,
    V: SignatureVerifier + 'static,
{
    /// run the checks on the blocking pool, handing the event back with its verdict
    pub async fn verify_async(self: Arc<Self>, event: Event) -> Result<(Event, Verification), GateError> {
        let verdict = tokio::task::spawn_blocking(move || {
            let verification = self.verify(&event);
            (event, verification)
        })
        .await?;
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventTemplate, Kind, PubKey, SecretKey, Signature};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingVerifier {
        calls: AtomicUsize,
        answer: bool,
    }

    impl SignatureVerifier for CountingVerifier {
        fn verify(&self, _: &PubKey, _: &ID, _: &Signature) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    fn event() -> Event {
        EventTemplate::new(Kind::TEXT, "hello").finalize(&SecretKey::generate())
    }

    #[test]
    fn test_valid_event() {
        assert_eq!(SignatureGate::new().verify(&event()), Verification::Valid);
        assert_eq!(event().verify(), Verification::Valid);
    }

    #[test]
    fn test_invalid_id_skips_verifier() {
        let gate = SignatureGate::with(
            Schnorr,
            CountingVerifier {
                answer: true,
                ..Default::default()
            },
        );

        let mut forged = event();
        forged.content = "changed".to_string();
        assert_eq!(gate.verify(&forged), Verification::InvalidId);
        assert_eq!(gate.verifier().calls.load(Ordering::SeqCst), 0);

        assert_eq!(gate.verify(&event()), Verification::Valid);
        assert_eq!(gate.verifier().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bad_signature() {
        let mut evt = event();
        evt.sig = event().sig;
        assert_eq!(SignatureGate::new().verify(&evt), Verification::InvalidSignature);

        let rejecting = SignatureGate::with(Schnorr, CountingVerifier::default());
        assert_eq!(rejecting.verify(&event()), Verification::InvalidSignature);
    }

    #[test]
    fn test_verify_value_malformed() {
        let gate = SignatureGate::new();
        let verdict = gate.verify_value(&json!({"kind": 1}));
        assert!(matches!(verdict, Verification::Malformed(_)));
        assert!(verdict.ok_reason().unwrap().starts_with("invalid: "));

        let value = serde_json::to_value(event()).unwrap();
        assert_eq!(gate.verify_value(&value), Verification::Valid);
    }

    #[test]
    fn test_ok_reasons() {
        assert_eq!(Verification::Valid.ok_reason(), None);
        assert_eq!(
            Verification::InvalidId.ok_reason().unwrap(),
            "invalid: event id does not match"
        );
        assert_eq!(
            Verification::InvalidSignature.ok_reason().unwrap(),
            "invalid: signature verification failed"
        );
    }

    #[tokio::test]
    async fn test_verify_async() {
        let gate = Arc::new(SignatureGate::new());
        let evt = event();
        let (back, verdict) = gate.clone().verify_async(evt.clone()).await.unwrap();
        assert_eq!(back, evt);
        assert!(verdict.is_valid());
    }
}
