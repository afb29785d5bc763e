//! cryptographic collaborators
//!
//! the protocol only composes three primitives: hashing the canonical form of an
//! event, signing that digest and verifying a signature over it. they sit behind
//! traits so that tests (and alternative backends) can stand in for them.
//! [`Schnorr`] is the real thing: sha256 + BIP-340 over secp256k1.

use crate::{PubKey, SecretKey, Signature, ID};
use secp256k1::{schnorr, SECP256K1};
use sha2::{Digest, Sha256};

/// `hash(bytes) -> digest`
pub trait Digester: Send + Sync {
    fn hash(&self, bytes: &[u8]) -> [u8; 32];
}

/// `verify(pubkey, digest, signature) -> bool`
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, pubkey: &PubKey, digest: &ID, sig: &Signature) -> bool;
}

/// `sign(privkey, digest) -> signature`
pub trait Signer: Send + Sync {
    fn sign(&self, secret_key: &SecretKey, digest: &ID) -> Signature;
}

/// sha256 digests and BIP-340 schnorr signatures
#[derive(Debug, Clone, Copy, Default)]
pub struct Schnorr;

impl Digester for Schnorr {
    fn hash(&self, bytes: &[u8]) -> [u8; 32] {
        Sha256::digest(bytes).into()
    }
}

impl SignatureVerifier for Schnorr {
    fn verify(&self, pubkey: &PubKey, digest: &ID, sig: &Signature) -> bool {
        let pubkey = match pubkey.to_xonly() {
            Ok(pk) => pk,
            Err(_) => return false,
        };

        let signature = schnorr::Signature::from_byte_array(sig.0);
        SECP256K1
            .verify_schnorr(&signature, digest.as_bytes(), &pubkey)
            .is_ok()
    }
}

impl Signer for Schnorr {
    fn sign(&self, secret_key: &SecretKey, digest: &ID) -> Signature {
        let signature = SECP256K1.sign_schnorr_no_aux_rand(digest.as_bytes(), secret_key.keypair());
        Signature::from_bytes(signature.to_byte_array())
    }
}
