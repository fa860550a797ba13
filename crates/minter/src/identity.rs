//! Ed25519 caller identities and their self-authenticating principals.
//!
//! A principal is derived from the DER encoding of the caller's public key, the same
//! way Internet Computer agents derive it, so that principals registered through the
//! minter's API match the ones computed by existing tooling for the same keys.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use candid::Principal;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// DER prefix of an Ed25519 SubjectPublicKeyInfo (OID 1.3.101.112).
const ED25519_DER_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Domain separator of signed API calls.
const CALL_DOMAIN_SEPARATOR: &[u8] = b"eden-vault-call";

/// Names of the deterministic test identities.
pub const DEFAULT_IDENTITY_NAMES: [&str; 3] = ["alice", "bob", "charle"];

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("invalid seed: {0}")]
    InvalidSeed(String),
    #[error("a signed call needs both a public key and a signature")]
    IncompleteEnvelope,
}

/// Body of an API call. Unsigned envelopes are made by the anonymous principal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_pubkey: Option<String>,
    /// Expiry as nanoseconds since the unix epoch.
    pub ingress_expiry: u64,
    /// JSON-encoded argument of the method.
    pub arg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Envelope {
    pub fn unsigned(arg: impl Into<String>, ingress_expiry: u64) -> Self {
        Self {
            sender_pubkey: None,
            ingress_expiry,
            arg: arg.into(),
            signature: None,
        }
    }
}

/// Digest signed by the caller of `method`.
pub fn call_message(method: &str, ingress_expiry: u64, arg: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(CALL_DOMAIN_SEPARATOR);
    hasher.update(method.as_bytes());
    hasher.update([0u8]);
    hasher.update(ingress_expiry.to_be_bytes());
    hasher.update(arg.as_bytes());
    hasher.finalize().into()
}

/// Principal of the caller of `method`, after checking the envelope's signature.
pub fn verify_call(method: &str, envelope: &Envelope) -> Result<Principal, IdentityError> {
    match (&envelope.sender_pubkey, &envelope.signature) {
        (None, None) => Ok(Principal::anonymous()),
        (Some(public_key), Some(signature)) => {
            let public_key = BASE64
                .decode(public_key)
                .map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))?;
            let signature = BASE64
                .decode(signature)
                .map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;
            let message = call_message(method, envelope.ingress_expiry, &envelope.arg);
            verify_signature(&public_key, &message, &signature)
        }
        _ => Err(IdentityError::IncompleteEnvelope),
    }
}

#[derive(Clone)]
pub struct Identity {
    name: String,
    signing_key: SigningKey,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("principal", &self.principal().to_text())
            .finish()
    }
}

impl Identity {
    pub fn from_seed(name: impl Into<String>, seed: &[u8; 32]) -> Self {
        Self {
            name: name.into(),
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Identity whose secret key seed is `sha256(name)`.
    pub fn from_name(name: &str) -> Self {
        let seed: [u8; 32] = Sha256::digest(name.as_bytes()).into();
        Self::from_seed(name, &seed)
    }

    /// Identity from a hex-encoded 32-byte seed.
    pub fn from_hex_seed(seed: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(seed.trim_start_matches("0x"))
            .map_err(|e| IdentityError::InvalidSeed(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidSeed("expected 32 bytes".to_string()))?;
        Ok(Self::from_seed("custom", &seed))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn principal(&self) -> Principal {
        principal_of_public_key(&self.public_key())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    pub fn sign_call(&self, method: &str, arg: impl Into<String>, ingress_expiry: u64) -> Envelope {
        let arg = arg.into();
        let signature = self.sign(&call_message(method, ingress_expiry, &arg));
        Envelope {
            sender_pubkey: Some(BASE64.encode(self.public_key())),
            ingress_expiry,
            arg,
            signature: Some(BASE64.encode(signature)),
        }
    }
}

/// The `alice`, `bob` and `charle` identities, in that order.
pub fn default_identities() -> [Identity; 3] {
    DEFAULT_IDENTITY_NAMES.map(Identity::from_name)
}

pub fn der_encode_public_key(public_key: &[u8; 32]) -> Vec<u8> {
    let mut der = Vec::with_capacity(ED25519_DER_PREFIX.len() + public_key.len());
    der.extend_from_slice(&ED25519_DER_PREFIX);
    der.extend_from_slice(public_key);
    der
}

pub fn principal_of_public_key(public_key: &[u8; 32]) -> Principal {
    Principal::self_authenticating(der_encode_public_key(public_key))
}

/// Verifies `signature` over `message` and returns the signer's principal.
pub fn verify_signature(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<Principal, IdentityError> {
    let public_key: [u8; 32] = public_key
        .try_into()
        .map_err(|_| IdentityError::InvalidPublicKey("expected 32 bytes".to_string()))?;
    let verifying_key = VerifyingKey::from_bytes(&public_key)
        .map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;
    verifying_key
        .verify(message, &signature)
        .map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;
    Ok(principal_of_public_key(&public_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identities_are_deterministic() {
        let [alice, bob, charle] = default_identities();
        assert_eq!(alice.principal(), Identity::from_name("alice").principal());
        assert_ne!(alice.principal(), bob.principal());
        assert_ne!(bob.principal(), charle.principal());
        assert_eq!(charle.name(), "charle");
    }

    #[test]
    fn test_principal_is_self_authenticating() {
        let alice = Identity::from_name("alice");
        let bytes = alice.principal().as_slice().to_vec();
        // sha224 digest followed by the self-authenticating tag
        assert_eq!(bytes.len(), 29);
        assert_eq!(bytes[28], 0x02);
    }

    #[test]
    fn test_signature_verifies_to_principal() {
        let bob = Identity::from_name("bob");
        let signature = bob.sign(b"hello");
        let principal = verify_signature(&bob.public_key(), b"hello", &signature).unwrap();
        assert_eq!(principal, bob.principal());

        assert!(verify_signature(&bob.public_key(), b"tampered", &signature).is_err());
    }

    #[test]
    fn test_signed_call() {
        let alice = Identity::from_name("alice");
        let envelope = alice.sign_call("erc20_my_balance", "null", 1_000);
        assert_eq!(verify_call("erc20_my_balance", &envelope).unwrap(), alice.principal());

        // the method is part of the signed message
        assert!(verify_call("set_admin", &envelope).is_err());

        let mut tampered = envelope.clone();
        tampered.arg = "1".to_string();
        assert!(verify_call("erc20_my_balance", &tampered).is_err());

        let mut half_signed = envelope;
        half_signed.signature = None;
        assert!(matches!(
            verify_call("erc20_my_balance", &half_signed),
            Err(IdentityError::IncompleteEnvelope)
        ));
    }

    #[test]
    fn test_unsigned_call_is_anonymous() {
        let envelope = Envelope::unsigned("null", 1);
        assert_eq!(
            verify_call("minter_address", &envelope).unwrap(),
            Principal::anonymous()
        );
    }

    #[test]
    fn test_hex_seed() {
        let seed = hex::encode(Sha256::digest(b"alice"));
        let identity = Identity::from_hex_seed(&seed).unwrap();
        assert_eq!(identity.principal(), Identity::from_name("alice").principal());
        assert!(Identity::from_hex_seed("abcd").is_err());
    }
}
