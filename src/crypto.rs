use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secp256k1::ecdsa::Signature;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Lowercase hex SHA-256 digest of raw bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Canonical JSON of any serializable value: object keys sorted,
/// no insignificant whitespace.
///
/// `serde_json::Value` keeps object members in a `BTreeMap`, so routing
/// the value through `to_value` yields the sorted-keys form that every
/// node must agree on before hashing.
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(json) => json.to_string(),
        Err(e) => {
            warn!("Failed to canonicalize value for hashing: {:?}", e);
            String::new()
        }
    }
}

/// SHA-256 over the canonical JSON of a value.
pub fn hash_value<T: Serialize>(value: &T) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

fn seed_message(seed: &str) -> Message {
    let digest: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
    Message::from_digest_slice(&digest).expect("SHA-256 digest is 32 bytes")
}

/// A single candidate's entry in a leader election round.
///
/// The signature is an ECDSA signature over the election seed under the
/// candidate's ephemeral key. Signing is deterministic (RFC 6979), so the
/// pair (key, seed) always yields the same `output_hash`: unpredictable
/// without the private key, verifiable by anyone holding the public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Base64 of the compressed SEC1 public key.
    pub public_key: String,
    /// Base64 of the compact 64-byte ECDSA signature over the seed.
    pub signature: String,
    /// Lowercase hex SHA-256 of the compact signature bytes.
    pub output_hash: String,
    /// The `host:port` address of the candidate node.
    pub candidate: String,
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("malformed public key: {0}")]
    PublicKey(String),

    #[error("malformed signature: {0}")]
    Signature(String),

    #[error("signature does not verify against the seed")]
    Verification,

    #[error("output hash does not match the signature digest")]
    OutputHash,
}

impl Submission {
    /// Check a submission against the seed of the current round.
    ///
    /// Verifies that (a) the signature is valid for the seed under the
    /// claimed public key and (b) the advertised output hash really is
    /// the digest of the signature. Either failure disqualifies the
    /// candidate from this round without aborting the election.
    pub fn verify(&self, seed: &str) -> Result<(), SubmissionError> {
        let key_bytes = BASE64
            .decode(&self.public_key)
            .map_err(|e| SubmissionError::PublicKey(e.to_string()))?;
        let public_key = PublicKey::from_slice(&key_bytes)
            .map_err(|e| SubmissionError::PublicKey(e.to_string()))?;

        let signature_bytes = BASE64
            .decode(&self.signature)
            .map_err(|e| SubmissionError::Signature(e.to_string()))?;
        let signature = Signature::from_compact(&signature_bytes)
            .map_err(|e| SubmissionError::Signature(e.to_string()))?;

        let secp = Secp256k1::verification_only();
        secp.verify_ecdsa(&seed_message(seed), &signature, &public_key)
            .map_err(|_| SubmissionError::Verification)?;

        if sha256_hex(&signature_bytes) != self.output_hash {
            return Err(SubmissionError::OutputHash);
        }

        Ok(())
    }
}

/// The ephemeral election identity of a node, generated at boot.
///
/// The key pair never leaves the process and is not persisted; a restarted
/// node simply competes under a fresh key in the next round.
pub struct Identity {
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Identity {
    /// Generate a fresh key pair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut rand::thread_rng());

        Identity {
            secp,
            secret_key,
            public_key,
        }
    }

    /// Build an identity from fixed secret key bytes.
    ///
    /// Panics on invalid key material; only deterministic test setups
    /// construct identities this way.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes).expect("32 bytes within the curve order");
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);

        Identity {
            secp,
            secret_key,
            public_key,
        }
    }

    /// Produce this node's submission for an election round with the
    /// given seed.
    pub fn sign_seed(&self, seed: &str, candidate: &str) -> Submission {
        let signature = self.secp.sign_ecdsa(&seed_message(seed), &self.secret_key);
        let signature_bytes = signature.serialize_compact();

        Submission {
            public_key: BASE64.encode(self.public_key.serialize()),
            signature: BASE64.encode(signature_bytes),
            output_hash: sha256_hex(&signature_bytes),
            candidate: candidate.to_string(),
        }
    }
}
