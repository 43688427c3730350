//! The agent's root seed, per-channel key derivation, and the password
//! sealing scheme used to persist [`RootSeed`] at rest (§3, `seed` /
//! `encryptedSeed`; §4.4, `configInit`/`authenticate`).
//!
//! Grounded on the source workspace's `RootSeed` (label-based HKDF child
//! derivation, domain-separated by a fixed salt) with `ring::hkdf` swapped
//! for the plain `hkdf` crate, and secp256k1/BIP32 child keys swapped for
//! ed25519 strkey accounts (this ledger has no HD wallet standard of its
//! own, so we derive flat labeled children instead of a BIP32 tree).

use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use hmac::Hmac;
use pbkdf2::pbkdf2;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use starlight_common::AccountId;

/// Domain-separation salt for the root HKDF extract step. Equal to
/// `SHA-256(b"starlight-agent::RootSeed")`, computed once and inlined as in
/// the source crate (it doesn't need to be recomputed at runtime).
const HKDF_SALT: [u8; 32] = [
    0x9e, 0x0c, 0x12, 0x1e, 0x2e, 0x6e, 0x86, 0xc4, 0x35, 0x6e, 0x4d, 0x3e, 0x8b, 0x16, 0x9a, 0x5b,
    0x2b, 0x10, 0x9d, 0x21, 0xaf, 0x20, 0xcf, 0x3f, 0x0e, 0x9b, 0x39, 0x0d, 0xf0, 0x3b, 0x3a, 0x2d,
];

/// The agent's 32-byte root entropy. Every derived key -- the primary
/// account and every channel's escrow/host-ratchet/guest-ratchet keys --
/// traces back to this one secret.
pub struct RootSeed(Secret<[u8; 32]>);

impl RootSeed {
    pub const LENGTH: usize = 32;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(Secret::new(bytes))
    }

    /// Generates fresh entropy via the OS CSPRNG (`configInit`).
    pub fn generate() -> Self {
        let mut bytes = [0u8; Self::LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self::new(bytes)
    }

    fn hkdf(&self) -> Hkdf<Sha256> {
        Hkdf::<Sha256>::new(Some(&HKDF_SALT), self.0.expose_secret())
    }

    /// Derives a labeled 32-byte child secret.
    fn derive(&self, label: &[u8]) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.hkdf()
            .expand(label, &mut out)
            .expect("32 bytes is within HKDF-SHA256's output limit");
        out
    }

    fn derive_signing_key(&self, label: &[u8]) -> SigningKey {
        SigningKey::from_bytes(&self.derive(label))
    }

    /// Derives the primary account keypair (key index 0 is reserved for it;
    /// channel key indices start at 1).
    pub fn derive_primary_account(&self) -> SigningKey {
        self.derive_signing_key(b"primary-account")
    }

    /// Derives the three account keypairs consumed by a new channel:
    /// escrow, host-ratchet, guest-ratchet, indexed starting at `key_index`.
    pub fn derive_channel_accounts(&self, key_index: u64) -> ChannelAccountKeys {
        ChannelAccountKeys {
            escrow: self.derive_signing_key(&channel_label(key_index, b"escrow")),
            host_ratchet: self.derive_signing_key(&channel_label(key_index, b"host-ratchet")),
            guest_ratchet: self.derive_signing_key(&channel_label(key_index, b"guest-ratchet")),
        }
    }
}

fn channel_label(key_index: u64, role: &[u8]) -> Vec<u8> {
    let mut label = b"channel/".to_vec();
    label.extend_from_slice(&key_index.to_be_bytes());
    label.push(b'/');
    label.extend_from_slice(role);
    label
}

/// The three freshly derived account keypairs for a new channel (§4.4,
/// `doCreateChannel` step 3: "Allocate three key indices; derive escrow,
/// host-ratchet, guest-ratchet accounts").
pub struct ChannelAccountKeys {
    pub escrow: SigningKey,
    pub host_ratchet: SigningKey,
    pub guest_ratchet: SigningKey,
}

impl ChannelAccountKeys {
    pub fn escrow_account_id(&self) -> AccountId {
        to_account_id(&self.escrow)
    }

    pub fn host_ratchet_account_id(&self) -> AccountId {
        to_account_id(&self.host_ratchet)
    }

    pub fn guest_ratchet_account_id(&self) -> AccountId {
        to_account_id(&self.guest_ratchet)
    }
}

pub fn to_account_id(key: &SigningKey) -> AccountId {
    AccountId::from_public_key_bytes(key.verifying_key().to_bytes())
}

/// `RootSeed` is normally write-once per process (§3), but the dispatcher
/// needs a cheap owned copy to hand to each transaction's [`TxBuilder`]
/// without holding the agent-wide lock across FSM evaluation.
impl Clone for RootSeed {
    fn clone(&self) -> Self {
        RootSeed::new(*self.0.expose_secret())
    }
}

// --- password sealing --- //

const PBKDF2_ROUNDS: u32 = 600_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// A password-sealed [`RootSeed`], as persisted in the `encryptedSeed`
/// bucket: `version || salt || nonce || ciphertext‖tag`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedSeed(Vec<u8>);

const VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum UnsealError {
    #[error("encrypted seed blob is truncated or malformed")]
    Malformed,
    #[error("unsupported encrypted seed version {0}")]
    UnsupportedVersion(u8),
    #[error("password did not decrypt the seed (wrong password, or corrupted data)")]
    AuthenticationFailed,
}

impl EncryptedSeed {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Seals `seed` with a key derived from `password` via PBKDF2-HMAC-
    /// SHA256, then ChaCha20-Poly1305 AEAD-encrypts the seed bytes.
    pub fn seal(seed: &RootSeed, password: &str) -> Self {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = derive_key(password, &salt);
        let cipher = ChaCha20Poly1305::new((&key).into());
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, seed.0.expose_secret().as_slice())
            .expect("encryption over a fixed-size plaintext cannot fail");

        let mut out = Vec::with_capacity(1 + SALT_LEN + NONCE_LEN + ciphertext.len());
        out.push(VERSION);
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Self(out)
    }

    /// Unseals with `password`, failing closed on any integrity error: a
    /// wrong password must never yield a garbage seed.
    pub fn unseal(&self, password: &str) -> Result<RootSeed, UnsealError> {
        let buf = &self.0;
        if buf.len() < 1 + SALT_LEN + NONCE_LEN {
            return Err(UnsealError::Malformed);
        }
        let version = buf[0];
        if version != VERSION {
            return Err(UnsealError::UnsupportedVersion(version));
        }
        let salt = &buf[1..1 + SALT_LEN];
        let nonce_bytes = &buf[1 + SALT_LEN..1 + SALT_LEN + NONCE_LEN];
        let ciphertext = &buf[1 + SALT_LEN + NONCE_LEN..];

        let key = derive_key(password, salt);
        let cipher = ChaCha20Poly1305::new((&key).into());
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| UnsealError::AuthenticationFailed)?;

        let bytes: [u8; 32] = plaintext
            .try_into()
            .map_err(|_| UnsealError::Malformed)?;
        Ok(RootSeed::new(bytes))
    }
}

fn derive_key(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut key)
        .expect("output length matches Hmac<Sha256>'s block constraints");
    key
}

/// The salted, adaptive-KDF password hash stored in [`crate::AgentConfig`]
/// (§3, "password hash (salted adaptive KDF)"). Distinct from the key that
/// seals [`EncryptedSeed`] -- same PBKDF2 construction, independent salt --
/// so `authenticate` can reject a bad password with a plain equality check
/// before ever touching the sealed seed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Hashes `password`, encoding `salt || hash` as a single base64 string.
    pub fn hash(password: &str) -> Self {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let digest = derive_key(password, &salt);
        let mut out = Vec::with_capacity(SALT_LEN + digest.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&digest);
        PasswordHash(base64::engine::general_purpose::STANDARD.encode(out))
    }

    /// Constant-time-equivalent verification: recomputes the hash under the
    /// stored salt and compares digests. PBKDF2 output comparison doesn't
    /// need to be branch-free here -- the expensive KDF step already
    /// dominates any timing signal a naive `==` could leak.
    pub fn verify(&self, password: &str) -> bool {
        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(&self.0) else {
            return false;
        };
        if bytes.len() != SALT_LEN + 32 {
            return false;
        }
        let (salt, stored_digest) = bytes.split_at(SALT_LEN);
        let digest = derive_key(password, salt);
        digest == stored_digest
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn seal_then_unseal_roundtrips() {
        let seed = RootSeed::generate();
        let sealed = EncryptedSeed::seal(&seed, "correct horse battery staple");
        let unsealed = sealed.unseal("correct horse battery staple").unwrap();
        assert_eq!(seed.0.expose_secret(), unsealed.0.expose_secret());
    }

    #[test]
    fn wrong_password_fails_closed() {
        let seed = RootSeed::generate();
        let sealed = EncryptedSeed::seal(&seed, "right password");
        let err = sealed.unseal("wrong password").unwrap_err();
        assert!(matches!(err, UnsealError::AuthenticationFailed));
    }

    #[test]
    fn channel_derivation_is_deterministic_and_distinct() {
        let seed = RootSeed::new([7u8; 32]);
        let a = seed.derive_channel_accounts(1);
        let b = seed.derive_channel_accounts(1);
        assert_eq!(a.escrow_account_id(), b.escrow_account_id());

        let c = seed.derive_channel_accounts(4);
        assert_ne!(a.escrow_account_id(), c.escrow_account_id());
        assert_ne!(a.escrow_account_id(), a.host_ratchet_account_id());
        assert_ne!(a.host_ratchet_account_id(), a.guest_ratchet_account_id());
    }

    #[test]
    fn primary_account_is_deterministic() {
        let seed = RootSeed::new([1u8; 32]);
        let a = seed.derive_primary_account();
        let b = seed.derive_primary_account();
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn password_hash_verifies_matching_password_only() {
        let hash = PasswordHash::hash("hunter22");
        assert!(hash.verify("hunter22"));
        assert!(!hash.verify("hunter23"));
    }

    #[test]
    fn password_hash_salts_are_distinct_across_calls() {
        let a = PasswordHash::hash("same password");
        let b = PasswordHash::hash("same password");
        assert_ne!(a, b);
        assert!(a.verify("same password"));
        assert!(b.verify("same password"));
    }

    #[test]
    fn root_seed_clone_derives_identical_children() {
        let seed = RootSeed::new([5u8; 32]);
        let cloned = seed.clone();
        assert_eq!(
            seed.derive_primary_account().to_bytes(),
            cloned.derive_primary_account().to_bytes()
        );
    }
}
