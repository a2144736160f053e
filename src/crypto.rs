use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use spake2::{Ed25519Group, Identity, Password as PakePassword, Spake2};

use crate::error::{Error, Result};
use crate::{KEY_INFO, KEY_SIZE, NONCE_SIZE, SALT_SIZE};

/// Which way a message travels on a secured channel. The tag goes into
/// the nonce so the two directions can never collide on a counter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LeaderToFollower,
    FollowerToLeader,
}

impl Direction {
    fn tag(self) -> [u8; 4] {
        match self {
            Direction::LeaderToFollower => [0, 0, 0, 1],
            Direction::FollowerToLeader => [0, 0, 0, 2],
        }
    }
}

/// Role in the key exchange. The file sender leads: it speaks first and
/// picks the salt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

impl Role {
    pub fn outbound(self) -> Direction {
        match self {
            Role::Leader => Direction::LeaderToFollower,
            Role::Follower => Direction::FollowerToLeader,
        }
    }

    pub fn inbound(self) -> Direction {
        match self {
            Role::Leader => Direction::FollowerToLeader,
            Role::Follower => Direction::LeaderToFollower,
        }
    }
}

/// Both sides must agree on the exchange identity. Hashing the session id
/// gives them a common value the broker already knows, without leaking
/// anything about the words.
fn exchange_identity(id: u32) -> Identity {
    let mut hasher = Sha256::default();
    hasher.update(b"portal-session");
    hasher.update(id.to_be_bytes());
    Identity::new(&hasher.finalize())
}

/// Starts the symmetric key exchange over the full password string.
/// Returns the in-flight state and the first message for the peer.
pub fn start_pake(password: &str, id: u32) -> (Spake2<Ed25519Group>, Vec<u8>) {
    Spake2::<Ed25519Group>::start_symmetric(
        &PakePassword::new(password.as_bytes()),
        &exchange_identity(id),
    )
}

/// Completes the exchange with the peer's message. A garbled message
/// fails here; a wrong password does not (symmetric SPAKE2 silently
/// yields mismatched secrets), so callers confirm the key on the first
/// sealed message instead.
pub fn finish_pake(state: Spake2<Ed25519Group>, peer_body: &[u8]) -> Result<Vec<u8>> {
    state.finish(peer_body).map_err(|_| Error::PakeFail)
}

pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derives the session key from the exchange secret.
pub fn derive_key(secret: &[u8], salt: &[u8; SALT_SIZE]) -> [u8; KEY_SIZE] {
    let hkdf = Hkdf::<Sha256>::new(Some(&salt[..]), secret);
    let mut key = [0u8; KEY_SIZE];
    hkdf.expand(KEY_INFO, &mut key)
        .expect("32 bytes is a valid hkdf output length");
    key
}

pub fn cipher(key: &[u8; KEY_SIZE]) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(key.into())
}

fn nonce(counter: u64, direction: Direction) -> Nonce {
    let mut bytes = [0u8; NONCE_SIZE];
    bytes[..8].copy_from_slice(&counter.to_be_bytes());
    bytes[8..].copy_from_slice(&direction.tag());
    Nonce::from(bytes)
}

/// Encrypts one message body under a per-direction counter.
pub fn seal(
    cipher: &ChaCha20Poly1305,
    counter: u64,
    direction: Direction,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    cipher
        .encrypt(&nonce(counter, direction), plaintext)
        .map_err(|_| Error::AuthFail)
}

/// Decrypts one message body. Fails with `AuthFail` on any tampering or
/// key mismatch.
pub fn open(
    cipher: &ChaCha20Poly1305,
    counter: u64,
    direction: Direction,
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    cipher
        .decrypt(&nonce(counter, direction), ciphertext)
        .map_err(|_| Error::AuthFail)
}
