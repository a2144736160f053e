pub mod archive;
pub mod channel;
pub mod codec;
pub mod commands;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod password;
pub mod protocol;
pub mod receiver;
pub mod rendezvous;
pub mod sender;
pub mod server;
pub mod transfer;

use std::time::Duration;

pub use error::{Error, Result};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const SALT_SIZE: usize = 8;

/// HKDF info string binding derived keys to this protocol version.
pub const KEY_INFO: &[u8] = b"portal-transfer-v1";

/// Plaintext bytes per transfer chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Frame caps. Rendezvous frames carry PAKE bodies and sealed address
/// hints; transfer frames carry one chunk plus counter and AEAD tag.
pub const RENDEZVOUS_MAX_FRAME: usize = 16 * 1024 * 1024;
pub const TRANSFER_MAX_FRAME: usize = 1024 * 1024;

pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DIRECT_DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// The receiver acknowledges progress every this many bytes or this much
/// time, whichever comes first.
pub const ACK_INTERVAL_BYTES: u64 = 4 * 1024 * 1024;
pub const ACK_INTERVAL: Duration = Duration::from_millis(250);

/// Broker limits.
pub const PAIRING_TTL: Duration = Duration::from_secs(600);
pub const MAX_PAIRINGS: usize = 1024;

/// How long cancellation waits for worker tasks to drain.
pub const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Bounded queue depths: control messages and bulk payload bytes.
pub const CONTROL_QUEUE: usize = 16;
pub const BULK_QUEUE: usize = 4;

pub const DEFAULT_RENDEZVOUS_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_RENDEZVOUS_PORT: u16 = 80;
