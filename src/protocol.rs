use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::SALT_SIZE;

/// Messages exchanged with the rendezvous broker. Encoded with bincode,
/// so each variant gets a small integer tag in declaration order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum RendezvousMsg {
    /// Sender announces itself and asks for an id.
    SenderEstablish,
    /// Broker binds the sender to an id.
    SenderBind { id: u32 },
    /// Receiver joins the session named by the password's id.
    ReceiverEstablish { id: u32 },
    /// Broker tells the sender its receiver has arrived.
    SenderReady,
    /// Sender's key-exchange message. The sender leads and picks the salt.
    SenderPake { body: Vec<u8>, salt: [u8; SALT_SIZE] },
    /// Broker-relayed copy of the sender's key-exchange message.
    PakeToReceiver { body: Vec<u8>, salt: [u8; SALT_SIZE] },
    /// Receiver's key-exchange reply.
    ReceiverPake { body: Vec<u8> },
    /// Broker-relayed copy of the receiver's key-exchange reply.
    PakeToSender { body: Vec<u8> },
    /// Sender's transfer proposal. The mode is routing metadata the broker
    /// arbitrates on; the payload is a sealed address hint the broker
    /// cannot read.
    SenderReadyForTransfer { mode: TransferMode, payload: Vec<u8> },
    /// Receiver's answer to the proposal.
    ReceiverReadyForTransfer { mode: TransferMode },
    /// Session teardown with a reason. Broker-originated for refusals and
    /// expiry, client-originated (and broker-forwarded) for fatal session
    /// errors.
    Close { reason: CloseReason },
}

/// How transfer bytes will travel once the handshake is done.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Direct,
    Relay,
}

/// Why a session was torn down.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    NoSuchSession,
    SessionExpired,
    ServerBusy,
    PakeFail,
    Cancelled,
    Unexpected,
}

/// Sealed inside `SenderReadyForTransfer`: the address to dial for a
/// direct connection, or `None` when the sender can only do relay.
/// Opening this is also the key confirmation step; a wrong password
/// surfaces here as an authentication failure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AddrHint {
    pub addr: Option<SocketAddr>,
}

/// Messages on the secured channel once rendezvous is done. Identical on
/// direct and relayed paths.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum TransferMsg {
    ReceiverHandshake,
    SenderHandshake { payload_size: u64 },
    PayloadChunk(Vec<u8>),
    ReceiverAck { bytes_so_far: u64 },
    SenderClose,
    ReceiverClose,
}
