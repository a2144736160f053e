use std::net::SocketAddr;

use log::debug;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use crate::channel::{self, Opener, Sealer, SecureReader, SecureWriter};
use crate::codec::{timed, FrameReader, FrameWriter};
use crate::crypto::{self, Role};
use crate::error::{Error, Result};
use crate::password::Password;
use crate::protocol::{AddrHint, CloseReason, RendezvousMsg, TransferMode};
use crate::{
    DIAL_TIMEOUT, DIRECT_DIAL_TIMEOUT, HANDSHAKE_TIMEOUT, RENDEZVOUS_MAX_FRAME,
    TRANSFER_MAX_FRAME,
};

/// A fully negotiated session: a secured channel over whichever transport
/// won, ready for the transfer handshake. The transfer layer cannot tell
/// the two modes apart.
pub struct SecuredPeer {
    pub reader: SecureReader<OwnedReadHalf>,
    pub writer: SecureWriter<OwnedWriteHalf>,
    pub mode: TransferMode,
}

fn secured_over(
    stream: TcpStream,
    sealer: Sealer,
    opener: Opener,
    mode: TransferMode,
) -> SecuredPeer {
    let (read_half, write_half) = stream.into_split();
    SecuredPeer {
        reader: SecureReader::new(FrameReader::new(read_half, TRANSFER_MAX_FRAME), opener),
        writer: SecureWriter::new(FrameWriter::new(write_half), sealer),
        mode,
    }
}

async fn dial(addr: SocketAddr) -> Result<TcpStream> {
    timed(DIAL_TIMEOUT, async { Ok(TcpStream::connect(addr).await?) }).await
}

/// Resolves the configured broker host and port to a dialable address.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("cannot resolve {host}"),
            ))
        })
}

/// Sender side of the rendezvous: dial, get bound to an id, wait for the
/// receiver, run the key exchange, then negotiate the transfer path.
#[derive(Debug)]
pub struct SenderRendezvous {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    local_addr: SocketAddr,
    pub id: u32,
}

pub async fn connect_sender(addr: SocketAddr) -> Result<SenderRendezvous> {
    let stream = dial(addr).await?;
    let local_addr = stream.local_addr()?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, RENDEZVOUS_MAX_FRAME);
    let mut writer = FrameWriter::new(write_half);

    writer.write_msg(&RendezvousMsg::SenderEstablish).await?;
    let id = match timed(HANDSHAKE_TIMEOUT, reader.read_msg()).await? {
        RendezvousMsg::SenderBind { id } => id,
        RendezvousMsg::Close { reason } => return Err(reason.into()),
        _ => return Err(Error::UnexpectedMessage),
    };
    debug!("bound to session id {id}");

    Ok(SenderRendezvous {
        reader,
        writer,
        local_addr,
        id,
    })
}

impl SenderRendezvous {
    /// Blocks until the receiver joins. No local deadline; the human on
    /// the other end may take a while to type the password, and the
    /// broker's TTL bounds the wait.
    pub async fn wait_for_receiver(&mut self) -> Result<()> {
        match self.reader.read_msg().await? {
            RendezvousMsg::SenderReady => Ok(()),
            RendezvousMsg::Close { reason } => Err(reason.into()),
            _ => Err(Error::UnexpectedMessage),
        }
    }

    /// Leads the key exchange: sends the first message and the salt,
    /// derives the session key from the reply.
    pub async fn exchange_key(&mut self, password: &Password) -> Result<(Sealer, Opener)> {
        let (state, body) = crypto::start_pake(&password.to_string(), self.id);
        let salt = crypto::generate_salt();
        self.writer
            .write_msg(&RendezvousMsg::SenderPake { body, salt })
            .await?;

        let peer_body = match timed(HANDSHAKE_TIMEOUT, self.reader.read_msg()).await? {
            RendezvousMsg::PakeToSender { body } => body,
            RendezvousMsg::Close { reason } => return Err(reason.into()),
            _ => return Err(Error::UnexpectedMessage),
        };
        let secret = crypto::finish_pake(state, &peer_body)?;
        let key = crypto::derive_key(&secret, &salt);
        Ok(channel::session_pair(&key, Role::Leader))
    }

    /// Proposes a direct connection when a listener can be bound, falls
    /// back to relay otherwise or when the receiver cannot reach us.
    pub async fn negotiate(
        self,
        mut sealer: Sealer,
        opener: Opener,
        allow_direct: bool,
    ) -> Result<SecuredPeer> {
        let SenderRendezvous {
            mut reader,
            mut writer,
            local_addr,
            id,
        } = self;

        let listener = if allow_direct {
            TcpListener::bind("0.0.0.0:0").await.ok()
        } else {
            None
        };
        let (proposed, hint) = match &listener {
            Some(listener) => {
                let port = listener.local_addr()?.port();
                let addr = SocketAddr::new(local_addr.ip(), port);
                debug!("proposing direct transfer on {addr}");
                (TransferMode::Direct, AddrHint { addr: Some(addr) })
            }
            None => (TransferMode::Relay, AddrHint { addr: None }),
        };
        let payload = sealer.seal(&hint)?;
        writer
            .write_msg(&RendezvousMsg::SenderReadyForTransfer {
                mode: proposed,
                payload,
            })
            .await?;

        let ack = match timed(HANDSHAKE_TIMEOUT, reader.read_msg()).await? {
            RendezvousMsg::ReceiverReadyForTransfer { mode } => mode,
            RendezvousMsg::Close { reason } => return Err(reason.into()),
            _ => return Err(Error::UnexpectedMessage),
        };

        match ack {
            TransferMode::Direct => {
                let listener = listener.ok_or(Error::UnexpectedMessage)?;
                let (stream, peer) = timed(DIAL_TIMEOUT, async {
                    Ok(listener.accept().await?)
                })
                .await?;
                debug!("session {id}: direct connection from {peer}");
                Ok(secured_over(stream, sealer, opener, TransferMode::Direct))
            }
            TransferMode::Relay => {
                if proposed == TransferMode::Direct {
                    // Settle on relay so the broker knows both sides are
                    // ready and can go blind.
                    let payload = sealer.seal(&AddrHint { addr: None })?;
                    writer
                        .write_msg(&RendezvousMsg::SenderReadyForTransfer {
                            mode: TransferMode::Relay,
                            payload,
                        })
                        .await?;
                }
                debug!("session {id}: transferring through the relay");
                reader.set_max_frame(TRANSFER_MAX_FRAME);
                Ok(SecuredPeer {
                    reader: SecureReader::new(reader, opener),
                    writer: SecureWriter::new(writer, sealer),
                    mode: TransferMode::Relay,
                })
            }
        }
    }
}

/// Receiver side of the rendezvous.
pub struct ReceiverRendezvous {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    pub id: u32,
}

pub async fn connect_receiver(addr: SocketAddr, id: u32) -> Result<ReceiverRendezvous> {
    let stream = dial(addr).await?;
    let (read_half, write_half) = stream.into_split();
    let reader = FrameReader::new(read_half, RENDEZVOUS_MAX_FRAME);
    let mut writer = FrameWriter::new(write_half);
    writer
        .write_msg(&RendezvousMsg::ReceiverEstablish { id })
        .await?;
    Ok(ReceiverRendezvous { reader, writer, id })
}

impl ReceiverRendezvous {
    /// Follows the key exchange. The sender's relayed message doubles as
    /// confirmation that the id named a waiting session.
    pub async fn exchange_key(&mut self, password: &Password) -> Result<(Sealer, Opener)> {
        let (peer_body, salt) = match timed(HANDSHAKE_TIMEOUT, self.reader.read_msg()).await? {
            RendezvousMsg::PakeToReceiver { body, salt } => (body, salt),
            RendezvousMsg::Close { reason } => return Err(reason.into()),
            _ => return Err(Error::UnexpectedMessage),
        };
        let (state, body) = crypto::start_pake(&password.to_string(), self.id);
        self.writer
            .write_msg(&RendezvousMsg::ReceiverPake { body })
            .await?;
        let secret = crypto::finish_pake(state, &peer_body)?;
        let key = crypto::derive_key(&secret, &salt);
        Ok(channel::session_pair(&key, Role::Follower))
    }

    /// Answers the sender's proposal: dial the hinted address if we can,
    /// otherwise ask for relay. Opening the sealed hint is also the key
    /// confirmation; a failure here means the passwords did not match.
    pub async fn negotiate(self, sealer: Sealer, mut opener: Opener) -> Result<SecuredPeer> {
        let ReceiverRendezvous {
            mut reader,
            mut writer,
            id,
        } = self;

        let (proposed, payload) = match timed(HANDSHAKE_TIMEOUT, reader.read_msg()).await? {
            RendezvousMsg::SenderReadyForTransfer { mode, payload } => (mode, payload),
            RendezvousMsg::Close { reason } => return Err(reason.into()),
            _ => return Err(Error::UnexpectedMessage),
        };
        let hint: AddrHint = match opener.open(&payload) {
            Ok(hint) => hint,
            Err(Error::AuthFail) => {
                // Key confirmation failed: the passwords disagree. Let the
                // sender know through the broker before giving up.
                let _ = writer
                    .write_msg(&RendezvousMsg::Close {
                        reason: CloseReason::PakeFail,
                    })
                    .await;
                return Err(Error::PakeFail);
            }
            Err(err) => return Err(err),
        };

        if let (TransferMode::Direct, Some(addr)) = (proposed, hint.addr) {
            match tokio::time::timeout(DIRECT_DIAL_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    debug!("session {id}: connected directly to {addr}");
                    writer
                        .write_msg(&RendezvousMsg::ReceiverReadyForTransfer {
                            mode: TransferMode::Direct,
                        })
                        .await?;
                    return Ok(secured_over(stream, sealer, opener, TransferMode::Direct));
                }
                _ => debug!("session {id}: cannot reach {addr}, falling back to relay"),
            }
        }

        writer
            .write_msg(&RendezvousMsg::ReceiverReadyForTransfer {
                mode: TransferMode::Relay,
            })
            .await?;
        if proposed == TransferMode::Direct {
            // Wait for the sender to settle on relay too.
            match timed(HANDSHAKE_TIMEOUT, reader.read_msg()).await? {
                RendezvousMsg::SenderReadyForTransfer {
                    mode: TransferMode::Relay,
                    ..
                } => {}
                RendezvousMsg::Close { reason } => return Err(reason.into()),
                _ => return Err(Error::UnexpectedMessage),
            }
        }
        debug!("session {id}: transferring through the relay");
        reader.set_max_frame(TRANSFER_MAX_FRAME);
        Ok(SecuredPeer {
            reader: SecureReader::new(reader, opener),
            writer: SecureWriter::new(writer, sealer),
            mode: TransferMode::Relay,
        })
    }
}
