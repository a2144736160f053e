use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use crate::codec::{self, FrameReader, FrameWriter};
use crate::error::{Error, Result};
use crate::protocol::{CloseReason, RendezvousMsg, TransferMode};
use crate::{CONTROL_QUEUE, MAX_PAIRINGS, PAIRING_TTL, RENDEZVOUS_MAX_FRAME};

pub struct ServerConfig {
    pub port: u16,
    pub max_pairings: usize,
    pub pairing_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: crate::DEFAULT_RENDEZVOUS_PORT,
            max_pairings: MAX_PAIRINGS,
            pairing_ttl: PAIRING_TTL,
        }
    }
}

/// What a connection's writer task is told to do next. `Hangup` drops the
/// write half, which signals EOF to the client.
enum Outbound {
    Frame(Vec<u8>),
    Hangup,
}

type OutboundTx = mpsc::Sender<Outbound>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Sender,
    Receiver,
}

/// One pairing is in exactly one of these at a time; PAKE forwarding and
/// blind relay never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairingState {
    AwaitingReceiver,
    Pake,
    Negotiate {
        sender_relay_ready: bool,
        receiver_relay_ready: bool,
        decided: Option<TransferMode>,
    },
    Relay,
}

struct Pairing {
    sender_tx: OutboundTx,
    receiver_tx: Option<OutboundTx>,
    state: PairingState,
}

struct Shared {
    pairings: Mutex<HashMap<u32, Pairing>>,
    max_pairings: usize,
    pairing_ttl: Duration,
}

/// The rendezvous broker. Pairs a sender and a receiver by id, shuttles
/// their key exchange, and turns into a blind byte forwarder when the
/// session settles on relay mode. It never holds key material.
pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Server> {
        let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
        Ok(Server {
            listener,
            shared: Arc::new(Shared {
                pairings: Mutex::new(HashMap::new()),
                max_pairings: config.max_pairings,
                pairing_ttl: config.pairing_ttl,
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        info!("rendezvous server listening on {}", self.listener.local_addr()?);
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!("connection from {peer}");
            let shared = self.shared.clone();
            tokio::spawn(handle_connection(stream, shared));
        }
    }
}

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, RENDEZVOUS_MAX_FRAME);
    let (tx, rx) = mpsc::channel(CONTROL_QUEUE);
    let writer_task = tokio::spawn(write_outbound(FrameWriter::new(write_half), rx));

    if let Err(err) = serve_peer(&mut reader, tx.clone(), &shared).await {
        debug!("connection ended: {err}");
    }
    drop(tx);
    let _ = writer_task.await;
}

async fn write_outbound(mut writer: FrameWriter<OwnedWriteHalf>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if writer.write_frame(&frame).await.is_err() {
                    break;
                }
            }
            Outbound::Hangup => break,
        }
    }
}

async fn serve_peer(
    reader: &mut FrameReader<OwnedReadHalf>,
    tx: OutboundTx,
    shared: &Arc<Shared>,
) -> Result<()> {
    match codec::timed(crate::HANDSHAKE_TIMEOUT, reader.read_msg()).await? {
        RendezvousMsg::SenderEstablish => serve_sender(reader, tx, shared).await,
        RendezvousMsg::ReceiverEstablish { id } => serve_receiver(reader, tx, shared, id).await,
        _ => {
            let _ = send_close(&tx, CloseReason::Unexpected).await;
            Err(Error::UnexpectedMessage)
        }
    }
}

async fn serve_sender(
    reader: &mut FrameReader<OwnedReadHalf>,
    tx: OutboundTx,
    shared: &Arc<Shared>,
) -> Result<()> {
    let id = {
        let mut pairings = shared.pairings.lock().await;
        if pairings.len() >= shared.max_pairings {
            drop(pairings);
            warn!("refusing sender: pairing cap reached");
            let _ = send_close(&tx, CloseReason::ServerBusy).await;
            return Err(Error::ServerBusy);
        }
        // Smallest free id keeps passwords short for humans.
        let id = (1u32..)
            .find(|candidate| !pairings.contains_key(candidate))
            .expect("fewer than u32::MAX pairings");
        pairings.insert(
            id,
            Pairing {
                sender_tx: tx.clone(),
                receiver_tx: None,
                state: PairingState::AwaitingReceiver,
            },
        );
        id
    };
    info!("session {id}: sender registered");
    if let Err(err) = send_msg(&tx, &RendezvousMsg::SenderBind { id }).await {
        teardown(shared, id).await;
        return Err(err);
    }

    let ttl_shared = shared.clone();
    let ttl_task = tokio::spawn(async move {
        tokio::time::sleep(ttl_shared.pairing_ttl).await;
        expire_pairing(&ttl_shared, id).await;
    });

    let result = pump(reader, shared, id, Side::Sender).await;
    ttl_task.abort();
    teardown(shared, id).await;
    result
}

async fn serve_receiver(
    reader: &mut FrameReader<OwnedReadHalf>,
    tx: OutboundTx,
    shared: &Arc<Shared>,
    id: u32,
) -> Result<()> {
    let sender_tx = {
        let mut pairings = shared.pairings.lock().await;
        match pairings.get_mut(&id) {
            Some(pairing) if pairing.state == PairingState::AwaitingReceiver => {
                pairing.receiver_tx = Some(tx.clone());
                pairing.state = PairingState::Pake;
                pairing.sender_tx.clone()
            }
            // Unknown id, expired session or an id that already has its
            // two peers: all look the same from the outside.
            _ => {
                drop(pairings);
                debug!("refusing receiver for id {id}");
                let _ = send_close(&tx, CloseReason::NoSuchSession).await;
                return Err(Error::NoSuchSession);
            }
        }
    };
    info!("session {id}: receiver joined");
    if let Err(err) = send_msg(&sender_tx, &RendezvousMsg::SenderReady).await {
        teardown(shared, id).await;
        return Err(err);
    }

    let result = pump(reader, shared, id, Side::Receiver).await;
    teardown(shared, id).await;
    result
}

/// Per-side read loop. Every inbound frame is routed under the pairing
/// lock, then forwarded outside it so one slow peer only stalls its own
/// pairing through the bounded outbound queue.
async fn pump(
    reader: &mut FrameReader<OwnedReadHalf>,
    shared: &Arc<Shared>,
    id: u32,
    side: Side,
) -> Result<()> {
    loop {
        let frame = reader.read_frame().await?;

        let action = {
            let mut pairings = shared.pairings.lock().await;
            let Some(pairing) = pairings.get_mut(&id) else {
                // Pairing already torn down; nothing left to route.
                return Ok(());
            };
            route(pairing, side, frame)?
        };

        match action {
            Action::Forward { to, frame } => {
                send_frame(&to, frame).await?;
            }
            Action::FinishDirect { to, frame } => {
                send_frame(&to, frame).await?;
                info!("session {id}: direct transfer agreed, stepping aside");
                teardown(shared, id).await;
                return Ok(());
            }
            Action::Discard => {}
            Action::CloseBoth { reason } => {
                teardown_with(shared, id, Some(reason)).await;
                return Err(Error::UnexpectedMessage);
            }
            Action::PeerGone { reason } => {
                teardown_with(shared, id, reason).await;
                return Ok(());
            }
        }
    }
}

enum Action {
    Forward { to: OutboundTx, frame: Vec<u8> },
    FinishDirect { to: OutboundTx, frame: Vec<u8> },
    Discard,
    CloseBoth { reason: CloseReason },
    PeerGone { reason: Option<CloseReason> },
}

/// Decides what to do with one inbound frame given the pairing state.
/// During PAKE, messages are re-tagged for the other side; once both
/// sides are relay-ready, frames are copied verbatim without parsing.
fn route(pairing: &mut Pairing, side: Side, frame: Vec<u8>) -> Result<Action> {
    let peer = |pairing: &Pairing| -> Result<OutboundTx> {
        match side {
            Side::Sender => pairing
                .receiver_tx
                .clone()
                .ok_or(Error::UnexpectedMessage),
            Side::Receiver => Ok(pairing.sender_tx.clone()),
        }
    };

    if pairing.state == PairingState::Relay {
        // Blind forwarding: the payload is ciphertext and none of our
        // business.
        return Ok(Action::Forward {
            to: peer(pairing)?,
            frame,
        });
    }

    let msg: RendezvousMsg = codec::decode(&frame)?;
    match (side, msg, pairing.state) {
        (Side::Sender, RendezvousMsg::SenderPake { body, salt }, PairingState::Pake) => {
            Ok(Action::Forward {
                to: peer(pairing)?,
                frame: codec::encode(&RendezvousMsg::PakeToReceiver { body, salt })?,
            })
        }
        (Side::Receiver, RendezvousMsg::ReceiverPake { body }, PairingState::Pake) => {
            pairing.state = PairingState::Negotiate {
                sender_relay_ready: false,
                receiver_relay_ready: false,
                decided: None,
            };
            Ok(Action::Forward {
                to: peer(pairing)?,
                frame: codec::encode(&RendezvousMsg::PakeToSender { body })?,
            })
        }
        (
            Side::Sender,
            RendezvousMsg::SenderReadyForTransfer { mode, .. },
            PairingState::Negotiate {
                sender_relay_ready: _,
                receiver_relay_ready,
                decided,
            },
        ) => {
            let sender_relay_ready = mode == TransferMode::Relay;
            pairing.state = if sender_relay_ready && receiver_relay_ready {
                PairingState::Relay
            } else {
                PairingState::Negotiate {
                    sender_relay_ready,
                    receiver_relay_ready,
                    decided,
                }
            };
            Ok(Action::Forward {
                to: peer(pairing)?,
                frame,
            })
        }
        (
            Side::Receiver,
            RendezvousMsg::ReceiverReadyForTransfer { mode },
            PairingState::Negotiate {
                sender_relay_ready,
                receiver_relay_ready: _,
                decided,
            },
        ) => {
            // First mode decision wins; a late contradicting one is
            // dropped on the floor.
            if decided.is_some() {
                return Ok(Action::Discard);
            }
            match mode {
                TransferMode::Direct => Ok(Action::FinishDirect {
                    to: pairing.sender_tx.clone(),
                    frame,
                }),
                TransferMode::Relay => {
                    pairing.state = if sender_relay_ready {
                        PairingState::Relay
                    } else {
                        PairingState::Negotiate {
                            sender_relay_ready,
                            receiver_relay_ready: true,
                            decided: Some(TransferMode::Relay),
                        }
                    };
                    Ok(Action::Forward {
                        to: pairing.sender_tx.clone(),
                        frame,
                    })
                }
            }
        }
        (_, RendezvousMsg::Close { reason }, _) => Ok(Action::PeerGone {
            reason: Some(reason),
        }),
        _ => Ok(Action::CloseBoth {
            reason: CloseReason::Unexpected,
        }),
    }
}

/// TTL expiry. Pairings that made it to relay mode are mid-transfer and
/// are left alone; everything earlier is torn down on both sides.
async fn expire_pairing(shared: &Arc<Shared>, id: u32) {
    let expired = {
        let mut pairings = shared.pairings.lock().await;
        match pairings.get(&id) {
            Some(pairing) if pairing.state != PairingState::Relay => pairings.remove(&id),
            _ => None,
        }
    };
    if let Some(pairing) = expired {
        info!("session {id}: expired");
        hang_up(&pairing.sender_tx, Some(CloseReason::SessionExpired)).await;
        if let Some(receiver_tx) = &pairing.receiver_tx {
            hang_up(receiver_tx, Some(CloseReason::SessionExpired)).await;
        }
    }
}

async fn teardown(shared: &Arc<Shared>, id: u32) {
    teardown_with(shared, id, None).await;
}

/// Removes the pairing and hangs up both halves, forwarding a close
/// reason when there is one to give.
async fn teardown_with(shared: &Arc<Shared>, id: u32, reason: Option<CloseReason>) {
    let removed = {
        let mut pairings = shared.pairings.lock().await;
        pairings.remove(&id)
    };
    if let Some(pairing) = removed {
        debug!("session {id}: torn down");
        hang_up(&pairing.sender_tx, reason).await;
        if let Some(receiver_tx) = &pairing.receiver_tx {
            hang_up(receiver_tx, reason).await;
        }
    }
}

async fn hang_up(tx: &OutboundTx, reason: Option<CloseReason>) {
    if let Some(reason) = reason {
        let _ = send_close(tx, reason).await;
    }
    let _ = tx.send(Outbound::Hangup).await;
}

async fn send_msg(tx: &OutboundTx, msg: &RendezvousMsg) -> Result<()> {
    send_frame(tx, codec::encode(msg)?).await
}

async fn send_frame(tx: &OutboundTx, frame: Vec<u8>) -> Result<()> {
    tx.send(Outbound::Frame(frame))
        .await
        .map_err(|_| Error::Io(std::io::ErrorKind::BrokenPipe.into()))
}

async fn send_close(tx: &OutboundTx, reason: CloseReason) -> Result<()> {
    send_msg(tx, &RendezvousMsg::Close { reason }).await
}
