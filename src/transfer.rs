use std::time::Instant;

use log::debug;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::channel::{SecureReader, SecureWriter};
use crate::codec::timed;
use crate::error::{Error, Result};
use crate::events::{ReceiverEvent, SenderEvent};
use crate::protocol::TransferMsg;
use crate::{ACK_INTERVAL, ACK_INTERVAL_BYTES, CHUNK_SIZE, HANDSHAKE_TIMEOUT, IDLE_TIMEOUT};

/// Streams the payload to the receiver. Waits for the receiver's opening
/// handshake, announces the size, then emits chunks without gating on
/// acknowledgments; TCP provides the backpressure. Acks only feed the
/// progress display.
pub async fn send_payload(
    reader: SecureReader<OwnedReadHalf>,
    mut writer: SecureWriter<OwnedWriteHalf>,
    payload: tokio::fs::File,
    size: u64,
    events: mpsc::Sender<SenderEvent>,
) -> Result<()> {
    match timed(HANDSHAKE_TIMEOUT, reader_first(reader)).await? {
        (TransferMsg::ReceiverHandshake, reader) => {
            writer
                .write_msg(&TransferMsg::SenderHandshake { payload_size: size })
                .await?;
            debug!("announced payload of {size} bytes");

            let ack_task = tokio::spawn(ack_loop(reader, events));

            let mut file = tokio::io::BufReader::new(payload);
            let mut buf = vec![0u8; CHUNK_SIZE];
            let mut sent = 0u64;
            while sent < size {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                writer
                    .write_msg(&TransferMsg::PayloadChunk(buf[..n].to_vec()))
                    .await?;
                sent += n as u64;
            }
            if sent != size {
                ack_task.abort();
                return Err(Error::SizeMismatch {
                    expected: size,
                    actual: sent,
                });
            }
            writer.write_msg(&TransferMsg::SenderClose).await?;
            debug!("payload sent, waiting for the receiver to close");

            match ack_task.await {
                Ok(result) => result,
                Err(_) => Err(Error::Cancelled),
            }
        }
        _ => Err(Error::UnexpectedMessage),
    }
}

// Threads the reader through so the handshake read and the ack loop can
// share ownership of it across the spawn boundary.
async fn reader_first(
    mut reader: SecureReader<OwnedReadHalf>,
) -> Result<(TransferMsg, SecureReader<OwnedReadHalf>)> {
    let msg = reader.read_msg().await?;
    Ok((msg, reader))
}

/// Consumes acknowledgments until the receiver closes. Progress updates
/// are best-effort; a full event queue never stalls the transfer.
async fn ack_loop(
    mut reader: SecureReader<OwnedReadHalf>,
    events: mpsc::Sender<SenderEvent>,
) -> Result<()> {
    loop {
        match timed(IDLE_TIMEOUT, reader.read_msg()).await? {
            TransferMsg::ReceiverAck { bytes_so_far } => {
                let _ = events.try_send(SenderEvent::Progress {
                    sent: bytes_so_far,
                });
            }
            TransferMsg::ReceiverClose => return Ok(()),
            _ => return Err(Error::UnexpectedMessage),
        }
    }
}

/// Receives the payload, pushing plaintext chunks into the extraction
/// pipeline. Acks every `ACK_INTERVAL_BYTES` or `ACK_INTERVAL`, whichever
/// comes first.
pub async fn receive_payload(
    mut reader: SecureReader<OwnedReadHalf>,
    mut writer: SecureWriter<OwnedWriteHalf>,
    sink: mpsc::Sender<Vec<u8>>,
    events: mpsc::Sender<ReceiverEvent>,
) -> Result<u64> {
    writer.write_msg(&TransferMsg::ReceiverHandshake).await?;
    let total = match timed(HANDSHAKE_TIMEOUT, reader.read_msg()).await? {
        TransferMsg::SenderHandshake { payload_size } => payload_size,
        _ => return Err(Error::UnexpectedMessage),
    };
    debug!("expecting {total} bytes");

    let mut received = 0u64;
    let mut acked = 0u64;
    let mut last_ack = Instant::now();
    loop {
        match timed(IDLE_TIMEOUT, reader.read_msg()).await? {
            TransferMsg::PayloadChunk(bytes) => {
                received += bytes.len() as u64;
                if received > total {
                    return Err(Error::SizeMismatch {
                        expected: total,
                        actual: received,
                    });
                }
                sink.send(bytes).await.map_err(|_| Error::Cancelled)?;

                if received - acked >= ACK_INTERVAL_BYTES || last_ack.elapsed() >= ACK_INTERVAL {
                    writer
                        .write_msg(&TransferMsg::ReceiverAck {
                            bytes_so_far: received,
                        })
                        .await?;
                    acked = received;
                    last_ack = Instant::now();
                    let _ = events.try_send(ReceiverEvent::Progress { received, total });
                }
            }
            TransferMsg::SenderClose => break,
            _ => return Err(Error::UnexpectedMessage),
        }
    }
    if received != total {
        return Err(Error::SizeMismatch {
            expected: total,
            actual: received,
        });
    }

    // Final ack so the sender's display reaches 100%, then close.
    writer
        .write_msg(&TransferMsg::ReceiverAck {
            bytes_so_far: received,
        })
        .await?;
    writer.write_msg(&TransferMsg::ReceiverClose).await?;
    debug!("received all {received} bytes");
    Ok(received)
}
