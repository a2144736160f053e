use std::path::Path;

use log::debug;
use tokio::sync::mpsc;

use crate::archive::{self, ChunkReader};
use crate::error::{Error, Result};
use crate::events::ReceiverEvent;
use crate::password::Password;
use crate::rendezvous;
use crate::transfer;
use crate::BULK_QUEUE;

#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    pub rendezvous_address: String,
    pub rendezvous_port: u16,
}

/// Receives the transfer named by the password and extracts it into
/// `dest`. Returns the top-level names that were written. Dropping the
/// future closes every connection it opened.
pub async fn receive(
    options: &ReceiveOptions,
    password: &Password,
    dest: &Path,
    events: mpsc::Sender<ReceiverEvent>,
) -> Result<Vec<String>> {
    let addr = rendezvous::resolve(&options.rendezvous_address, options.rendezvous_port).await?;
    let mut session = rendezvous::connect_receiver(addr, password.id).await?;
    let (sealer, opener) = session.exchange_key(password).await?;
    let _ = events.send(ReceiverEvent::PeerConnected).await;

    let peer = session.negotiate(sealer, opener).await?;
    debug!("transfer path negotiated: {:?}", peer.mode);

    let (chunks_tx, chunks_rx) = mpsc::channel(BULK_QUEUE);
    let dest = dest.to_path_buf();
    let unpack_task =
        tokio::task::spawn_blocking(move || archive::unpack(ChunkReader::new(chunks_rx), &dest));

    let transferred =
        transfer::receive_payload(peer.reader, peer.writer, chunks_tx, events.clone()).await;
    let unpacked = unpack_task.await.map_err(|_| Error::Cancelled)?;

    let files = match (transferred, unpacked) {
        (Ok(_), Ok(files)) => files,
        // The pipeline hanging up mid-transfer means extraction died
        // first; its error is the root cause.
        (Err(Error::Cancelled), Err(err)) => return Err(err),
        (Err(err), _) => return Err(err),
        (Ok(_), Err(err)) => return Err(err),
    };

    let _ = events
        .send(ReceiverEvent::Done {
            files: files.clone(),
        })
        .await;
    Ok(files)
}
