use std::io;
use std::path::PathBuf;

use log::debug;
use tokio::sync::mpsc;

use crate::archive;
use crate::error::{Error, Result};
use crate::events::SenderEvent;
use crate::password::Password;
use crate::rendezvous;
use crate::transfer;

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub rendezvous_address: String,
    pub rendezvous_port: u16,
    /// Propose a direct peer-to-peer connection before falling back to
    /// relay. Off means the sender asks for relay outright, as it would
    /// if it could not bind a listener.
    pub allow_direct: bool,
}

/// Sends the given files to whoever presents the matching password.
/// Progress flows through `events`; the returned future completes when
/// the receiver has acknowledged the whole payload. Dropping the future
/// closes every connection it opened.
pub async fn send(
    options: &SendOptions,
    paths: Vec<PathBuf>,
    events: mpsc::Sender<SenderEvent>,
) -> Result<()> {
    for path in &paths {
        if !path.exists() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            )));
        }
    }

    // Stage the archive while the network side gets going.
    let pack_paths = paths.clone();
    let pack_task = tokio::task::spawn_blocking(move || archive::pack(&pack_paths));

    let addr = rendezvous::resolve(&options.rendezvous_address, options.rendezvous_port).await?;
    let mut session = rendezvous::connect_sender(addr).await?;
    let password = Password::generate(session.id);
    let _ = events
        .send(SenderEvent::PasswordReady(password.clone()))
        .await;

    session.wait_for_receiver().await?;
    let _ = events.send(SenderEvent::PeerConnected).await;

    let (sealer, opener) = session.exchange_key(&password).await?;
    let peer = session
        .negotiate(sealer, opener, options.allow_direct)
        .await?;
    debug!("transfer path negotiated: {:?}", peer.mode);

    let payload = pack_task.await.map_err(|_| Error::Cancelled)??;
    let size = payload.size();
    let file = tokio::fs::File::from_std(payload.into_file());

    transfer::send_payload(peer.reader, peer.writer, file, size, events.clone()).await?;
    let _ = events.send(SenderEvent::Done).await;
    Ok(())
}
