use std::path::PathBuf;
use std::time::Duration;

use indicatif::{HumanBytes, ProgressBar};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::events::SenderEvent;
use crate::sender::{self, SendOptions};
use crate::{CANCEL_GRACE, CONTROL_QUEUE};

/// Runs a send session, printing the password and rendering progress
/// until the transfer completes. Ctrl-C cancels and drains the worker
/// within the grace period.
pub async fn run(options: SendOptions, paths: Vec<PathBuf>) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::channel(CONTROL_QUEUE);
    let mut task = tokio::spawn(async move { sender::send(&options, paths, events_tx).await });

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("connecting to the rendezvous server");

    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(SenderEvent::PasswordReady(password)) => {
                    spinner.suspend(|| {
                        println!("On the other computer, run:");
                        println!("    portal receive \x1b[1m{password}\x1b[0m");
                    });
                    spinner.set_message("waiting for the receiver to connect");
                }
                Some(SenderEvent::PeerConnected) => {
                    spinner.set_message("receiver connected, sending");
                }
                Some(SenderEvent::Progress { sent }) => {
                    spinner.set_message(format!("sent {}", HumanBytes(sent)));
                }
                Some(SenderEvent::Done) => {
                    spinner.finish_with_message("transfer complete");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                task.abort();
                let _ = tokio::time::timeout(CANCEL_GRACE, &mut task).await;
                spinner.finish_and_clear();
                return Err(Error::Cancelled);
            }
        }
    }

    match task.await {
        Ok(result) => result,
        Err(_) => Err(Error::Cancelled),
    }
}
