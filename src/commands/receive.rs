use std::path::PathBuf;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::events::ReceiverEvent;
use crate::password::Password;
use crate::receiver::{self, ReceiveOptions};
use crate::{CANCEL_GRACE, CONTROL_QUEUE};

/// Runs a receive session, rendering progress until extraction
/// completes.
pub async fn run(options: ReceiveOptions, password: Password, dest: PathBuf) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::channel(CONTROL_QUEUE);
    let mut task =
        tokio::spawn(async move { receiver::receive(&options, &password, &dest, events_tx).await });

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("connecting to the sender");
    let mut bar: Option<ProgressBar> = None;

    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(ReceiverEvent::PeerConnected) => {
                    spinner.set_message("sender connected, receiving");
                }
                Some(ReceiverEvent::Progress { received, total }) => {
                    let bar = bar.get_or_insert_with(|| {
                        spinner.finish_and_clear();
                        let bar = ProgressBar::new(total);
                        bar.set_style(
                            ProgressStyle::default_bar()
                                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                                .expect("progress template is valid"),
                        );
                        bar
                    });
                    bar.set_position(received);
                }
                Some(ReceiverEvent::Done { files }) => {
                    if let Some(bar) = &bar {
                        bar.finish_and_clear();
                    } else {
                        spinner.finish_and_clear();
                    }
                    println!("Received:");
                    for file in files {
                        println!("    {file}");
                    }
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
        Ok(result) => result.map(|_| ()),
        Err(_) => Err(Error::Cancelled),
    }
}
