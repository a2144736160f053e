use crate::password::Password;

/// Progress stream the sending side pushes to its consumer. The UI is
/// whoever sits on the other end of the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderEvent {
    /// The broker bound us to an id and the password is ready to be read
    /// out loud.
    PasswordReady(Password),
    PeerConnected,
    Progress { sent: u64 },
    Done,
}

/// Progress stream for the receiving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    PeerConnected,
    Progress { received: u64, total: u64 },
    Done { files: Vec<String> },
}
