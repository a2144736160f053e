use chacha20poly1305::ChaCha20Poly1305;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{self, FrameReader, FrameWriter};
use crate::crypto::{self, Direction, Role};
use crate::error::{Error, Result};
use crate::KEY_SIZE;

/// Seals outbound messages under a strictly increasing counter. The
/// counter is carried in clear ahead of the ciphertext and doubles as the
/// nonce, so it is authenticated by the AEAD tag.
pub struct Sealer {
    cipher: ChaCha20Poly1305,
    direction: Direction,
    next_counter: u64,
}

impl Sealer {
    pub fn seal<M: Serialize>(&mut self, msg: &M) -> Result<Vec<u8>> {
        let counter = self.next_counter;
        // Counters never wrap: u64 send counts are unreachable in practice
        // and wrapping would reuse a nonce.
        self.next_counter = counter.checked_add(1).ok_or(Error::Replay)?;
        let ciphertext = crypto::seal(&self.cipher, counter, self.direction, &codec::encode(msg)?)?;
        let mut body = Vec::with_capacity(8 + ciphertext.len());
        body.extend_from_slice(&counter.to_be_bytes());
        body.extend_from_slice(&ciphertext);
        Ok(body)
    }
}

/// Opens inbound sealed messages, enforcing that embedded counters only
/// move forward. An equal or smaller counter is a replay.
pub struct Opener {
    cipher: ChaCha20Poly1305,
    direction: Direction,
    last_counter: u64,
}

impl Opener {
    pub fn open<M: DeserializeOwned>(&mut self, body: &[u8]) -> Result<M> {
        if body.len() < 8 {
            return Err(Error::Malformed);
        }
        let counter = u64::from_be_bytes(body[..8].try_into().expect("sliced 8 bytes"));
        if counter <= self.last_counter {
            return Err(Error::Replay);
        }
        let plaintext = crypto::open(&self.cipher, counter, self.direction, &body[8..])?;
        // Only advance once the tag has verified, so a forged counter
        // cannot push the window forward.
        self.last_counter = counter;
        codec::decode(&plaintext)
    }
}

/// Builds the per-direction halves of a secured session from the derived
/// key. Counters start at one; zero stays below every accepted counter.
pub fn session_pair(key: &[u8; KEY_SIZE], role: Role) -> (Sealer, Opener) {
    let sealer = Sealer {
        cipher: crypto::cipher(key),
        direction: role.outbound(),
        next_counter: 1,
    };
    let opener = Opener {
        cipher: crypto::cipher(key),
        direction: role.inbound(),
        last_counter: 0,
    };
    (sealer, opener)
}

/// Writing half of a secured channel over some framed transport.
pub struct SecureWriter<W> {
    frames: FrameWriter<W>,
    sealer: Sealer,
}

impl<W: AsyncWrite + Unpin> SecureWriter<W> {
    pub fn new(frames: FrameWriter<W>, sealer: Sealer) -> Self {
        SecureWriter { frames, sealer }
    }

    pub async fn write_msg<M: Serialize>(&mut self, msg: &M) -> Result<()> {
        let body = self.sealer.seal(msg)?;
        self.frames.write_frame(&body).await
    }
}

/// Reading half of a secured channel.
pub struct SecureReader<R> {
    frames: FrameReader<R>,
    opener: Opener,
}

impl<R: AsyncRead + Unpin> SecureReader<R> {
    pub fn new(frames: FrameReader<R>, opener: Opener) -> Self {
        SecureReader { frames, opener }
    }

    pub async fn read_msg<M: DeserializeOwned>(&mut self) -> Result<M> {
        let body = self.frames.read_frame().await?;
        self.opener.open(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::codec::{FrameReader, FrameWriter};
    use crate::protocol::TransferMsg;

    fn pair() -> ((Sealer, Opener), (Sealer, Opener)) {
        let key = [42u8; KEY_SIZE];
        (
            session_pair(&key, Role::Leader),
            session_pair(&key, Role::Follower),
        )
    }

    #[test]
    fn sealed_messages_round_trip() {
        let ((mut seal_l, _), (_, mut open_f)) = pair();
        let body = seal_l
            .seal(&TransferMsg::SenderHandshake { payload_size: 99 })
            .unwrap();
        let msg: TransferMsg = open_f.open(&body).unwrap();
        assert_eq!(msg, TransferMsg::SenderHandshake { payload_size: 99 });
    }

    #[test]
    fn replayed_message_is_rejected() {
        let ((mut seal_l, _), (_, mut open_f)) = pair();
        let body = seal_l.seal(&TransferMsg::ReceiverHandshake).unwrap();
        let _: TransferMsg = open_f.open(&body).unwrap();
        match open_f.open::<TransferMsg>(&body) {
            Err(Error::Replay) => {}
            other => panic!("expected Replay, got {other:?}"),
        }
    }

    #[test]
    fn reordered_messages_are_rejected() {
        let ((mut seal_l, _), (_, mut open_f)) = pair();
        let first = seal_l.seal(&TransferMsg::SenderClose).unwrap();
        let second = seal_l.seal(&TransferMsg::ReceiverClose).unwrap();
        let _: TransferMsg = open_f.open(&second).unwrap();
        match open_f.open::<TransferMsg>(&first) {
            Err(Error::Replay) => {}
            other => panic!("expected Replay, got {other:?}"),
        }
    }

    #[test]
    fn failed_open_does_not_advance_the_window() {
        let ((mut seal_l, _), (_, mut open_f)) = pair();
        let good = seal_l.seal(&TransferMsg::SenderClose).unwrap();

        let mut forged = good.clone();
        forged[..8].copy_from_slice(&u64::MAX.to_be_bytes());
        assert!(open_f.open::<TransferMsg>(&forged).is_err());

        // The untouched original still opens.
        let msg: TransferMsg = open_f.open(&good).unwrap();
        assert_eq!(msg, TransferMsg::SenderClose);
    }

    #[test]
    fn opposite_directions_are_independent() {
        let ((mut seal_l, mut open_l), (mut seal_f, mut open_f)) = pair();
        let a = seal_l.seal(&TransferMsg::SenderClose).unwrap();
        let b = seal_f.seal(&TransferMsg::ReceiverClose).unwrap();
        let _: TransferMsg = open_f.open(&a).unwrap();
        let _: TransferMsg = open_l.open(&b).unwrap();
    }

    #[test]
    fn short_body_is_malformed() {
        let (_, (_, mut open_f)) = pair();
        match open_f.open::<TransferMsg>(&[1, 2, 3]) {
            Err(Error::Malformed) => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn secured_channel_over_a_stream() {
        let key = [9u8; KEY_SIZE];
        let (sealer, _) = session_pair(&key, Role::Leader);
        let (_, opener) = session_pair(&key, Role::Follower);

        let (client, server) = tokio::io::duplex(4096);
        let mut writer = SecureWriter::new(FrameWriter::new(client), sealer);
        let mut reader = SecureReader::new(FrameReader::new(server, 4096), opener);

        writer
            .write_msg(&TransferMsg::PayloadChunk(vec![5; 64]))
            .await
            .unwrap();
        let msg: TransferMsg = reader.read_msg().await.unwrap();
        assert_eq!(msg, TransferMsg::PayloadChunk(vec![5; 64]));
    }
}
