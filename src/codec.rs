use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Reads length-prefixed frames from a byte stream: big-endian u32
/// length, then that many body bytes.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame: usize) -> Self {
        FrameReader { inner, max_frame }
    }

    /// Tightens or relaxes the frame cap, used when a rendezvous
    /// connection is repurposed for transfer chunks.
    pub fn set_max_frame(&mut self, max_frame: usize) {
        self.max_frame = max_frame;
    }

    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let len = self.inner.read_u32().await? as usize;
        if len > self.max_frame {
            return Err(Error::FrameTooLarge {
                len,
                max: self.max_frame,
            });
        }
        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).await?;
        Ok(body)
    }

    pub async fn read_msg<M: DeserializeOwned>(&mut self) -> Result<M> {
        let frame = self.read_frame().await?;
        decode(&frame)
    }
}

/// Writes length-prefixed frames. Flushes after every frame so relayed
/// connections never sit on buffered bytes.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        FrameWriter { inner }
    }

    pub async fn write_frame(&mut self, body: &[u8]) -> Result<()> {
        self.inner.write_u32(body.len() as u32).await?;
        self.inner.write_all(body).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn write_msg<M: Serialize>(&mut self, msg: &M) -> Result<()> {
        self.write_frame(&encode(msg)?).await
    }
}

pub fn encode<M: Serialize>(msg: &M) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|_| Error::Malformed)
}

pub fn decode<M: DeserializeOwned>(bytes: &[u8]) -> Result<M> {
    bincode::deserialize(bytes).map_err(|_| Error::Malformed)
}

/// Runs a protocol step under a deadline.
pub(crate) async fn timed<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::RendezvousMsg;

    #[tokio::test]
    async fn frames_round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, 1024);

        writer.write_frame(b"hello").await.unwrap();
        writer.write_frame(b"").await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap(), b"hello");
        assert_eq!(reader.read_frame().await.unwrap(), b"");
    }

    #[tokio::test]
    async fn typed_messages_round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, 1024);

        writer
            .write_msg(&RendezvousMsg::SenderBind { id: 3 })
            .await
            .unwrap();
        let msg: RendezvousMsg = reader.read_msg().await.unwrap();
        assert_eq!(msg, RendezvousMsg::SenderBind { id: 3 });
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, 16);

        writer.write_frame(&[0u8; 17]).await.unwrap();
        match reader.read_frame().await {
            Err(Error::FrameTooLarge { len: 17, max: 16 }) => {}
            other => panic!("expected FrameTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, 1024);

        writer.write_frame(&[0xff; 40]).await.unwrap();
        match reader.read_msg::<RendezvousMsg>().await {
            Err(Error::Malformed) => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_stream_is_io_error() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        // Announce 100 bytes but hang up after 3.
        use tokio::io::AsyncWriteExt;
        writer.inner.write_u32(100).await.unwrap();
        writer.inner.write_all(b"abc").await.unwrap();
        drop(writer);

        let mut reader = FrameReader::new(server, 1024);
        match reader.read_frame().await {
            Err(Error::Io(_)) => {}
            other => panic!("expected Io, got {other:?}"),
        }
    }
}
