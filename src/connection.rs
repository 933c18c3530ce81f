//! Peer connections: a duplex message stream per other process, framed by
//! a length header (§3 "Peer / Worker entry", §4.1).
//!
//! Reading and writing run on independent halves so that a stalled peer
//! reader never blocks our writes to it (and vice versa) -- the same
//! tokio-split trick the teacher's runner uses for its TCP connections.

use crate::wire::Message;
use bytes::{Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

pub struct FrameReader<R> {
    inner: FramedRead<R, LengthDelimitedCodec>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, LengthDelimitedCodec::new()),
        }
    }

    /// Receives and deserializes exactly one message, or `None` on EOF or a
    /// framing error (§4.1 step 5; §7 "deserialization failure mid-stream"
    /// is surfaced to the caller as `None` too, since a corrupted stream is
    /// effectively fatal for that connection regardless of cause).
    pub async fn recv<V>(&mut self) -> Option<V>
    where
        V: DeserializeOwned,
    {
        use futures::stream::StreamExt;
        match self.inner.next().await {
            Some(Ok(bytes)) => match deserialize(bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("deserialization failure mid-stream: {:?}", e);
                    None
                }
            },
            Some(Err(e)) => {
                tracing::warn!("error reading from connection: {:?}", e);
                None
            }
            None => None,
        }
    }

    /// Reclaims the underlying transport, for the handshake-then-reuse
    /// pattern bootstrap needs (§4.8): one frame is exchanged before the
    /// connection is handed off to its long-lived reader/writer tasks.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

pub struct FrameWriter<W> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, LengthDelimitedCodec::new()),
        }
    }

    pub async fn send<V>(&mut self, value: &V) -> std::io::Result<()>
    where
        V: Serialize,
    {
        use futures::sink::SinkExt;
        self.inner.send(serialize(value)).await
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

fn deserialize<V>(bytes: BytesMut) -> bincode::Result<V>
where
    V: DeserializeOwned,
{
    bincode::deserialize(&bytes)
}

fn serialize<V>(value: &V) -> Bytes
where
    V: Serialize,
{
    let bytes = bincode::serialize(value).expect("message should be serializable");
    Bytes::from(bytes)
}

pub type MessageReader<R> = FrameReader<R>;
pub type MessageWriter<W> = FrameWriter<W>;

/// What the event loop knows about one peer connection: where outbound
/// messages go. The writer task owns the socket's write half; this is just
/// the channel that feeds it (§3, "per-peer outbound framing buffer").
pub struct PeerConn {
    pub outbound: tokio::sync::mpsc::UnboundedSender<Message>,
}

impl PeerConn {
    pub fn send(&self, msg: Message) {
        // the writer task may have exited after a connection error; that's
        // surfaced as an EOF to the peer's reader, not here.
        let _ = self.outbound.send(msg);
    }
}
