use crate::error::Error;
use crate::message::Frame;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::*;
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// A message-oriented link to one remote client.
///
/// Reads and writes may run concurrently with each other, but callers must
/// not issue concurrent writes. `close` unblocks every pending read and
/// write, which then fail with `Closed`.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn read_message(&self) -> Result<Frame, Error>;

    async fn write_message(&self, frame: &Frame) -> Result<(), Error>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Newline-delimited JSON frames over TCP.
pub struct TcpConnection {
    peer: SocketAddr,
    reader: Mutex<FramedRead<OwnedReadHalf, LinesCodec>>,
    writer: Mutex<FramedWrite<OwnedWriteHalf, LinesCodec>>,
    closing: CancellationToken,
}

impl TcpConnection {
    /// Wrap an accepted stream. Inbound lines longer than `max_frame_length`
    /// bytes fail with `FrameTooLarge`.
    pub fn new(stream: TcpStream, max_frame_length: usize) -> Result<Self, Error> {
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            peer,
            reader: Mutex::new(FramedRead::new(
                read_half,
                LinesCodec::new_with_max_length(max_frame_length),
            )),
            writer: Mutex::new(FramedWrite::new(write_half, LinesCodec::new())),
            closing: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn read_message(&self) -> Result<Frame, Error> {
        let mut reader = tokio::select! {
            biased;
            _ = self.closing.cancelled() => return Err(Error::closed()),
            reader = self.reader.lock() => reader,
        };
        let line = tokio::select! {
            biased;
            _ = self.closing.cancelled() => return Err(Error::closed()),
            line = reader.next() => line,
        };
        match line {
            Some(Ok(line)) => Frame::decode(&line),
            Some(Err(e)) => Err(e.into()),
            None => {
                debug!("Peer {} closed its end of the connection", self.peer);
                self.close();
                Err(Error::closed())
            }
        }
    }

    async fn write_message(&self, frame: &Frame) -> Result<(), Error> {
        let line = frame.encode()?;
        let mut writer = tokio::select! {
            biased;
            _ = self.closing.cancelled() => return Err(Error::closed()),
            writer = self.writer.lock() => writer,
        };
        tokio::select! {
            biased;
            _ = self.closing.cancelled() => Err(Error::closed()),
            sent = writer.send(line) => sent.map_err(Error::from),
        }
    }

    fn close(&self) {
        self.closing.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }
}

/// One end of an in-process connection. Frames written on one end are read
/// from the other, in order.
pub struct MemoryConnection {
    incoming: Mutex<mpsc::Receiver<Frame>>,
    outgoing: parking_lot::Mutex<Option<mpsc::Sender<Frame>>>,
    closing: CancellationToken,
    peer_closing: CancellationToken,
}

/// Two connected ends, each buffering up to `capacity` unread frames before
/// writes to it wait.
pub fn memory_pair(capacity: usize) -> (MemoryConnection, MemoryConnection) {
    let (left_tx, right_rx) = mpsc::channel(capacity.max(1));
    let (right_tx, left_rx) = mpsc::channel(capacity.max(1));
    let (left_closing, right_closing) = (CancellationToken::new(), CancellationToken::new());

    let left = MemoryConnection {
        incoming: Mutex::new(left_rx),
        outgoing: parking_lot::Mutex::new(Some(left_tx)),
        closing: left_closing.clone(),
        peer_closing: right_closing.clone(),
    };
    let right = MemoryConnection {
        incoming: Mutex::new(right_rx),
        outgoing: parking_lot::Mutex::new(Some(right_tx)),
        closing: right_closing,
        peer_closing: left_closing,
    };
    (left, right)
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn read_message(&self) -> Result<Frame, Error> {
        let mut incoming = tokio::select! {
            biased;
            _ = self.closing.cancelled() => return Err(Error::closed()),
            incoming = self.incoming.lock() => incoming,
        };
        // Frames the peer wrote before closing are still delivered.
        tokio::select! {
            biased;
            _ = self.closing.cancelled() => Err(Error::closed()),
            frame = incoming.recv() => frame.ok_or_else(Error::closed),
        }
    }

    async fn write_message(&self, frame: &Frame) -> Result<(), Error> {
        let outgoing = self.outgoing.lock().clone().ok_or_else(Error::closed)?;
        tokio::select! {
            biased;
            _ = self.closing.cancelled() => Err(Error::closed()),
            _ = self.peer_closing.cancelled() => Err(Error::closed()),
            sent = outgoing.send(frame.clone()) => sent.map_err(|_| Error::closed()),
        }
    }

    fn close(&self) {
        self.closing.cancel();
        self.outgoing.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }
}
