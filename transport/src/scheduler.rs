//! Outbound scheduling for one connection.
//!
//! Two lanes feed a single writer task. The control lane is a small channel
//! whose senders wait for room; the state lane is a bounded queue that
//! collapses into one full-state message when a slow peer lets it fill up.
//! The writer always prefers the control lane, so a backlog of state traffic
//! never delays an acknowledgement.

use crate::connection::Connection;
use crate::error::Error;
use crate::message::{Frame, ServerMessage};
use events::{CollapseQueue, EventType, Pushed};
use log::*;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Lanes {
    conn: Arc<dyn Connection>,
    control_tx: parking_lot::Mutex<Option<mpsc::Sender<ServerMessage>>>,
    control_rx: Mutex<mpsc::Receiver<ServerMessage>>,
    state: CollapseQueue<ServerMessage>,
    closing: CancellationToken,
}

impl Lanes {
    fn new(conn: Arc<dyn Connection>, state_lane_depth: usize) -> Self {
        let (control_tx, control_rx) = mpsc::channel(1);
        Self {
            conn,
            control_tx: parking_lot::Mutex::new(Some(control_tx)),
            control_rx: Mutex::new(control_rx),
            state: CollapseQueue::new(state_lane_depth),
            closing: CancellationToken::new(),
        }
    }

    /// The next message to write, by strict priority. `None` once closing,
    /// or once both lanes are shut and drained.
    async fn next_outgoing(
        &self,
        control: &mut mpsc::Receiver<ServerMessage>,
    ) -> Option<ServerMessage> {
        let (mut control_open, mut state_open) = (true, true);
        loop {
            tokio::select! {
                biased;
                _ = self.closing.cancelled() => return None,
                message = control.recv(), if control_open => match message {
                    Some(message) => return Some(message),
                    None => control_open = false,
                },
                message = self.state.pop(), if state_open => match message {
                    Some(message) => return Some(message),
                    None => state_open = false,
                },
                else => return None,
            }
        }
    }

    fn close(&self) {
        if !self.closing.is_cancelled() {
            debug!("Closing buffered connection");
        }
        self.closing.cancel();
        self.state.close();
        self.control_tx.lock().take();
        self.conn.close();
    }
}

async fn run_writer(lanes: Arc<Lanes>) {
    let mut control = lanes.control_rx.lock().await;
    while let Some(message) = lanes.next_outgoing(&mut control).await {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Dropping {} that could not be encoded: {e}", message.event_type());
                continue;
            }
        };
        if let Err(e) = lanes.conn.write_message(&frame).await {
            warn!("Writing {} failed, closing connection: {e}", message.event_type());
            break;
        }
        trace!("Wrote {} on the {:?} lane", message.event_type(), message.lane());
    }
    lanes.close();
}

/// A connection whose outbound traffic is scheduled across a control lane
/// and a state lane.
///
/// Closing is idempotent and may happen from anywhere: an explicit logout,
/// a failed write, or server shutdown. It unblocks every task waiting to
/// send or receive.
pub struct BufferedConnection {
    lanes: Arc<Lanes>,
    writer: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl BufferedConnection {
    /// Wrap `conn` and spawn its writer task. Must be called from within a
    /// Tokio runtime.
    pub fn new(conn: Arc<dyn Connection>, state_lane_depth: usize) -> Self {
        let buffered = Self::unstarted(conn, state_lane_depth);
        let writer = tokio::spawn(run_writer(Arc::clone(&buffered.lanes)));
        *buffered.writer.lock() = Some(writer);
        buffered
    }

    fn unstarted(conn: Arc<dyn Connection>, state_lane_depth: usize) -> Self {
        Self {
            lanes: Arc::new(Lanes::new(conn, state_lane_depth)),
            writer: parking_lot::Mutex::new(None),
        }
    }

    pub async fn read_message(&self) -> Result<Frame, Error> {
        self.lanes.conn.read_message().await
    }

    /// Hand a message to the writer, waiting for room in the control lane.
    /// Fails with `Closed` once the connection starts closing.
    pub async fn send_control(&self, message: ServerMessage) -> Result<(), Error> {
        let control = self.lanes.control_tx.lock().clone().ok_or_else(Error::closed)?;
        tokio::select! {
            biased;
            _ = self.lanes.closing.cancelled() => Err(Error::closed()),
            sent = control.send(message) => sent.map_err(|_| Error::closed()),
        }
    }

    /// Queue a message on the state lane without waiting. When the lane is
    /// full, `state` supplies the full-state message that replaces its
    /// contents; if that fails the lane is left as it was and the error is
    /// returned.
    pub fn send_state<E>(
        &self,
        message: ServerMessage,
        state: impl FnOnce() -> Result<ServerMessage, E>,
    ) -> Result<Pushed, E> {
        self.lanes.state.push_or_collapse(message, state)
    }

    /// Discard everything pending on the state lane in favour of `message`.
    /// Returns false when the connection is closed.
    pub fn reset_state(&self, message: ServerMessage) -> bool {
        self.lanes.state.replace_all(message)
    }

    /// Stop accepting messages, wait until everything already submitted has
    /// been written, then close.
    pub async fn finish(&self) {
        self.lanes.control_tx.lock().take();
        self.lanes.state.close();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!("Connection writer task failed: {e}");
            }
        }
        self.close();
    }

    pub fn close(&self) {
        self.lanes.close();
    }

    pub fn is_closed(&self) -> bool {
        self.lanes.closing.is_cancelled()
    }

    /// Wait until the connection starts closing.
    pub async fn closed(&self) {
        self.lanes.closing.cancelled().await
    }
}

impl Drop for BufferedConnection {
    fn drop(&mut self) {
        self.lanes.close();
    }
}
