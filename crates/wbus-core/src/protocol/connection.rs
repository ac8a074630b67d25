//! Connection management
//!
//! Owns the split bus line: a reader task decodes frames into a small
//! inbound channel, and writes go straight out through the frame encoder.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error};

use super::{BusLine, Frame, ProtocolError, WBusCodec};

/// Frames buffered between the reader task and the transaction in progress
const INBOUND_CAPACITY: usize = 16;

/// Lifecycle of the link as seen by callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// Line reset and wake-up handshake in progress
    Initializing,
    /// Handshake completed, ready for commands
    Ready,
    /// Link error; the session is over
    Failed(String),
}

/// Cumulative traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusCounters {
    /// Frames written
    pub tx_frames: u64,
    /// Bytes written
    pub tx_bytes: u64,
    /// Frames received (after loopback suppression)
    pub rx_frames: u64,
    /// Frames discarded as stale before a request
    pub stale_frames: u64,
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The shared half-duplex bus: one writer, one inbound frame stream.
///
/// Owned by the transaction queue worker, which makes it the only writer
/// and the only frame consumer once the engine is running.
pub struct Bus {
    writer: FramedWrite<BoxedWriter, WBusCodec>,
    frames: mpsc::Receiver<Frame>,
    reader: JoinHandle<()>,
    counters: BusCounters,
}

impl Bus {
    /// Take ownership of a line and start decoding frames from it
    pub fn start<L: BusLine + 'static>(line: L, local: u8, remote: u8) -> Self {
        let (read_half, write_half) = tokio::io::split(line);
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);

        let framed = FramedRead::new(read_half, WBusCodec::new(local, remote));
        let reader = tokio::spawn(read_frames(framed, tx));

        let writer: BoxedWriter = Box::new(write_half);
        Self {
            writer: FramedWrite::new(writer, WBusCodec::new(local, remote)),
            frames: rx,
            reader,
            counters: BusCounters::default(),
        }
    }

    /// Write one frame and flush it onto the line
    pub async fn send(&mut self, frame: Frame) -> Result<(), ProtocolError> {
        debug!("W-Bus: write {}", frame);
        let size = frame.encoded_size() as u64;
        self.writer.send(frame).await.map_err(|e| {
            error!("W-Bus: write failed: {}", e);
            e
        })?;
        self.counters.tx_frames += 1;
        self.counters.tx_bytes += size;
        Ok(())
    }

    /// Wait for the next inbound frame
    pub async fn recv(&mut self) -> Result<Frame, ProtocolError> {
        let frame = self.frames.recv().await.ok_or(ProtocolError::LinkClosed)?;
        debug!("W-Bus: read {}", frame);
        self.counters.rx_frames += 1;
        Ok(frame)
    }

    /// Discard frames that arrived while nobody was waiting.
    ///
    /// Returns how many were dropped.
    pub fn drain_stale(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(frame) = self.frames.try_recv() {
            debug!("W-Bus: discarding stale {}", frame);
            dropped += 1;
        }
        self.counters.stale_frames += dropped as u64;
        dropped
    }

    /// Get cumulative traffic counters
    pub fn counters(&self) -> BusCounters {
        self.counters
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames<R>(mut framed: FramedRead<R, WBusCodec>, tx: mpsc::Sender<Frame>)
where
    R: AsyncRead + Unpin,
{
    while let Some(result) = framed.next().await {
        match result {
            Ok(frame) => {
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("W-Bus: read failed: {}", e);
                break;
            }
        }
    }
    let stats = framed.decoder().parser().stats();
    debug!(
        frames = stats.frames,
        loopback = stats.loopback,
        bad_address = stats.bad_address,
        bad_length = stats.bad_length,
        bad_checksum = stats.bad_checksum,
        "W-Bus: reader stopped"
    );
}
