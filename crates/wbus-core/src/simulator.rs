//! Simulated heater controller for tests and demos
//!
//! Runs a scripted controller on the far end of an in-memory line. Like a
//! real K-line it echoes every byte the client writes before answering.
//!
//! # Example
//!
//! ```ignore
//! use wbus_core::simulator::{HeaterSimulator, Reaction};
//!
//! let (line, heater) = HeaterSimulator::new()
//!     .on(&[0x56, 0x04], Reaction::reply([0xd6, 0x04, 0x02]))
//!     .spawn(0xf, 0x4);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::protocol::{Address, Frame, FrameParser};

/// What the simulated controller does when a request arrives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Answer with a frame carrying this payload
    Reply(Vec<u8>),
    /// Write these bytes verbatim (garbage, corrupt frames, ...)
    Raw(Vec<u8>),
    /// Say nothing
    Silence,
}

impl Reaction {
    /// Shorthand for [`Reaction::Reply`]
    pub fn reply(payload: impl Into<Vec<u8>>) -> Self {
        Reaction::Reply(payload.into())
    }
}

/// Traffic seen by the simulated controller, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// Request payload received
    Request(Vec<u8>),
    /// Reply payload sent
    Reply(Vec<u8>),
}

#[derive(Debug)]
struct Rule {
    prefix: Vec<u8>,
    reactions: VecDeque<Reaction>,
}

impl Rule {
    /// Next reaction; the last one repeats forever
    fn next(&mut self) -> Reaction {
        if self.reactions.len() > 1 {
            self.reactions.pop_front().unwrap_or(Reaction::Silence)
        } else {
            self.reactions.front().cloned().unwrap_or(Reaction::Silence)
        }
    }
}

/// Builder for a scripted heater controller
#[derive(Debug)]
pub struct HeaterSimulator {
    rules: Vec<Rule>,
    echo: bool,
    latency: Duration,
}

impl Default for HeaterSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaterSimulator {
    /// A controller that answers nothing until rules are added
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            echo: true,
            latency: Duration::from_millis(20),
        }
    }

    /// Answer requests starting with `prefix`. Earlier rules win.
    pub fn on(self, prefix: &[u8], reaction: Reaction) -> Self {
        self.on_sequence(prefix, vec![reaction])
    }

    /// Answer successive matching requests with successive reactions,
    /// repeating the last one
    pub fn on_sequence(mut self, prefix: &[u8], reactions: Vec<Reaction>) -> Self {
        self.rules.push(Rule {
            prefix: prefix.to_vec(),
            reactions: reactions.into(),
        });
        self
    }

    /// Answer the wake-up handshake and identity queries of a typical
    /// supplement heater
    pub fn with_handshake(self) -> Self {
        let mut name = vec![0xd1, 0x0b];
        name.extend_from_slice(b"TT-EVO\x00\x00");
        self.on(&[0x51, 0x0a], Reaction::reply([0xd1, 0x0a, 0x33]))
            .on(&[0x51, 0x0b], Reaction::Reply(name))
            .on(
                &[0x51, 0x0c],
                Reaction::reply([0xd1, 0x0c, 0x30, 0x3c, 0x05, 0x08, 0x40, 0x20, 0x00]),
            )
            .on(&[0x38], Reaction::reply([0xb8, 0x0b]))
    }

    /// Turn the K-line echo off
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Delay between a request and its reply
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Start the controller.
    ///
    /// `local` and `remote` are the client's view of the session. Returns the
    /// client end of the line and a handle for inspecting traffic.
    pub fn spawn(self, local: u8, remote: u8) -> (DuplexStream, SimulatorHandle) {
        let (client, line) = tokio::io::duplex(1024);
        let events = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(serve(self, line, local, remote, events.clone()));
        (client, SimulatorHandle { events, task })
    }
}

/// Inspect or stop a running simulation
#[derive(Debug)]
pub struct SimulatorHandle {
    events: Arc<Mutex<Vec<SimEvent>>>,
    task: JoinHandle<()>,
}

impl SimulatorHandle {
    /// Everything the controller has received and sent so far
    pub fn events(&self) -> Vec<SimEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Request payloads received so far
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SimEvent::Request(payload) => Some(payload),
                SimEvent::Reply(_) => None,
            })
            .collect()
    }

    /// Disconnect the controller, closing its end of the line
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

async fn serve(
    mut sim: HeaterSimulator,
    mut line: DuplexStream,
    local: u8,
    remote: u8,
    events: Arc<Mutex<Vec<SimEvent>>>,
) {
    // The controller's own session is the mirror image of the client's
    let mut parser = FrameParser::for_session(remote, local);
    let reply_address = Address::new(remote, local);
    let mut buf = [0u8; 256];

    loop {
        let n = match line.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        if sim.echo && line.write_all(&buf[..n]).await.is_err() {
            break;
        }

        for request in parser.feed(&buf[..n]) {
            record(&events, SimEvent::Request(request.payload.clone()));

            let reaction = sim
                .rules
                .iter_mut()
                .find(|rule| request.payload.starts_with(&rule.prefix))
                .map(Rule::next)
                .unwrap_or(Reaction::Silence);

            let bytes = match reaction {
                Reaction::Reply(payload) => {
                    let frame = Frame::new(reply_address, payload.clone());
                    match frame.to_bytes() {
                        Ok(bytes) => {
                            record(&events, SimEvent::Reply(payload));
                            bytes
                        }
                        Err(_) => continue,
                    }
                }
                Reaction::Raw(bytes) => bytes,
                Reaction::Silence => {
                    debug!("Simulator: no answer to {}", request);
                    continue;
                }
            };

            tokio::time::sleep(sim.latency).await;
            if line.write_all(&bytes).await.is_err() {
                return;
            }
        }
    }
}

fn record(events: &Arc<Mutex<Vec<SimEvent>>>, event: SimEvent) {
    if let Ok(mut events) = events.lock() {
        events.push(event);
    }
}
