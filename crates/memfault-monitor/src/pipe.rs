//! Duplex message pipe between the caller and its sampling worker.
//!
//! Two transports share one [`Endpoint`] type:
//! - **in-memory** (`mem_pipe`): a pair of mpsc channels, used when the
//!   worker is a thread;
//! - **streams** (`Endpoint::from_streams`): newline-delimited JSON over any
//!   `Read`/`Write` pair, used with a child process's stdio.
//!
//! Inbound stream lines are decoded on a small reader thread and forwarded
//! through an mpsc channel, so both transports support `recv_timeout`.

use crate::error::{MonitorError, WorkerFailure};
use crate::sampler::Report;
use memfault_core::{StatField, Subject};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// What the worker needs to start sampling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Process to sample; `None` leaves the choice to the worker's query.
    pub subject: Option<Subject>,
    /// Pause between samples, in milliseconds.
    pub interval_ms: u64,
    /// Field to track.
    pub field: StatField,
    /// Keep only the maximum.
    pub max_usage: bool,
}

impl WorkerConfig {
    /// Sampling interval as a `Duration`.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// One unit on the pipe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg", content = "body", rename_all = "snake_case")]
pub enum Message {
    /// Caller → worker: start sampling with this configuration.
    Configure(WorkerConfig),
    /// Worker → caller: first sample taken, the target may run.
    Ready,
    /// Caller → worker: the target returned.
    Stop,
    /// Worker → caller: final aggregate.
    Report(Report),
    /// Worker → caller: sampling failed; the worker is exiting.
    Failed(WorkerFailure),
}

enum Outbound {
    Channel(Sender<Message>),
    Stream(Box<dyn Write + Send>),
}

/// One side of a duplex pipe.
pub struct Endpoint {
    outbound: Outbound,
    inbound: Receiver<Message>,
}

/// Creates a connected `(caller, worker)` endpoint pair.
pub type PipeFactory = Arc<dyn Fn() -> (Endpoint, Endpoint) + Send + Sync>;

/// In-memory endpoint pair: `(caller, worker)`.
#[must_use]
pub fn mem_pipe() -> (Endpoint, Endpoint) {
    let (a_tx, a_rx) = mpsc::channel();
    let (b_tx, b_rx) = mpsc::channel();
    (
        Endpoint {
            outbound: Outbound::Channel(a_tx),
            inbound: b_rx,
        },
        Endpoint {
            outbound: Outbound::Channel(b_tx),
            inbound: a_rx,
        },
    )
}

impl Endpoint {
    /// Endpoint speaking JSON lines over a byte-stream pair.
    pub fn from_streams<R, W>(reader: R, writer: W) -> io::Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("memfault-pipe-reader".into())
            .spawn(move || pump_lines(BufReader::new(reader), &tx))?;
        Ok(Self {
            outbound: Outbound::Stream(Box::new(writer)),
            inbound: rx,
        })
    }

    /// Send one message. Fails with [`MonitorError::WorkerLost`] once the
    /// peer is gone.
    pub fn send(&mut self, msg: &Message) -> Result<(), MonitorError> {
        match &mut self.outbound {
            Outbound::Channel(tx) => tx.send(msg.clone()).map_err(|_| MonitorError::WorkerLost),
            Outbound::Stream(w) => {
                let mut line =
                    serde_json::to_vec(msg).map_err(|e| MonitorError::Protocol(e.to_string()))?;
                line.push(b'\n');
                match w.write_all(&line).and_then(|()| w.flush()) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Err(MonitorError::WorkerLost),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Block until the next message arrives.
    pub fn recv(&self) -> Result<Message, MonitorError> {
        self.inbound.recv().map_err(|_| MonitorError::WorkerLost)
    }

    /// Wait up to `timeout`; `Ok(None)` when nothing arrived.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, MonitorError> {
        match self.inbound.recv_timeout(timeout) {
            Ok(m) => Ok(Some(m)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(MonitorError::WorkerLost),
        }
    }
}

fn pump_lines<R: BufRead>(reader: R, tx: &Sender<Message>) {
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                debug!(error = %e, "pipe reader stopped");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let msg = serde_json::from_str::<Message>(&line).unwrap_or_else(|e| {
            Message::Failed(WorkerFailure::Protocol {
                message: format!("undecodable pipe line: {e}"),
            })
        });
        if tx.send(msg).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::sampler::Usage;
    use std::io::Cursor;

    #[test]
    fn mem_pipe_is_duplex() {
        let (mut caller, mut worker) = mem_pipe();
        caller.send(&Message::Stop).unwrap();
        assert_eq!(worker.recv().unwrap(), Message::Stop);
        worker.send(&Message::Ready).unwrap();
        assert_eq!(caller.recv().unwrap(), Message::Ready);
    }

    #[test]
    fn dropped_peer_is_worker_lost() {
        let (caller, worker) = mem_pipe();
        drop(worker);
        assert!(matches!(caller.recv(), Err(MonitorError::WorkerLost)));
        assert!(matches!(
            caller.recv_timeout(Duration::from_millis(5)),
            Err(MonitorError::WorkerLost)
        ));
    }

    #[test]
    fn buffered_messages_survive_peer_exit() {
        let (caller, mut worker) = mem_pipe();
        worker
            .send(&Message::Failed(WorkerFailure::Malformed {
                field: StatField::Uss,
                sample: 2,
            }))
            .unwrap();
        drop(worker);
        assert!(matches!(caller.recv().unwrap(), Message::Failed(_)));
    }

    #[test]
    fn stream_endpoint_decodes_lines() {
        let report = Message::Report(Report {
            usage: Usage::Peak(42),
            samples_taken: 3,
        });
        let mut input = serde_json::to_vec(&Message::Ready).unwrap();
        input.extend_from_slice(b"\n\n");
        input.extend_from_slice(&serde_json::to_vec(&report).unwrap());
        input.extend_from_slice(b"\nnot json\n");

        let ep = Endpoint::from_streams(Cursor::new(input), io::sink()).unwrap();
        assert_eq!(ep.recv().unwrap(), Message::Ready);
        assert_eq!(ep.recv().unwrap(), report);
        assert!(matches!(
            ep.recv().unwrap(),
            Message::Failed(WorkerFailure::Protocol { .. })
        ));
        assert!(matches!(ep.recv(), Err(MonitorError::WorkerLost)));
    }
}
