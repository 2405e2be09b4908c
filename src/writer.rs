//! Background writer for the snapshot slot.
//!
//! Slot operations are queued to a single worker thread and executed in
//! order, so the last save queued is the one that ends up stored. Callers
//! get a [`PendingWrite`] back and decide whether to wait for it.

use crate::error::{LedgerError, Result};
use crate::slot::KeyValuePort;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

enum Job {
    Put {
        key: String,
        value: String,
        done: Sender<Result<()>>,
    },
    Remove {
        key: String,
        done: Sender<Result<()>>,
    },
    Get {
        key: String,
        reply: Sender<Result<Option<String>>>,
    },
    Barrier {
        done: Sender<Result<()>>,
    },
}

/// Completion handle for a queued slot write.
#[must_use = "a slot write may still be in flight; call `wait` to observe its outcome"]
#[derive(Debug)]
pub struct PendingWrite {
    state: PendingState,
    timeout: Duration,
}

#[derive(Debug)]
enum PendingState {
    Queued(Receiver<Result<()>>),
    Ready(Result<()>),
}

impl PendingWrite {
    /// A write that has already finished (or never needed to happen).
    pub fn ready(result: Result<()>) -> Self {
        Self {
            state: PendingState::Ready(result),
            timeout: Duration::ZERO,
        }
    }

    fn queued(receiver: Receiver<Result<()>>, timeout: Duration) -> Self {
        Self {
            state: PendingState::Queued(receiver),
            timeout,
        }
    }

    /// Block until the write finishes, failing after the configured timeout.
    pub fn wait(self) -> Result<()> {
        let timeout = self.timeout;
        self.wait_timeout(timeout)
    }

    /// Block until the write finishes or `timeout` elapses.
    pub fn wait_timeout(self, timeout: Duration) -> Result<()> {
        match self.state {
            PendingState::Ready(result) => result,
            PendingState::Queued(receiver) => receive(&receiver, timeout),
        }
    }
}

/// Single-threaded executor for [`KeyValuePort`] operations.
pub struct SlotWriter {
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
    /// Disconnects when the worker returns.
    exited: Receiver<()>,
    timeout: Duration,
}

impl SlotWriter {
    /// Start the worker thread.
    pub fn spawn(port: Arc<dyn KeyValuePort>, queue_depth: usize, timeout: Duration) -> Result<Self> {
        let (sender, receiver) = bounded::<Job>(queue_depth.max(1));
        let (exit_signal, exited) = bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("fuel-ledger-slot".into())
            .spawn(move || {
                let _exit_signal = exit_signal;
                run(port, receiver)
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            exited,
            timeout,
        })
    }

    /// Queue a value to be written under `key`.
    pub fn put(&self, key: &str, value: String) -> PendingWrite {
        let (done, receiver) = bounded(1);
        self.submit(
            Job::Put {
                key: key.to_string(),
                value,
                done,
            },
            receiver,
        )
    }

    /// Queue removal of `key`.
    pub fn remove(&self, key: &str) -> PendingWrite {
        let (done, receiver) = bounded(1);
        self.submit(
            Job::Remove {
                key: key.to_string(),
                done,
            },
            receiver,
        )
    }

    /// Read `key` once every previously queued write has run.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let (reply, receiver) = bounded(1);
        self.send(Job::Get {
            key: key.to_string(),
            reply,
        })?;
        receive(&receiver, self.timeout)
    }

    /// Wait for everything queued so far.
    pub fn flush(&self) -> Result<()> {
        let (done, receiver) = bounded(1);
        self.submit(Job::Barrier { done }, receiver).wait()
    }

    fn submit(&self, job: Job, receiver: Receiver<Result<()>>) -> PendingWrite {
        match self.send(job) {
            Ok(()) => PendingWrite::queued(receiver, self.timeout),
            Err(e) => PendingWrite::ready(Err(e)),
        }
    }

    fn send(&self, job: Job) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| LedgerError::StorageUnavailable("slot writer stopped".into()))?;

        sender.send_timeout(job, self.timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(_) => LedgerError::StorageUnavailable(format!(
                "slot queue full for {:?}",
                self.timeout
            )),
            SendTimeoutError::Disconnected(_) => {
                LedgerError::StorageUnavailable("slot writer stopped".into())
            }
        })
    }
}

impl Drop for SlotWriter {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain the queue and exit.
        self.sender.take();
        let Some(handle) = self.handle.take() else {
            return;
        };

        match self.exited.recv_timeout(self.timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?self.timeout, "slot writer still busy, detaching it");
            }
            _ => {
                if handle.join().is_err() {
                    warn!("slot writer thread panicked");
                }
            }
        }
    }
}

fn receive<T>(receiver: &Receiver<Result<T>>, timeout: Duration) -> Result<T> {
    match receiver.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(LedgerError::StorageUnavailable(format!(
            "slot operation did not finish within {:?}",
            timeout
        ))),
        Err(RecvTimeoutError::Disconnected) => Err(LedgerError::StorageUnavailable(
            "slot writer stopped".into(),
        )),
    }
}

fn run(port: Arc<dyn KeyValuePort>, jobs: Receiver<Job>) {
    for job in jobs {
        match job {
            Job::Put { key, value, done } => {
                let result = guarded("save", &key, || port.put(&key, &value));
                if let Err(e) = &result {
                    warn!(%key, error = %e, "slot save failed");
                }
                let _ = done.send(result);
            }
            Job::Remove { key, done } => {
                let result = guarded("clear", &key, || port.remove(&key));
                if let Err(e) = &result {
                    warn!(%key, error = %e, "slot clear failed");
                }
                let _ = done.send(result);
            }
            Job::Get { key, reply } => {
                let _ = reply.send(guarded("load", &key, || port.get(&key)));
            }
            Job::Barrier { done } => {
                let _ = done.send(Ok(()));
            }
        }
    }
    debug!("slot writer stopped");
}

/// Run a port call, turning a panic into a failed operation.
fn guarded<T>(operation: &str, key: &str, call: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|_| {
        Err(LedgerError::StorageUnavailable(format!(
            "slot {} of {} panicked",
            operation, key
        )))
    })
}
