//! Streaming discovery and scan subscriptions.

use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::Error;

/// An event delivered to a streaming subscriber.
#[derive(Debug)]
pub enum StreamEvent {
    /// A device name, reported once per discovery run.
    Device(String),
    /// A network seen by the device during a Wi-Fi scan.
    Network {
        /// Network name.
        ssid: String,
        /// Signal strength in dBm.
        rssi: i16,
    },
    /// The stream failed; no further events follow.
    Error(Error),
}

/// Handle to a running stream.
///
/// Stopping the stream (or dropping the handle) signals the producing task.
/// After [`StreamHandle::stop`] returns, the task has released any link it
/// held and no further events will be sent.
pub struct StreamHandle {
    id: u64,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub(crate) fn new(id: u64, stop_tx: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            id,
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Get the stream ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the producing task has already ended.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the stream and wait for the producing task to wind down.
    pub async fn stop(mut self) {
        debug!("Stopping stream {}", self.id);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Task side of a [`StreamHandle`]'s stop request.
pub(crate) struct StopSignal {
    rx: oneshot::Receiver<()>,
    stopped: bool,
}

impl StopSignal {
    pub(crate) fn new() -> (oneshot::Sender<()>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx, stopped: false })
    }

    /// Resolve once a stop was requested or the handle is gone.
    pub(crate) async fn wait(&mut self) {
        if !self.stopped {
            let _ = (&mut self.rx).await;
            self.stopped = true;
        }
    }

    /// Check for a stop request without waiting.
    pub(crate) fn is_stopped(&mut self) -> bool {
        if !self.stopped {
            self.stopped = !matches!(self.rx.try_recv(), Err(TryRecvError::Empty));
        }
        self.stopped
    }
}

/// Send `event` unless a stop arrives first. Returns `false` once the
/// stream should end.
pub(crate) async fn emit(
    sink: &mpsc::Sender<StreamEvent>,
    stop: &mut StopSignal,
    event: StreamEvent,
) -> bool {
    if stop.is_stopped() {
        return false;
    }
    tokio::select! {
        biased;
        _ = stop.wait() => false,
        sent = sink.send(event) => sent.is_ok(),
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}
