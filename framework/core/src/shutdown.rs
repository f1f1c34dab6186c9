use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::{Receiver, Sender};
use tokio::sync::Mutex;

/// Broadcasts a request to stop the run, for example when the user presses Ctrl-C.
///
/// The request is remembered, so listeners created after it was sent still observe it.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Sender<()>,
    requested: Arc<AtomicBool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::broadcast::channel(1).0,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Err(e) = self.sender.send(()) {
            // Fails when nobody is listening, in which case there is nothing to stop.
            log::warn!("Failed to send shutdown signal: {e:?}");
        }
    }

    pub fn new_listener(&self) -> ShutdownListener {
        ShutdownListener::new(self.sender.subscribe(), self.requested.clone())
    }
}

/// Sees a shutdown that was requested through its handle, or a handle that was dropped.
#[derive(Clone, Debug)]
pub struct ShutdownListener {
    receiver: Arc<Mutex<Receiver<()>>>,
    requested: Arc<AtomicBool>,
    received: bool,
}

impl ShutdownListener {
    pub(crate) fn new(receiver: Receiver<()>, requested: Arc<AtomicBool>) -> Self {
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            requested,
            received: false,
        }
    }

    /// Point in time check whether a shutdown was requested. Once this has returned true it keeps
    /// returning true.
    pub fn should_shutdown(&mut self) -> bool {
        if self.received || self.requested.load(Ordering::SeqCst) {
            self.received = true;
            return true;
        }

        self.received = match self.receiver.try_lock() {
            Ok(mut guard) => match guard.try_recv() {
                Ok(_) | Err(TryRecvError::Closed) | Err(TryRecvError::Lagged(_)) => true,
                Err(TryRecvError::Empty) => false,
            },
            Err(_) => false,
        };
        self.received
    }

    /// Wait until a shutdown is requested.
    pub async fn wait_for_shutdown(&mut self) {
        if self.received || self.requested.load(Ordering::SeqCst) {
            self.received = true;
            return;
        }
        // Closed and lagged channels count as a shutdown, the same as in `should_shutdown`.
        let _ = self.receiver.lock().await.recv().await;
        self.received = true;
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct ShutdownSignalError {
    msg: String,
}

impl Default for ShutdownSignalError {
    fn default() -> Self {
        Self {
            msg: "Run cancelled by shutdown signal".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_sees_shutdown_once_sent() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();
        assert!(!listener.should_shutdown());

        handle.shutdown();
        assert!(listener.should_shutdown());
        assert!(listener.should_shutdown());
    }

    #[test]
    fn listener_created_after_shutdown_sees_it() {
        let handle = ShutdownHandle::new();
        let _early = handle.new_listener();
        handle.shutdown();

        let mut late = handle.new_listener();
        assert!(late.should_shutdown());
    }

    #[test]
    fn wait_returns_when_handle_is_dropped() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();
        drop(handle);

        runtime.block_on(async {
            tokio::time::timeout(std::time::Duration::from_secs(1), listener.wait_for_shutdown())
                .await
                .expect("a closed channel should end the wait");
        });
        assert!(listener.should_shutdown());
    }

    #[test]
    fn dropped_handle_counts_as_shutdown() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();
        drop(handle);
        assert!(listener.should_shutdown());
    }
}
