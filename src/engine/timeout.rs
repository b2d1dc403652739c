use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::work::CancellationToken;

/// Trips a [`CancellationToken`] once the timeout elapses, unless it is
/// dropped first.
pub(crate) struct Watchdog {
    disarm: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub(crate) fn start(timeout: Duration, token: CancellationToken) -> std::io::Result<Self> {
        let (disarm, rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("kura-watchdog".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(timeout) {
                    tracing::debug!("timeout of {:?} elapsed, cancelling", timeout);
                    token.cancel();
                }
            })?;

        Ok(Self {
            disarm: Some(disarm),
            handle: Some(handle),
        })
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        // Closing the channel wakes the watchdog up early.
        drop(self.disarm.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_trips_after_timeout() {
        let token = CancellationToken::new();
        let watchdog = Watchdog::start(Duration::from_millis(10), token.clone()).unwrap();

        let start = Instant::now();
        while !token.is_cancelled() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        drop(watchdog);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_disarmed_by_drop() {
        let token = CancellationToken::new();
        let watchdog = Watchdog::start(Duration::from_secs(60), token.clone()).unwrap();

        let start = Instant::now();
        drop(watchdog);
        assert!(start.elapsed() < Duration::from_secs(30));
        assert!(!token.is_cancelled());
    }
}
