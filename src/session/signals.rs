//! Interrupt delivery
//!
//! SIGINT and SIGTERM are forwarded into a channel the controller selects
//! on. Tests feed the same channel by hand.

use std::future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Source of interrupt requests for one controller
#[derive(Debug, Default)]
pub struct Interrupts {
    rx: Option<mpsc::UnboundedReceiver<()>>,
    listener: Option<JoinHandle<()>>,
}

impl Interrupts {
    /// Listen for SIGINT and SIGTERM
    pub fn os() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx: Some(rx),
            listener: Some(tokio::spawn(listen(tx))),
        }
    }

    /// Interrupts sent through the returned sender
    pub fn channel() -> (mpsc::UnboundedSender<()>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                rx: Some(rx),
                listener: None,
            },
        )
    }

    /// Never interrupted
    pub fn none() -> Self {
        Self::default()
    }

    /// Wait for the next interrupt. Pends forever once deregistered or when
    /// every sender is gone.
    pub async fn recv(&mut self) {
        match self.rx.as_mut() {
            Some(rx) => {
                if rx.recv().await.is_none() {
                    self.rx = None;
                    future::pending::<()>().await;
                }
            }
            None => future::pending::<()>().await,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.rx.is_some()
    }

    /// Stop listening. Idempotent.
    pub fn deregister(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.rx = None;
    }
}

impl Drop for Interrupts {
    fn drop(&mut self) {
        self.deregister();
    }
}

#[cfg(unix)]
async fn listen(tx: mpsc::UnboundedSender<()>) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut interrupt, mut terminate) =
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(interrupt), Ok(terminate)) => (interrupt, terminate),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("could not install signal handlers: {}", e);
                return;
            }
        };

    loop {
        tokio::select! {
            _ = interrupt.recv() => tracing::debug!("received SIGINT"),
            _ = terminate.recv() => tracing::debug!("received SIGTERM"),
        }
        if tx.send(()).is_err() {
            break;
        }
    }
}

#[cfg(not(unix))]
async fn listen(tx: mpsc::UnboundedSender<()>) {
    while tokio::signal::ctrl_c().await.is_ok() {
        if tx.send(()).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_channel_delivers_interrupts() {
        let (tx, mut interrupts) = Interrupts::channel();
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), interrupts.recv())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deregistered_never_fires() {
        let (tx, mut interrupts) = Interrupts::channel();
        interrupts.deregister();
        interrupts.deregister();
        let _ = tx.send(());
        assert!(!interrupts.is_registered());
        let waited = tokio::time::timeout(Duration::from_millis(50), interrupts.recv()).await;
        assert!(waited.is_err());
    }
}
