//! Message port: an ordered, bounded queue of encoded messages.
//!
//! Writers are cheap to clone and never block: a write either lands or
//! returns a [`ChannelError`] for the caller to log. The single reader
//! drains whatever is queued without waiting.

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::warn;

use crate::error::ChannelError;
use crate::message::Message;

/// Create a port holding at most `capacity` undelivered messages.
pub fn port(capacity: usize) -> (PortWriter, PortReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PortWriter { tx }, PortReader { rx })
}

/// Write half of the port.
#[derive(Clone)]
pub struct PortWriter {
    tx: mpsc::Sender<String>,
}

impl PortWriter {
    /// Encode and enqueue a message.
    pub fn send(&self, message: &Message) -> Result<(), ChannelError> {
        self.send_raw(message.encode())
    }

    /// Enqueue an already-encoded message.
    pub fn send_raw(&self, raw: String) -> Result<(), ChannelError> {
        self.tx.try_send(raw).map_err(|e| match e {
            TrySendError::Full(_) => ChannelError::Full,
            TrySendError::Closed(_) => ChannelError::Closed,
        })
    }

    /// Send, logging instead of returning a failure.
    pub fn send_or_log(&self, message: &Message) -> bool {
        match self.send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(target_name = %message.target(), error = %e, "port write failed");
                false
            }
        }
    }
}

/// Read half of the port.
pub struct PortReader {
    rx: mpsc::Receiver<String>,
}

impl PortReader {
    /// Pop one message, if any is queued.
    pub fn try_read(&mut self) -> Option<String> {
        match self.rx.try_recv() {
            Ok(raw) => Some(raw),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Take everything currently queued, in arrival order.
    pub fn drain(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(raw) = self.try_read() {
            out.push(raw);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_arrival_order() {
        let (tx, mut rx) = port(8);
        tx.send_raw("a".into()).unwrap();
        tx.send(&Message::Init {
            target: "n00dles".into(),
        })
        .unwrap();
        tx.send_raw("c".into()).unwrap();

        assert_eq!(rx.drain(), vec!["a", "init:n00dles", "c"]);
        assert!(rx.is_empty());
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn full_port_rejects_without_blocking() {
        let (tx, mut rx) = port(2);
        tx.send_raw("1".into()).unwrap();
        tx.send_raw("2".into()).unwrap();
        assert_eq!(tx.send_raw("3".into()), Err(ChannelError::Full));
        assert_eq!(rx.drain(), vec!["1", "2"]);
        tx.send_raw("4".into()).unwrap();
        assert_eq!(rx.try_read().as_deref(), Some("4"));
    }

    #[test]
    fn closed_port_reports_closed() {
        let (tx, rx) = port(2);
        drop(rx);
        assert_eq!(tx.send_raw("x".into()), Err(ChannelError::Closed));
        assert!(!tx.send_or_log(&Message::Init { target: "x".into() }));
    }

    #[test]
    fn writers_can_be_cloned() {
        let (tx, mut rx) = port(4);
        let tx2 = tx.clone();
        tx.send_raw("from-1".into()).unwrap();
        tx2.send_raw("from-2".into()).unwrap();
        assert_eq!(rx.drain().len(), 2);
    }
}
