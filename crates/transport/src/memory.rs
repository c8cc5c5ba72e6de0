//! In-process transport backed by a named-instance registry.
//!
//! Each instance registers its inbound channel under a name; "sending" to an
//! endpoint whose address is that name forwards the frame asynchronously
//! into the target's inbound channel. Used for deterministic multi-node
//! tests without sockets.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use tokio::sync::mpsc;

use ipv7_core::types::{Endpoint, TransportKind};

use crate::{Inbound, Transport, TransportError, MAX_FRAME_SIZE};

static REGISTRY: OnceLock<Mutex<HashMap<String, mpsc::Sender<Inbound>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, mpsc::Sender<Inbound>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Named in-process transport instance.
pub struct MemoryTransport {
    name: String,
    registered: bool,
}

impl MemoryTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registered: false,
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    fn local_endpoint(&self) -> Endpoint {
        Endpoint::new(TransportKind::Memory, self.name.clone(), 0, 0)
    }

    async fn start(&mut self, inbound: mpsc::Sender<Inbound>) -> Result<(), TransportError> {
        registry()
            .lock()
            .expect("memory transport registry poisoned")
            .insert(self.name.clone(), inbound);
        self.registered = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        if self.registered {
            registry()
                .lock()
                .expect("memory transport registry poisoned")
                .remove(&self.name);
            self.registered = false;
        }
        Ok(())
    }

    async fn send(&self, frame: &[u8], endpoint: &Endpoint) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        if !self.registered {
            return Err(TransportError::NotStarted(TransportKind::Memory));
        }
        let target = {
            let map = registry()
                .lock()
                .expect("memory transport registry poisoned");
            map.get(&endpoint.address)
                .cloned()
                .ok_or_else(|| TransportError::UnknownInstance(endpoint.address.clone()))?
        };
        target
            .send(Inbound {
                frame: frame.to_vec(),
                from: self.local_endpoint(),
            })
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if self.registered {
            if let Ok(mut map) = registry().lock() {
                map.remove(&self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_between_named_instances() {
        let (a_tx, _a_rx) = mpsc::channel(8);
        let mut a = MemoryTransport::new("mem-test-a");
        a.start(a_tx).await.unwrap();

        let (b_tx, mut b_rx) = mpsc::channel(8);
        let mut b = MemoryTransport::new("mem-test-b");
        b.start(b_tx).await.unwrap();

        a.send(b"ping", &b.local_endpoint()).await.unwrap();
        let inbound = b_rx.recv().await.unwrap();
        assert_eq!(inbound.frame, b"ping");
        assert_eq!(inbound.from.address, "mem-test-a");

        a.stop().await.unwrap();
        b.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_instance_is_an_error() {
        let (tx, _rx) = mpsc::channel(8);
        let mut a = MemoryTransport::new("mem-test-lonely");
        a.start(tx).await.unwrap();

        let ghost = Endpoint::new(TransportKind::Memory, "mem-test-ghost", 0, 0);
        let err = a.send(b"x", &ghost).await.unwrap_err();
        assert!(matches!(err, TransportError::UnknownInstance(_)));
        a.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_deregisters() {
        let (tx, _rx) = mpsc::channel(8);
        let mut a = MemoryTransport::new("mem-test-stop");
        a.start(tx).await.unwrap();
        a.stop().await.unwrap();

        let (tx2, _rx2) = mpsc::channel(8);
        let mut b = MemoryTransport::new("mem-test-stop-peer");
        b.start(tx2).await.unwrap();
        let gone = Endpoint::new(TransportKind::Memory, "mem-test-stop", 0, 0);
        assert!(matches!(
            b.send(b"x", &gone).await,
            Err(TransportError::UnknownInstance(_))
        ));
        b.stop().await.unwrap();
    }
}
