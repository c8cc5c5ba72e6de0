//! Multiplexer over the registered transports.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tracing::info;

use ipv7_core::types::{Endpoint, TransportKind};

use crate::{Inbound, Transport, TransportError};

/// Owns every transport a node runs and dispatches by endpoint kind.
///
/// Sends take `&self` so the node can run them as detached tasks without
/// holding up packet processing; lifecycle operations take the write lock.
#[derive(Default)]
pub struct TransportManager {
    transports: RwLock<HashMap<TransportKind, Box<dyn Transport>>>,
}

impl TransportManager {
    pub fn new() -> Self {
        Self {
            transports: RwLock::new(HashMap::new()),
        }
    }

    /// Register a transport. A second registration of the same kind replaces
    /// the first.
    pub fn register(&mut self, transport: Box<dyn Transport>) {
        self.transports
            .get_mut()
            .insert(transport.kind(), transport);
    }

    pub async fn has(&self, kind: TransportKind) -> bool {
        self.transports.read().await.contains_key(&kind)
    }

    /// Endpoints remote peers can reach this node at, one per transport.
    pub async fn local_endpoints(&self) -> Vec<Endpoint> {
        self.transports
            .read()
            .await
            .values()
            .map(|t| t.local_endpoint())
            .collect()
    }

    /// Start every transport, fanning inbound frames into one channel.
    pub async fn start_all(&self, inbound: mpsc::Sender<Inbound>) -> Result<(), TransportError> {
        let mut transports = self.transports.write().await;
        for transport in transports.values_mut() {
            transport.start(inbound.clone()).await?;
            info!(kind = %transport.kind(), "transport started");
        }
        Ok(())
    }

    /// Stop every transport.
    pub async fn stop_all(&self) -> Result<(), TransportError> {
        let mut transports = self.transports.write().await;
        for transport in transports.values_mut() {
            transport.stop().await?;
        }
        Ok(())
    }

    /// Send a frame via the transport matching the endpoint's kind.
    pub async fn send(&self, frame: &[u8], endpoint: &Endpoint) -> Result<(), TransportError> {
        let transports = self.transports.read().await;
        let transport = transports
            .get(&endpoint.kind)
            .ok_or(TransportError::NoTransport(endpoint.kind))?;
        transport.send(frame, endpoint).await
    }
}
