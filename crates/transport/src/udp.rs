//! Connectionless UDP datagram transport.
//!
//! One datagram per packet; no framing is needed because datagram
//! boundaries are preserved by the socket.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use ipv7_core::types::{Endpoint, TransportKind};

use crate::{Inbound, Transport, TransportError, MAX_FRAME_SIZE};

/// UDP transport bound to one local socket.
pub struct UdpTransport {
    bind_addr: SocketAddr,
    local: Endpoint,
    socket: Option<Arc<UdpSocket>>,
    recv_task: Option<JoinHandle<()>>,
}

impl UdpTransport {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            local: Endpoint::new(
                TransportKind::Datagram,
                bind_addr.ip().to_string(),
                bind_addr.port(),
                0,
            ),
            socket: None,
            recv_task: None,
        }
    }

    fn resolve(endpoint: &Endpoint) -> Result<SocketAddr, TransportError> {
        format!("{}:{}", endpoint.address, endpoint.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| TransportError::InvalidEndpoint {
                address: endpoint.address.clone(),
                port: endpoint.port,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Datagram
    }

    fn local_endpoint(&self) -> Endpoint {
        self.local.clone()
    }

    async fn start(&mut self, inbound: mpsc::Sender<Inbound>) -> Result<(), TransportError> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = Arc::new(UdpSocket::bind(self.bind_addr).await?);
        self.local.port = socket.local_addr()?.port();

        let recv_socket = Arc::clone(&socket);
        self.recv_task = Some(tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_FRAME_SIZE];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((len, peer)) => {
                        let from = Endpoint::new(
                            TransportKind::Datagram,
                            peer.ip().to_string(),
                            peer.port(),
                            0,
                        );
                        if inbound
                            .send(Inbound {
                                frame: buf[..len].to_vec(),
                                from,
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "udp recv failed");
                        break;
                    }
                }
            }
        }));

        self.socket = Some(socket);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
        self.socket = None;
        Ok(())
    }

    async fn send(&self, frame: &[u8], endpoint: &Endpoint) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        let socket = self
            .socket
            .as_ref()
            .ok_or(TransportError::NotStarted(TransportKind::Datagram))?;
        let addr = Self::resolve(endpoint)?;
        socket.send_to(frame, addr).await?;
        Ok(())
    }
}
