//! Length-prefixed TCP stream transport.
//!
//! Wire format per frame: 4-byte big-endian length, then the frame bytes.
//! One persistent connection is kept per remote endpoint and re-established
//! on demand when a send finds it gone.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ipv7_core::types::{Endpoint, TransportKind};

use crate::{Inbound, Transport, TransportError, MAX_FRAME_SIZE};

type ConnectionMap = Arc<Mutex<HashMap<SocketAddr, mpsc::Sender<Vec<u8>>>>>;

/// TCP transport with per-remote persistent connections.
pub struct TcpTransport {
    listen_addr: SocketAddr,
    local: Endpoint,
    connections: ConnectionMap,
    inbound: Option<mpsc::Sender<Inbound>>,
    listener_task: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Create a transport that will listen on `listen_addr` once started.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            local: Endpoint::new(
                TransportKind::Stream,
                listen_addr.ip().to_string(),
                listen_addr.port(),
                0,
            ),
            connections: Arc::new(Mutex::new(HashMap::new())),
            inbound: None,
            listener_task: None,
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

    /// Get or establish the outbound connection to `addr`.
    async fn connection_to(
        &self,
        addr: SocketAddr,
    ) -> Result<mpsc::Sender<Vec<u8>>, TransportError> {
        let inbound = self
            .inbound
            .clone()
            .ok_or(TransportError::NotStarted(TransportKind::Stream))?;

        if let Some(tx) = self.connections.lock().await.get(&addr) {
            return Ok(tx.clone());
        }

        let stream = TcpStream::connect(addr).await?;
        debug!(remote = %addr, "tcp connection established");
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel::<Vec<u8>>(64);

        let from = Endpoint::new(TransportKind::Stream, addr.ip().to_string(), addr.port(), 0);
        tokio::spawn(write_frames(write_half, rx, addr, Arc::clone(&self.connections)));
        tokio::spawn(read_split_frames(read_half, from, inbound));

        self.connections.lock().await.insert(addr, tx.clone());
        Ok(tx)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn local_endpoint(&self) -> Endpoint {
        self.local.clone()
    }

    async fn start(&mut self, inbound: mpsc::Sender<Inbound>) -> Result<(), TransportError> {
        if self.listener_task.is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind(self.listen_addr).await?;
        // The OS may have picked the port.
        let bound = listener.local_addr()?;
        self.local.port = bound.port();
        self.inbound = Some(inbound.clone());

        self.listener_task = Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let from = Endpoint::new(
                            TransportKind::Stream,
                            peer.ip().to_string(),
                            peer.port(),
                            0,
                        );
                        // The whole stream stays in the reader so the write
                        // direction is not shut down under the peer.
                        tokio::spawn(read_frames(stream, from, inbound.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "tcp accept failed");
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        if let Some(task) = self.listener_task.take() {
            task.abort();
        }
        self.connections.lock().await.clear();
        self.inbound = None;
        Ok(())
    }

    async fn send(&self, frame: &[u8], endpoint: &Endpoint) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        let addr = Self::resolve(endpoint)?;

        let tx = self.connection_to(addr).await?;
        if tx.send(frame.to_vec()).await.is_ok() {
            return Ok(());
        }

        // Writer task is gone; drop the dead entry and reconnect once.
        self.connections.lock().await.remove(&addr);
        let tx = self.connection_to(addr).await?;
        tx.send(frame.to_vec())
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

/// Drain outbound frames onto the socket, length prefix first.
async fn write_frames(
    mut half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Vec<u8>>,
    addr: SocketAddr,
    connections: ConnectionMap,
) {
    while let Some(frame) = rx.recv().await {
        let len = (frame.len() as u32).to_be_bytes();
        if half.write_all(&len).await.is_err() || half.write_all(&frame).await.is_err() {
            break;
        }
    }
    connections.lock().await.remove(&addr);
    debug!(remote = %addr, "tcp connection closed");
}

/// Read length-prefixed frames from an accepted connection.
async fn read_frames(mut stream: TcpStream, from: Endpoint, inbound: mpsc::Sender<Inbound>) {
    loop {
        match read_one_frame(&mut stream).await {
            Some(frame) => {
                if inbound.send(Inbound { frame, from: from.clone() }).await.is_err() {
                    break;
                }
            }
            None => break,
        }
    }
}

/// Read length-prefixed frames from the read half of an outbound connection.
async fn read_split_frames(
    mut half: OwnedReadHalf,
    from: Endpoint,
    inbound: mpsc::Sender<Inbound>,
) {
    loop {
        match read_one_frame(&mut half).await {
            Some(frame) => {
                if inbound.send(Inbound { frame, from: from.clone() }).await.is_err() {
                    break;
                }
            }
            None => break,
        }
    }
}

/// One frame: 4-byte big-endian length, then the bytes. `None` on EOF or a
/// length outside the frame bound.
async fn read_one_frame<R>(reader: &mut R) -> Option<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.ok()?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        warn!(len, "dropping connection with invalid frame length");
        return None;
    }
    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await.ok()?;
    Some(frame)
}
