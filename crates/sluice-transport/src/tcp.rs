//! TCP mesh transport.
//!
//! Each rank listens on its own address and lazily opens one outbound
//! connection per peer. Inbound connections are drained by reader tasks
//! that push decoded frames into the local mailbox, so receives never
//! touch a socket directly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::mailbox::Mailbox;
use crate::protocol::{encode_frame, finish_frame, FrameHeader, FRAME_HEADER_SIZE};
use crate::transport::{Envelope, Rank, Tag, Transport};

/// TCP mesh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Rank of the local process.
    pub rank: Rank,
    /// Listen address of every rank, indexed by rank.
    pub peers: Vec<String>,
    /// Connection timeout in milliseconds (default: 5000).
    pub connect_timeout_ms: u64,
    /// Whether to enable TCP_NODELAY (default: true).
    pub nodelay: bool,
    /// Connection attempts before giving up on a peer (default: 50).
    pub connect_retries: u32,
    /// Pause between connection attempts in milliseconds (default: 100).
    pub retry_backoff_ms: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            rank: 0,
            peers: Vec::new(),
            connect_timeout_ms: 5000,
            nodelay: true,
            connect_retries: 50,
            retry_backoff_ms: 100,
        }
    }
}

/// One rank's endpoint on a TCP mesh.
pub struct TcpTransport {
    config: TcpConfig,
    mailbox: Arc<Mailbox>,
    writers: DashMap<Rank, Arc<Mutex<OwnedWriteHalf>>>,
    connect_lock: Mutex<()>,
    tasks: Arc<parking_lot::Mutex<Vec<JoinHandle<()>>>>,
    local_addr: String,
}

impl TcpTransport {
    /// Binds the local address from `config.peers[config.rank]` and starts accepting peers.
    pub async fn start(config: TcpConfig) -> Result<Arc<Self>> {
        let addr = config
            .peers
            .get(config.rank as usize)
            .ok_or(TransportError::UnknownRank {
                rank: config.rank,
                size: config.peers.len() as u32,
            })?
            .clone();
        let listener = TcpListener::bind(&addr).await?;
        Self::with_listener(config, listener)
    }

    /// Starts the transport on an already bound listener.
    pub fn with_listener(config: TcpConfig, listener: TcpListener) -> Result<Arc<Self>> {
        if config.rank as usize >= config.peers.len() {
            return Err(TransportError::UnknownRank {
                rank: config.rank,
                size: config.peers.len() as u32,
            });
        }
        let local_addr = listener.local_addr()?.to_string();
        let mailbox = Arc::new(Mailbox::new());
        let tasks = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let accept = tokio::spawn(accept_loop(
            listener,
            mailbox.clone(),
            tasks.clone(),
            config.nodelay,
        ));
        tasks.lock().push(accept);

        debug!(rank = config.rank, addr = %local_addr, "TCP mesh listening");
        Ok(Arc::new(Self {
            config,
            mailbox,
            writers: DashMap::new(),
            connect_lock: Mutex::new(()),
            tasks,
            local_addr,
        }))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    async fn writer(&self, dest: Rank) -> Result<Arc<Mutex<OwnedWriteHalf>>> {
        if let Some(writer) = self.writers.get(&dest) {
            return Ok(writer.clone());
        }
        let _guard = self.connect_lock.lock().await;
        if let Some(writer) = self.writers.get(&dest) {
            return Ok(writer.clone());
        }
        let addr = &self.config.peers[dest as usize];
        let stream = self.connect(addr).await?;
        let (_read, write) = stream.into_split();
        let writer = Arc::new(Mutex::new(write));
        self.writers.insert(dest, writer.clone());
        debug!(rank = self.config.rank, peer = dest, addr = %addr, "TCP peer connected");
        Ok(writer)
    }

    async fn connect(&self, addr: &str) -> Result<TcpStream> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let attempts = self.config.connect_retries.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    if self.config.nodelay {
                        stream.set_nodelay(true)?;
                    }
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    debug!(addr = addr, attempt = attempt, error = %e, "connect failed, retrying");
                    last_err = Some(TransportError::Io(e));
                }
                Err(_) => {
                    last_err = Some(TransportError::ConnectionTimeout {
                        addr: addr.to_string(),
                        timeout_ms: self.config.connect_timeout_ms,
                    });
                }
            }
            tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
        }
        Err(last_err.unwrap_or(TransportError::ConnectionTimeout {
            addr: addr.to_string(),
            timeout_ms: self.config.connect_timeout_ms,
        }))
    }

    fn check_rank(&self, rank: Rank) -> Result<()> {
        if rank >= self.size() {
            return Err(TransportError::UnknownRank {
                rank,
                size: self.size(),
            });
        }
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.mailbox.close();
    }
}

async fn accept_loop(
    listener: TcpListener,
    mailbox: Arc<Mailbox>,
    tasks: Arc<parking_lot::Mutex<Vec<JoinHandle<()>>>>,
    nodelay: bool,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if nodelay {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
                    }
                }
                let (read, _write) = stream.into_split();
                let reader = tokio::spawn(read_loop(read, mailbox.clone()));
                tasks.lock().push(reader);
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

async fn read_loop(mut read: OwnedReadHalf, mailbox: Arc<Mailbox>) {
    loop {
        match read_frame(&mut read).await {
            Ok(Some(envelope)) => mailbox.deliver(envelope),
            Ok(None) => {
                debug!("peer closed connection");
                return;
            }
            Err(e) => {
                warn!(error = %e, "dropping connection after bad frame");
                return;
            }
        }
    }
}

async fn read_frame(read: &mut OwnedReadHalf) -> Result<Option<Envelope>> {
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];
    match read.read_exact(&mut header_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = FrameHeader::decode(&header_buf)?;
    let mut payload = vec![0u8; header.payload_length as usize];
    if !payload.is_empty() {
        read.read_exact(&mut payload).await?;
    }
    finish_frame(header, Bytes::from(payload)).map(Some)
}

#[async_trait]
impl Transport for TcpTransport {
    fn rank(&self) -> Rank {
        self.config.rank
    }

    fn size(&self) -> u32 {
        self.config.peers.len() as u32
    }

    async fn send(&self, dest: Rank, tag: Tag, payload: Bytes) -> Result<()> {
        self.check_rank(dest)?;
        let envelope = Envelope {
            source: self.config.rank,
            tag,
            payload,
        };
        if dest == self.config.rank {
            self.mailbox.deliver(envelope);
            return Ok(());
        }
        let frame = encode_frame(&envelope)?;
        let writer = self.writer(dest).await?;
        let mut write = writer.lock().await;
        if let Err(e) = write.write_all(&frame).await {
            drop(write);
            self.writers.remove(&dest);
            return Err(e.into());
        }
        Ok(())
    }

    async fn recv(&self, tag: Tag) -> Result<Envelope> {
        self.mailbox.wait(None, tag).await
    }

    async fn recv_from(&self, source: Rank, tag: Tag) -> Result<Envelope> {
        self.check_rank(source)?;
        self.mailbox.wait(Some(source), tag).await
    }

    fn try_recv(&self, source: Option<Rank>, tag: Tag) -> Option<Envelope> {
        self.mailbox.take(source, tag)
    }

    fn has_pending(&self, source: Option<Rank>, tag: Tag) -> bool {
        self.mailbox.contains(source, tag)
    }
}
