//! DNS Server
//!
//! UDP and TCP listeners in front of [`SeedDnsHandler`]. Every UDP datagram
//! and every TCP connection is handled on its own task; the only shared state
//! is the handler (and through it the network view).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use super::handler::{SeedDnsHandler, Transport};

/// Largest datagram we accept; anything longer is cut by the kernel and then
/// fails to parse
const UDP_RECV_BUFFER: usize = 4096;

/// Concurrent TCP connections; further accepts are closed straight away
const MAX_TCP_CONNECTIONS: usize = 512;

/// Bound UDP and TCP sockets, ready to serve
pub struct DnsServer {
    udp: Arc<UdpSocket>,
    tcp: TcpListener,
    handler: Arc<SeedDnsHandler>,
    tcp_idle_timeout: Duration,
}

impl DnsServer {
    /// Bind both transports on `addr`. Failing to bind is a startup error.
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<SeedDnsHandler>,
        tcp_idle_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let udp = UdpSocket::bind(addr).await?;
        // With port 0 the TCP listener must share the port UDP was given
        let tcp = TcpListener::bind(udp.local_addr()?).await?;

        let server = Self {
            udp: Arc::new(udp),
            tcp,
            handler,
            tcp_idle_timeout,
        };
        info!("🌐 DNS server listening on {} (udp+tcp)", server.local_addr()?);
        Ok(server)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    /// Serve until `shutdown` flips to true
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let udp = tokio::spawn(run_udp(self.udp, self.handler.clone(), shutdown.clone()));
        let tcp = tokio::spawn(run_tcp(
            self.tcp,
            self.handler,
            self.tcp_idle_timeout,
            shutdown,
        ));

        let (udp, tcp) = tokio::join!(udp, tcp);
        udp??;
        tcp??;
        Ok(())
    }
}

async fn run_udp(
    socket: Arc<UdpSocket>,
    handler: Arc<SeedDnsHandler>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut buf = vec![0u8; UDP_RECV_BUFFER];

    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv_from(&mut buf) => received,
        };

        match received {
            Ok((len, src)) => {
                let request = buf[..len].to_vec();
                let handler = handler.clone();
                let socket = socket.clone();

                tokio::spawn(async move {
                    let Some(response) = handler.handle(&request, Transport::Udp).await else {
                        return;
                    };
                    if let Err(e) = socket.send_to(&response, src).await {
                        debug!("DNS send to {} failed: {}", src, e);
                    }
                });
            }
            Err(e) => {
                // ICMP port-unreachable from a previous reply shows up here on some platforms
                error!("DNS UDP socket error: {}", e);
            }
        }
    }

    info!("DNS UDP listener stopped");
    Ok(())
}

async fn run_tcp(
    listener: TcpListener,
    handler: Arc<SeedDnsHandler>,
    idle_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let connections = Arc::new(Semaphore::new(MAX_TCP_CONNECTIONS));

    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                let permit = match connections.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(
                            "DNS TCP connection limit reached ({}), rejecting {}",
                            MAX_TCP_CONNECTIONS, peer_addr
                        );
                        continue;
                    }
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &handler, idle_timeout).await {
                        debug!("DNS TCP connection from {} closed: {}", peer_addr, e);
                    }
                    drop(permit);
                });
            }
            Err(e) => {
                error!("Failed to accept DNS TCP connection: {}", e);
            }
        }
    }

    info!("DNS TCP listener stopped");
    Ok(())
}

/// Serve length-prefixed queries on one connection until EOF, a malformed
/// message, or `idle_timeout` spent waiting on the peer in either direction
async fn handle_connection(
    mut stream: TcpStream,
    handler: &SeedDnsHandler,
    idle_timeout: Duration,
) -> anyhow::Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        match tokio::time::timeout(idle_timeout, stream.read_exact(&mut len_buf)).await {
            Err(_) => return Ok(()), // idle
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(_)) => {}
        }

        let msg_len = u16::from_be_bytes(len_buf) as usize;
        let mut msg_buf = vec![0u8; msg_len];
        tokio::time::timeout(idle_timeout, stream.read_exact(&mut msg_buf))
            .await
            .map_err(|_| anyhow::anyhow!("Connection timeout"))??;

        let Some(response) = handler.handle(&msg_buf, Transport::Tcp).await else {
            anyhow::bail!("malformed query, closing connection");
        };

        // Responses are capped at 65535 bytes by the encoder
        let len_bytes = (response.len() as u16).to_be_bytes();
        tokio::time::timeout(idle_timeout, async {
            stream.write_all(&len_bytes).await?;
            stream.write_all(&response).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| anyhow::anyhow!("peer stopped reading, closing connection"))??;
    }
}
