use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use log::debug;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{sleep_until, timeout, Instant};

use crate::util::error::Result;

/// UDP port fans use for both beacons and state broadcasts.
pub const DISCOVERY_PORT: u16 = 5625;
/// UDP port fans accept JSON commands on, unless configured otherwise.
pub const DEFAULT_COMMAND_PORT: u16 = 5600;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 4096;

/// Where and how a listener binds.
#[derive(Debug, Clone)]
pub struct ListenConfig {
    /// Typically `0.0.0.0:5625`, the only address fans broadcast to.
    pub bind_addr: SocketAddr,
    /// Upper bound on a single blocking receive before the deadline is re-checked.
    pub poll_interval: Duration,
    pub recv_buffer_size: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT)),
            poll_interval: DEFAULT_POLL_INTERVAL,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }
}

impl ListenConfig {
    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }
}

/// Binds a UDP socket with `SO_REUSEADDR` set, so several listeners (or a quick
/// rebind after a previous run) can share the discovery port.
pub fn bind_reusable(addr: SocketAddr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    let socket = UdpSocket::from_std(socket.into())?;
    debug!("Bound UDP listener on {}", socket.local_addr()?);
    Ok(socket)
}

/// Outcome of one poll iteration.
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Datagram { len: usize, source: SocketAddr },
    Idle,
}

/// Waits for one datagram, blocking at most `poll_interval` and never past `deadline`.
///
/// Receive errors are logged and reported as `Idle` once the poll interval has
/// elapsed, so a socket that keeps failing does not spin the caller's loop.
pub async fn poll_recv(
    socket: &UdpSocket,
    buffer: &mut [u8],
    deadline: Instant,
    poll_interval: Duration,
) -> Received {
    let remaining = deadline.saturating_duration_since(Instant::now());
    let wait = remaining.min(poll_interval);
    if wait.is_zero() {
        return Received::Idle;
    }
    let poll_end = Instant::now() + wait;

    match timeout(wait, socket.recv_from(buffer)).await {
        Ok(Ok((len, source))) => Received::Datagram { len, source },
        Ok(Err(e)) => {
            debug!("Failed to receive datagram: {}", e);
            sleep_until(poll_end).await;
            Received::Idle
        }
        Err(_) => Received::Idle,
    }
}

/// Binds an ephemeral sender socket of the same address family as `target`.
pub async fn bind_sender(target: &SocketAddr) -> Result<UdpSocket> {
    let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    Ok(UdpSocket::bind(local).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_default_config_binds_discovery_port() {
        let config = ListenConfig::default();
        assert_eq!(config.bind_addr.port(), DISCOVERY_PORT);
        assert!(config.bind_addr.ip().is_unspecified());
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_poll_recv_returns_queued_datagram() {
        let listener = bind_reusable(loopback()).unwrap();
        let sender = UdpSocket::bind(loopback()).await.unwrap();
        sender
            .send_to(b"hello", listener.local_addr().unwrap())
            .await
            .unwrap();

        let mut buffer = [0u8; 64];
        let deadline = Instant::now() + Duration::from_secs(2);
        let received = poll_recv(&listener, &mut buffer, deadline, DEFAULT_POLL_INTERVAL).await;
        assert_eq!(
            received,
            Received::Datagram {
                len: 5,
                source: sender.local_addr().unwrap()
            }
        );
        assert_eq!(&buffer[..5], b"hello");
    }

    #[tokio::test]
    async fn test_poll_recv_is_bounded_by_poll_interval() {
        let listener = bind_reusable(loopback()).unwrap();
        let mut buffer = [0u8; 64];
        let start = Instant::now();
        let deadline = start + Duration::from_secs(10);
        let received =
            poll_recv(&listener, &mut buffer, deadline, Duration::from_millis(50)).await;
        assert_eq!(received, Received::Idle);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_poll_recv_error_waits_out_poll_interval() {
        let closed = UdpSocket::bind(loopback()).await.unwrap();
        let closed_addr = closed.local_addr().unwrap();
        drop(closed);

        // Sending to a closed port makes the next receive fail on most platforms.
        let socket = bind_reusable(loopback()).unwrap();
        socket.connect(closed_addr).await.unwrap();
        socket.send(b"x").await.unwrap();

        let mut buffer = [0u8; 64];
        let poll_interval = Duration::from_millis(150);
        let start = Instant::now();
        let deadline = start + Duration::from_secs(10);
        let received = poll_recv(&socket, &mut buffer, deadline, poll_interval).await;
        assert_eq!(received, Received::Idle);
        assert!(start.elapsed() >= poll_interval);
    }

    #[tokio::test]
    async fn test_poll_recv_after_deadline_is_idle() {
        let listener = bind_reusable(loopback()).unwrap();
        let mut buffer = [0u8; 64];
        let deadline = Instant::now();
        let received = poll_recv(&listener, &mut buffer, deadline, DEFAULT_POLL_INTERVAL).await;
        assert_eq!(received, Received::Idle);
    }
}
