//! UDP fan-out to display units
//!
//! Every payload goes to every configured destination as its own datagram.
//! Delivery is fire-and-forget: a failed send is logged and counted, never
//! retried, and never blocks the other destinations.

use crate::error::{Error, Result};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

/// Send-only UDP socket with a fixed destination list
pub struct UdpFanout {
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
    failures: u64,
}

impl UdpFanout {
    /// Bind an ephemeral socket and resolve `targets` (`host:port` strings)
    pub fn new<S: AsRef<str>>(targets: &[S]) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;

        let mut resolved = Vec::with_capacity(targets.len());
        for target in targets {
            let target = target.as_ref();
            let addr = target
                .to_socket_addrs()?
                .find(SocketAddr::is_ipv4)
                .ok_or_else(|| Error::Config(format!("no IPv4 address for {}", target)))?;
            resolved.push(addr);
        }

        Ok(Self::with_socket(socket, resolved))
    }

    /// Use an already bound socket
    pub fn with_socket(socket: UdpSocket, targets: Vec<SocketAddr>) -> Self {
        Self {
            socket,
            targets,
            failures: 0,
        }
    }

    pub fn targets(&self) -> &[SocketAddr] {
        &self.targets
    }

    /// Total failed sends
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Send `payload` to every destination, returning how many succeeded
    pub fn send(&mut self, payload: &[u8]) -> usize {
        if payload.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        for target in &self.targets {
            match self.socket.send_to(payload, target) {
                Ok(_) => delivered += 1,
                Err(e) => {
                    self.failures += 1;
                    log::warn!("Failed to send {} bytes to {}: {}", payload.len(), target, e);
                }
            }
        }
        delivered
    }
}
