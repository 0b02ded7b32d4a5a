//! UDP datagram transport
//!
//! Each general listens on one long-lived socket bound to its own address
//! at the shared service port. Outbound datagrams use short-lived sockets
//! bound to the same address so the source IP identifies the sender;
//! acknowledgements are addressed to the source IP at the service port,
//! never to the ephemeral source port.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{Ack, GeneralId};

pub struct Transport {
    socket: UdpSocket,
    port: u16,
    my_addr: Ipv4Addr,
    hosts: Vec<String>,
    ip_to_id: HashMap<Ipv4Addr, GeneralId>,
}

impl Transport {
    /// Bind the listening socket with address reuse enabled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: &Config) -> Result<Self> {
        let port = config.port;
        let fail = move |source: io::Error| Error::BindFailed { port, source };

        let addr = SocketAddr::from((config.my_addr, port));
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(fail)?;
        socket.set_reuse_address(true).map_err(fail)?;
        socket.bind(&addr.into()).map_err(fail)?;
        socket.set_nonblocking(true).map_err(fail)?;
        let socket = UdpSocket::from_std(socket.into()).map_err(fail)?;

        tracing::debug!("listening on {}", addr);
        Ok(Self {
            socket,
            port,
            my_addr: config.my_addr,
            hosts: config.hosts.clone(),
            ip_to_id: config.ip_to_id.clone(),
        })
    }

    /// Id of the general behind `addr`, if it is a configured peer.
    pub fn peer_id(&self, addr: SocketAddr) -> Option<GeneralId> {
        match addr.ip() {
            IpAddr::V4(ip) => self.ip_to_id.get(&ip).copied(),
            IpAddr::V6(_) => None,
        }
    }

    /// Send one datagram to general `id`, resolving its hostname afresh.
    pub async fn send_to(&self, id: GeneralId, payload: &[u8]) -> io::Result<()> {
        let host = &self.hosts[(id - 1) as usize];
        let target = lookup_host((host.as_str(), self.port))
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no IPv4 address for {host}"))
            })?;
        let socket = UdpSocket::bind((self.my_addr, 0)).await?;
        socket.send_to(payload, target).await?;
        Ok(())
    }

    /// Acknowledge a round to the general at `source`.
    pub async fn send_ack(&self, source: IpAddr, round: u32) -> io::Result<()> {
        let socket = UdpSocket::bind((self.my_addr, 0)).await?;
        socket
            .send_to(&Ack { round }.to_bytes(), (source, self.port))
            .await?;
        Ok(())
    }

    /// Receive one datagram, waiting no later than `deadline`.
    ///
    /// Returns `None` when the deadline expires. Receive errors are logged
    /// and retried; they never surface to the protocol loop.
    pub async fn recv(&self, deadline: Instant, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
        loop {
            match tokio::time::timeout_at(deadline, self.socket.recv_from(buf)).await {
                Err(_) => return None,
                Ok(Ok((len, from))) => return Some((len, from)),
                Ok(Err(e)) => tracing::warn!("receive failed: {}", e),
            }
        }
    }
}
