//! Upstream DNS exchange
//!
//! One query/response round trip to a single upstream resolver over UDP,
//! with a bounded timeout. Retry across resolvers is the caller's policy,
//! not this transport's.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::trace;

use crate::dns::wire::{self, DNS_MAX_PACKET_SIZE};

/// Failure of a single upstream attempt. Never surfaced to DNS clients
/// directly; the resolver moves on to the next configured upstream.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("upstream {0} timed out")]
    UpstreamTimeout(SocketAddr),

    #[error("upstream {server} returned a mismatched transaction id")]
    IdMismatch { server: SocketAddr },

    #[error("upstream {server} sent a malformed response")]
    Malformed { server: SocketAddr },

    #[error("upstream i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// One DNS exchange with one upstream server. Trait seam so the resolver's
/// forwarding policy can be tested without the network.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn exchange(
        &self,
        server: SocketAddr,
        query: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, ForwardError>;
}

/// Real UDP transport
pub struct UdpUpstream;

#[async_trait]
impl Upstream for UdpUpstream {
    async fn exchange(
        &self,
        server: SocketAddr,
        query: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, ForwardError> {
        let bind_addr: SocketAddr = if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16, 0, 0, 0, 0, 0, 0, 0], 0))
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(server).await?;
        socket.send(query).await?;

        let mut buf = [0u8; DNS_MAX_PACKET_SIZE];
        let len = tokio::time::timeout(timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ForwardError::UpstreamTimeout(server))??;

        let response = buf[..len].to_vec();
        trace!("upstream {server} answered {len} bytes");

        if !wire::is_response(&response) {
            return Err(ForwardError::Malformed { server });
        }
        if wire::packet_id(&response) != wire::packet_id(query) {
            return Err(ForwardError::IdMismatch { server });
        }

        Ok(response)
    }
}
