//! Stub DNS Server
//!
//! UDP server bound on the node's well-known stub address. Every inbound
//! query gets its own task; the only shared state is the read-only
//! directory snapshot and policy, so queries need no locking and may
//! complete in any order. A client that goes away only fails its own task.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info};

use crate::api::Metrics;
use crate::dns::wire::{
    self, DNS_HEADER_SIZE, DNS_MAX_PACKET_SIZE, RCODE_FORMERR, RCODE_NXDOMAIN, RCODE_SERVFAIL,
};
use crate::resolver::{Resolution, Resolver};

/// TTL advertised for locally synthesized answers. Directory entries are
/// volatile, so clients must not cache them for long.
pub const LOCAL_ANSWER_TTL: u32 = 60;

/// Run the stub DNS server until the process shuts down
pub async fn run_dns_server(
    listen: SocketAddr,
    resolver: Arc<Resolver>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let socket = Arc::new(UdpSocket::bind(listen).await?);
    info!("🌐 stub DNS server listening on {listen}");

    loop {
        let mut buf = [0u8; DNS_MAX_PACKET_SIZE];
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                let request = buf[..len].to_vec();
                let socket = socket.clone();
                let resolver = resolver.clone();
                let metrics = metrics.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_query(&socket, src, &request, &resolver, &metrics).await
                    {
                        debug!("DNS query error from {src}: {e}");
                    }
                });
            }
            Err(e) => {
                error!("DNS socket error: {e}");
            }
        }
    }
}

/// Handle a single query: Received -> Resolving -> Answered | Forwarded | Failed
async fn handle_query(
    socket: &UdpSocket,
    src: SocketAddr,
    request: &[u8],
    resolver: &Resolver,
    metrics: &Metrics,
) -> anyhow::Result<()> {
    if request.len() < DNS_HEADER_SIZE {
        return Ok(()); // Too short to even answer
    }

    metrics.inc_dns_queries();

    let query = match wire::parse_query(request) {
        Ok(query) => query,
        Err(e) => {
            // The header is readable, so give the client a deterministic
            // negative instead of a silent drop
            debug!("malformed query from {src}: {e}");
            metrics.inc_dns_failed();
            let id = wire::packet_id(request).unwrap_or(0);
            let response = wire::build_negative(id, 0, "invalid", wire::TYPE_A, RCODE_FORMERR)?;
            socket.send_to(&response, src).await?;
            return Ok(());
        }
    };

    debug!("DNS query: {} type {} from {src}", query.name, query.qtype);

    let response = match resolver.resolve(&query.name, request).await {
        Ok(Resolution::Answer { addresses, source }) => {
            debug!("answering {} locally ({})", query.name, source.as_str());
            metrics.inc_dns_answered();
            wire::build_answer(
                query.id,
                query.flags,
                &query.name,
                query.qtype,
                &addresses,
                LOCAL_ANSWER_TTL,
            )?
        }
        Ok(Resolution::Relayed { payload, source }) => {
            debug!("relaying {} from upstream ({})", query.name, source.as_str());
            metrics.inc_dns_forwarded();
            payload
        }
        Ok(Resolution::NotFound) => {
            metrics.inc_dns_negative();
            wire::build_negative(query.id, query.flags, &query.name, query.qtype, RCODE_NXDOMAIN)?
        }
        Err(e) => {
            debug!("resolution failed for {}: {e}", query.name);
            metrics.inc_dns_failed();
            wire::build_negative(query.id, query.flags, &query.name, query.qtype, RCODE_SERVFAIL)?
        }
    };

    socket.send_to(&response, src).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Node, PeerDirectory};
    use crate::policy::{DnsPolicy, PolicyHandle};
    use crate::resolver::UdpUpstream;
    use std::net::IpAddr;
    use std::time::Duration;

    async fn spawn_server(policy: DnsPolicy, nodes: Vec<Node>) -> SocketAddr {
        let directory = Arc::new(PeerDirectory::new(&policy.base_domain));
        if !nodes.is_empty() {
            directory.replace(1, nodes).await;
        }
        let resolver = Arc::new(Resolver::new(
            directory,
            Arc::new(PolicyHandle::new(policy)),
            Arc::new(UdpUpstream),
            53,
            Duration::from_millis(200),
        ));
        let metrics = Arc::new(Metrics::new());

        // Bind ourselves so we learn the ephemeral port before serving
        let socket = Arc::new(
            UdpSocket::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
                .await
                .unwrap(),
        );
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let mut buf = [0u8; DNS_MAX_PACKET_SIZE];
                let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let request = buf[..len].to_vec();
                let socket = socket.clone();
                let resolver = resolver.clone();
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    let _ = handle_query(&socket, src, &request, &resolver, &metrics).await;
                });
            }
        });

        addr
    }

    async fn ask(server: SocketAddr, packet: &[u8]) -> Vec<u8> {
        let socket = UdpSocket::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        socket.connect(server).await.unwrap();
        socket.send(packet).await.unwrap();

        let mut buf = [0u8; DNS_MAX_PACKET_SIZE];
        let len = tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf[..len].to_vec()
    }

    #[tokio::test]
    async fn test_directory_query_answered() {
        let mut policy = DnsPolicy::default();
        policy.base_domain = "mesh.example.net".to_string();
        policy.magic_dns = true;

        let node = Node::new("magicdns1", vec!["100.64.0.1".parse().unwrap()], true).unwrap();
        let server = spawn_server(policy, vec![node]).await;

        let query = wire::build_query(0x4242, "magicdns1.mesh.example.net", wire::TYPE_A).unwrap();
        let response = ask(server, &query).await;

        assert_eq!(wire::packet_id(&response), Some(0x4242));
        assert_eq!(wire::response_code(&response), Some(wire::RCODE_NOERROR));
        assert_eq!(
            wire::parse_response_addresses(&response).unwrap(),
            vec!["100.64.0.1".parse::<IpAddr>().unwrap()]
        );
    }

    #[tokio::test]
    async fn test_unknown_name_gets_nxdomain() {
        let mut policy = DnsPolicy::default();
        policy.base_domain = "mesh.example.net".to_string();
        policy.magic_dns = true;

        let server = spawn_server(policy, vec![]).await;

        let query = wire::build_query(7, "nosuchhost.mesh.example.net", wire::TYPE_A).unwrap();
        let response = ask(server, &query).await;

        assert_eq!(wire::response_code(&response), Some(RCODE_NXDOMAIN));
    }

    #[tokio::test]
    async fn test_malformed_query_gets_formerr() {
        let server = spawn_server(DnsPolicy::default(), vec![]).await;

        // Valid header claiming one question, then an invalid label length
        let mut packet = vec![0u8; DNS_HEADER_SIZE];
        packet[0] = 0xAB;
        packet[1] = 0xCD;
        packet[5] = 1; // qdcount = 1
        packet.push(0x7F); // 127 > 63

        let response = ask(server, &packet).await;
        assert_eq!(wire::response_code(&response), Some(RCODE_FORMERR));
        assert_eq!(wire::packet_id(&response), Some(0xABCD));
    }

    #[tokio::test]
    async fn test_exhausted_upstreams_get_servfail_not_a_hang() {
        let mut policy = DnsPolicy::default();
        // TEST-NET-1 address, nothing answers there
        policy.global_nameservers = vec!["192.0.2.1".parse().unwrap()];

        let server = spawn_server(policy, vec![]).await;

        let query = wire::build_query(9, "unreachable.example", wire::TYPE_A).unwrap();
        let response = ask(server, &query).await;

        assert_eq!(wire::response_code(&response), Some(RCODE_SERVFAIL));
    }

    #[tokio::test]
    async fn test_concurrent_queries_all_answered() {
        let mut policy = DnsPolicy::default();
        policy.base_domain = "mesh.example.net".to_string();
        policy.magic_dns = true;

        let nodes = (1..=5)
            .map(|i| {
                Node::new(
                    &format!("node{i}"),
                    vec![format!("100.64.0.{i}").parse().unwrap()],
                    true,
                )
                .unwrap()
            })
            .collect();
        let server = spawn_server(policy, nodes).await;

        let mut handles = Vec::new();
        for i in 1..=5u8 {
            handles.push(tokio::spawn(async move {
                let name = format!("node{i}.mesh.example.net");
                let query = wire::build_query(u16::from(i), &name, wire::TYPE_A).unwrap();
                let response = ask(server, &query).await;
                wire::parse_response_addresses(&response).unwrap()
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            let addrs = handle.await.unwrap();
            let expected: IpAddr = format!("100.64.0.{}", i + 1).parse().unwrap();
            assert_eq!(addrs, vec![expected]);
        }
    }
}
