//! DNS wire format
//!
//! Minimal encoder/decoder for the packets the stub server needs: parsing
//! inbound questions, synthesizing A/AAAA answers and negative responses,
//! and extracting addresses from upstream replies.

use anyhow::{bail, Context};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// DNS packet constants
pub const DNS_HEADER_SIZE: usize = 12;
pub const DNS_MAX_PACKET_SIZE: usize = 512;

/// DNS record types
pub const TYPE_A: u16 = 1;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_ANY: u16 = 255;

/// IN class
const CLASS_IN: u16 = 1;

/// DNS flags
pub const FLAG_QR: u16 = 0x8000; // Query/Response
pub const FLAG_AA: u16 = 0x0400; // Authoritative Answer
pub const FLAG_RD: u16 = 0x0100; // Recursion Desired

/// Response codes
pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_FORMERR: u8 = 1;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_NXDOMAIN: u8 = 3;
pub const RCODE_REFUSED: u8 = 5;

/// A parsed inbound query (first question only, as is conventional)
#[derive(Debug, Clone)]
pub struct Query {
    pub id: u16,
    pub flags: u16,
    /// Query name, lowercased, without trailing dot
    pub name: String,
    pub qtype: u16,
}

/// Parse the header and first question of a query packet
pub fn parse_query(packet: &[u8]) -> anyhow::Result<Query> {
    if packet.len() < DNS_HEADER_SIZE {
        bail!("packet shorter than DNS header");
    }

    let id = u16::from_be_bytes([packet[0], packet[1]]);
    let flags = u16::from_be_bytes([packet[2], packet[3]]);
    let qdcount = u16::from_be_bytes([packet[4], packet[5]]);

    if flags & FLAG_QR != 0 {
        bail!("packet is a response, not a query");
    }
    if qdcount == 0 {
        bail!("query carries no question");
    }

    let (name, qtype, _) = parse_question(&packet[DNS_HEADER_SIZE..])?;

    Ok(Query {
        id,
        flags,
        name,
        qtype,
    })
}

/// Parse a question section: name labels, qtype, qclass
fn parse_question(data: &[u8]) -> anyhow::Result<(String, u16, usize)> {
    let mut name_parts = Vec::new();
    let mut offset = 0;

    loop {
        if offset >= data.len() {
            bail!("truncated question");
        }

        let len = data[offset] as usize;
        if len == 0 {
            offset += 1;
            break;
        }
        if len > 63 {
            bail!("invalid label length");
        }

        offset += 1;
        if offset + len > data.len() {
            bail!("truncated label");
        }

        let label = std::str::from_utf8(&data[offset..offset + len])?;
        name_parts.push(label.to_lowercase());
        offset += len;
    }

    if offset + 4 > data.len() {
        bail!("truncated question");
    }

    let qtype = u16::from_be_bytes([data[offset], data[offset + 1]]);
    let _qclass = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);
    offset += 4;

    Ok((name_parts.join("."), qtype, offset))
}

/// Build a query packet for the given name and type
pub fn build_query(id: u16, name: &str, qtype: u16) -> anyhow::Result<Vec<u8>> {
    let mut packet = Vec::with_capacity(DNS_HEADER_SIZE + name.len() + 6);

    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&FLAG_RD.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    packet.extend_from_slice(&0u16.to_be_bytes()); // ancount
    packet.extend_from_slice(&0u16.to_be_bytes()); // nscount
    packet.extend_from_slice(&0u16.to_be_bytes()); // arcount

    encode_name(&mut packet, name)?;
    packet.extend_from_slice(&qtype.to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());

    Ok(packet)
}

fn encode_name(packet: &mut Vec<u8>, name: &str) -> anyhow::Result<()> {
    for label in name.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > 63 {
            bail!("invalid label {label:?} in name {name:?}");
        }
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);
    Ok(())
}

/// Build an authoritative answer for a locally resolved name.
///
/// The answer set is filtered to the query type; TTL is the short fixed
/// value used for volatile directory entries.
pub fn build_answer(
    id: u16,
    request_flags: u16,
    qname: &str,
    qtype: u16,
    addresses: &[IpAddr],
    ttl: u32,
) -> anyhow::Result<Vec<u8>> {
    let ipv4: Vec<Ipv4Addr> = addresses
        .iter()
        .filter_map(|a| match a {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
        .collect();
    let ipv6: Vec<Ipv6Addr> = addresses
        .iter()
        .filter_map(|a| match a {
            IpAddr::V4(_) => None,
            IpAddr::V6(v6) => Some(*v6),
        })
        .collect();

    let ancount = match qtype {
        TYPE_A => ipv4.len() as u16,
        TYPE_AAAA => ipv6.len() as u16,
        TYPE_ANY => (ipv4.len() + ipv6.len()) as u16,
        _ => 0,
    };

    let flags = FLAG_QR | FLAG_AA | (request_flags & FLAG_RD);
    let mut response = header_and_question(id, flags, ancount, qname, qtype)?;

    // Question always starts right after the header
    let name_ptr = 0xC000 | (DNS_HEADER_SIZE as u16);

    if qtype == TYPE_A || qtype == TYPE_ANY {
        for ip in &ipv4 {
            if response.len() + 16 > DNS_MAX_PACKET_SIZE {
                break;
            }
            response.extend_from_slice(&name_ptr.to_be_bytes());
            response.extend_from_slice(&TYPE_A.to_be_bytes());
            response.extend_from_slice(&CLASS_IN.to_be_bytes());
            response.extend_from_slice(&ttl.to_be_bytes());
            response.extend_from_slice(&4u16.to_be_bytes());
            response.extend_from_slice(&ip.octets());
        }
    }

    if qtype == TYPE_AAAA || qtype == TYPE_ANY {
        for ip in &ipv6 {
            if response.len() + 28 > DNS_MAX_PACKET_SIZE {
                break;
            }
            response.extend_from_slice(&name_ptr.to_be_bytes());
            response.extend_from_slice(&TYPE_AAAA.to_be_bytes());
            response.extend_from_slice(&CLASS_IN.to_be_bytes());
            response.extend_from_slice(&ttl.to_be_bytes());
            response.extend_from_slice(&16u16.to_be_bytes());
            response.extend_from_slice(&ip.octets());
        }
    }

    Ok(response)
}

/// Build a negative response (NXDOMAIN, SERVFAIL, FORMERR) echoing the question
pub fn build_negative(
    id: u16,
    request_flags: u16,
    qname: &str,
    qtype: u16,
    rcode: u8,
) -> anyhow::Result<Vec<u8>> {
    let flags = FLAG_QR | (request_flags & FLAG_RD) | u16::from(rcode & 0x0F);
    header_and_question(id, flags, 0, qname, qtype)
}

fn header_and_question(
    id: u16,
    flags: u16,
    ancount: u16,
    qname: &str,
    qtype: u16,
) -> anyhow::Result<Vec<u8>> {
    let mut response = Vec::with_capacity(DNS_MAX_PACKET_SIZE);

    response.extend_from_slice(&id.to_be_bytes());
    response.extend_from_slice(&flags.to_be_bytes());
    response.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    response.extend_from_slice(&ancount.to_be_bytes());
    response.extend_from_slice(&0u16.to_be_bytes()); // nscount
    response.extend_from_slice(&0u16.to_be_bytes()); // arcount

    encode_name(&mut response, qname)?;
    response.extend_from_slice(&qtype.to_be_bytes());
    response.extend_from_slice(&CLASS_IN.to_be_bytes());

    Ok(response)
}

/// Transaction ID of a packet
pub fn packet_id(packet: &[u8]) -> Option<u16> {
    if packet.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([packet[0], packet[1]]))
}

/// Whether the QR bit marks this packet as a response
pub fn is_response(packet: &[u8]) -> bool {
    packet.len() >= 4 && packet[2] & 0x80 != 0
}

/// Response code of a packet
pub fn response_code(packet: &[u8]) -> Option<u8> {
    if packet.len() < 4 {
        return None;
    }
    Some(packet[3] & 0x0F)
}

/// Extract A/AAAA addresses from a response packet's answer section.
///
/// Handles compression pointers in owner names; non-address record types
/// are skipped.
pub fn parse_response_addresses(packet: &[u8]) -> anyhow::Result<Vec<IpAddr>> {
    if packet.len() < DNS_HEADER_SIZE {
        bail!("packet shorter than DNS header");
    }

    let qdcount = u16::from_be_bytes([packet[4], packet[5]]);
    let ancount = u16::from_be_bytes([packet[6], packet[7]]);

    let mut offset = DNS_HEADER_SIZE;
    for _ in 0..qdcount {
        offset = skip_name(packet, offset)?;
        offset += 4; // qtype + qclass
        if offset > packet.len() {
            bail!("truncated question section");
        }
    }

    let mut addresses = Vec::new();
    for _ in 0..ancount {
        offset = skip_name(packet, offset)?;
        if offset + 10 > packet.len() {
            bail!("truncated resource record");
        }

        let rtype = u16::from_be_bytes([packet[offset], packet[offset + 1]]);
        let rdlength = u16::from_be_bytes([packet[offset + 8], packet[offset + 9]]) as usize;
        offset += 10;

        if offset + rdlength > packet.len() {
            bail!("truncated rdata");
        }

        match (rtype, rdlength) {
            (TYPE_A, 4) => {
                let octets: [u8; 4] = packet[offset..offset + 4]
                    .try_into()
                    .context("A rdata")?;
                addresses.push(IpAddr::V4(Ipv4Addr::from(octets)));
            }
            (TYPE_AAAA, 16) => {
                let octets: [u8; 16] = packet[offset..offset + 16]
                    .try_into()
                    .context("AAAA rdata")?;
                addresses.push(IpAddr::V6(Ipv6Addr::from(octets)));
            }
            _ => {}
        }

        offset += rdlength;
    }

    Ok(addresses)
}

/// Advance past an encoded name starting at `offset`
fn skip_name(packet: &[u8], mut offset: usize) -> anyhow::Result<usize> {
    loop {
        let len = *packet.get(offset).context("truncated name")?;

        // Compression pointer terminates the name
        if len & 0xC0 == 0xC0 {
            if offset + 2 > packet.len() {
                bail!("truncated compression pointer");
            }
            return Ok(offset + 2);
        }

        if len == 0 {
            return Ok(offset + 1);
        }
        if len > 63 {
            bail!("invalid label length");
        }

        offset += 1 + len as usize;
        if offset > packet.len() {
            bail!("truncated label");
        }
    }
}
