//! DHCPv4 wire codec: BOOTP frame validation, header and option decode,
//! reply encode with option coalescing, and response routing.
//!
//! Decoded DHCP packets reuse the shared [`Packet`] type: the xid becomes
//! `id` and a vector synthesized from the client hardware address plus the
//! message type stands in for the authenticator, so DHCP requests can share
//! the request table with RADIUS traffic. The `code` field is namespaced
//! via [`code::DHCP_OFFSET`].

use crate::avp::{dhcp_base_option, dhcp_suboption, is_dhcp_attr, Avp, Value, ValueKind};
use crate::code;
use crate::dict::{
    self, DHCP_FLAGS, DHCP_HEADER_FIELDS, DHCP_INTERFACE_MTU, DHCP_MAXIMUM_MSG_SIZE,
    DHCP_MESSAGE_TYPE, DHCP_VENDOR_CLASS_IDENTIFIER, DHCP_YOUR_IP_ADDRESS,
};
use crate::packet::Packet;
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use thiserror::Error;
use tracing::{debug, warn};

/// Smallest well-formed frame: fixed header, cookie, and the mandatory
/// Message-Type option.
pub const MIN_PACKET_SIZE: usize = 244;
/// Ethernet MTU minus IP and UDP headers.
pub const MAX_PACKET_SIZE: usize = 1500 - 40;
/// Replies are zero-padded to this size; some clients reject shorter frames.
pub const DEFAULT_PACKET_SIZE: usize = 300;
/// Floor for client-announced MTU and maximum message size.
pub const MIN_MESSAGE_SIZE: u32 = 576;

const MAGIC_COOKIE: u32 = 0x6382_5363;
const OPTIONS_OFFSET: usize = 240;

#[derive(Error, Debug)]
pub enum DhcpError {
    #[error("DHCP packet is too small ({0} < {MIN_PACKET_SIZE})")]
    TooShort(usize),
    #[error("DHCP packet is too large ({0} > {MAX_PACKET_SIZE})")]
    TooLong(usize),
    #[error("cannot receive DHCP server messages (opcode {0})")]
    OpcodeNotRequest(u8),
    #[error("DHCP can only receive ethernet requests, not type {0:#04x}")]
    HardwareTypeNotEthernet(u8),
    #[error("ethernet hardware address length is wrong ({0})")]
    BadHardwareLength(u8),
    #[error("BOOTP magic cookie missing ({0:#010x})")]
    BadCookie(u32),
    #[error("unknown or badly formatted DHCP packet (message type option {0:?})")]
    BadMessageType([u8; 3]),
    #[error("client MTU {0} is smaller than the minimum permitted by the specification")]
    MtuTooSmall(u32),
    #[error("cannot encode a reply without the original request")]
    MissingOriginal,
}

fn be16(data: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([data[off], data[off + 1]])
}

fn be32(data: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn ipv4_at(data: &[u8], off: usize) -> Ipv4Addr {
    Ipv4Addr::new(data[off], data[off + 1], data[off + 2], data[off + 3])
}

/// Validate a received datagram and decode it into a [`Packet`].
///
/// `src`/`dst` are the datagram's source address and the local socket
/// address; both are carried into the packet for reply routing.
pub fn recv(data: &[u8], src: SocketAddr, dst: SocketAddr) -> Result<Packet, DhcpError> {
    if data.len() < MIN_PACKET_SIZE {
        return Err(DhcpError::TooShort(data.len()));
    }
    if data.len() > MAX_PACKET_SIZE {
        return Err(DhcpError::TooLong(data.len()));
    }
    if data[0] != 1 {
        return Err(DhcpError::OpcodeNotRequest(data[0]));
    }
    if data[1] != 1 {
        return Err(DhcpError::HardwareTypeNotEthernet(data[1]));
    }
    if data[2] != 6 {
        return Err(DhcpError::BadHardwareLength(data[2]));
    }
    let cookie = be32(data, 236);
    if cookie != MAGIC_COOKIE {
        return Err(DhcpError::BadCookie(cookie));
    }

    // The Message-Type option must come first, directly after the cookie.
    if data[240] != 53 || data[241] != 1 || data[242] == 0 || data[242] >= 8 {
        return Err(DhcpError::BadMessageType([data[240], data[241], data[242]]));
    }
    let message_type = data[242];

    let mut packet = Packet::new(code::DHCP_OFFSET + u32::from(message_type), be32(data, 4));

    // Synthesize the dedup vector from the client hardware address and the
    // message type; the remaining bytes stay zero. This keeps the exact
    // bytes stable so DHCP shares the request table with RADIUS.
    let hlen = usize::from(data[2]);
    packet.authenticator[..hlen].copy_from_slice(&data[28..28 + hlen]);
    packet.authenticator[hlen] = message_type;

    packet.src = src;
    packet.dst = dst;
    packet.data = data.to_vec();

    decode(&mut packet)?;

    debug!(
        code = code::code_name(packet.code),
        xid = packet.id,
        src = %packet.src,
        "received DHCP packet"
    );
    Ok(packet)
}

fn decode_fixed(kind: ValueKind, raw: &[u8]) -> Value {
    match kind {
        ValueKind::Byte => Value::Byte(raw[0]),
        ValueKind::Short => Value::Short(be16(raw, 0)),
        ValueKind::Integer => Value::Integer(be32(raw, 0)),
        ValueKind::Date => Value::Date(be32(raw, 0)),
        ValueKind::Ipaddr => Value::Ipaddr(ipv4_at(raw, 0)),
        ValueKind::Ethernet => {
            let mut e = [0u8; 6];
            e.copy_from_slice(&raw[..6]);
            Value::Ethernet(e)
        }
        ValueKind::String | ValueKind::Octets => unreachable!("variable-width kind"),
    }
}

/// Decode a NUL-terminated fixed-size string field; the stored length
/// excludes the terminator.
fn decode_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn decode_option(entry: &dict::DictEntry, raw: &[u8], vps: &mut Vec<Avp>) {
    let attribute = crate::avp::dhcp_attr(u32::from(entry.option));

    // Type-1 (ethernet) client identifiers decode to a typed hardware
    // address for ease of use.
    if entry.option == 0x3d && !entry.array && raw.len() == 7 && raw[0] == 1 {
        let mut e = [0u8; 6];
        e.copy_from_slice(&raw[1..7]);
        vps.push(Avp::new(attribute, Value::Ethernet(e)));
        return;
    }

    if entry.array {
        if let Some(width) = entry.kind.fixed_width() {
            if raw.len() % width != 0 {
                // Non-divisible array payload falls back to raw octets.
                vps.push(Avp::octets(attribute, raw));
                return;
            }
            for chunk in raw.chunks(width) {
                vps.push(Avp::new(attribute, decode_fixed(entry.kind, chunk)));
            }
            return;
        }
    }

    match entry.kind {
        ValueKind::String => vps.push(Avp::string(attribute, decode_string(raw))),
        ValueKind::Octets => vps.push(Avp::octets(attribute, raw)),
        kind => {
            let width = kind.fixed_width().unwrap_or(0);
            if raw.len() != width {
                // Width mismatch also falls back to raw octets.
                vps.push(Avp::octets(attribute, raw));
            } else {
                vps.push(Avp::new(attribute, decode_fixed(kind, raw)));
            }
        }
    }
}

/// Decode the fixed header and the option area of `packet.data` into its
/// attribute list, then apply the post-decode adjustments.
pub fn decode(packet: &mut Packet) -> Result<(), DhcpError> {
    if packet.data.len() < MIN_PACKET_SIZE {
        return Err(DhcpError::TooShort(packet.data.len()));
    }
    if packet.data[1] != 1 {
        return Err(DhcpError::HardwareTypeNotEthernet(packet.data[1]));
    }

    let hlen = usize::from(packet.data[2]);
    let mut vps = Vec::new();

    let mut off = 0usize;
    for field in &DHCP_HEADER_FIELDS {
        let raw = &packet.data[off..off + field.width];
        off += field.width;

        if field.attribute == dict::DHCP_CLIENT_HARDWARE_ADDRESS {
            if packet.data[1] == 1 && hlen == 6 {
                vps.push(Avp::new(field.attribute, decode_fixed(ValueKind::Ethernet, raw)));
            } else {
                vps.push(Avp::octets(field.attribute, &raw[..hlen.min(raw.len())]));
            }
            continue;
        }

        match field.kind {
            ValueKind::String => {
                let s = decode_string(raw);
                if !s.is_empty() {
                    vps.push(Avp::string(field.attribute, s));
                }
            }
            kind => vps.push(Avp::new(field.attribute, decode_fixed(kind, raw))),
        }
    }

    // Walk the option area. Pad bytes are skipped, the end option stops
    // the walk, and anything malformed is logged and dropped.
    let mut i = OPTIONS_OFFSET;
    while i < packet.data.len() {
        let tag = packet.data[i];
        if tag == 0 {
            i += 1;
            continue;
        }
        if tag == 255 {
            break;
        }
        if i + 2 > packet.data.len() {
            warn!(option = tag, "truncated option header, stopping option parse");
            break;
        }
        let alen = usize::from(packet.data[i + 1]);
        if alen > 252 {
            warn!(option = tag, length = alen, "option too long, skipping");
            i += 2 + alen;
            continue;
        }
        if i + 2 + alen > packet.data.len() {
            warn!(option = tag, length = alen, "option runs past end of packet");
            break;
        }
        let raw = &packet.data[i + 2..i + 2 + alen];
        i += 2 + alen;

        match dict::dhcp_option_entry(tag) {
            Some(entry) => decode_option(entry, raw, &mut vps),
            None => debug!(option = tag, "option not in dictionary, skipping"),
        }
    }

    packet.vps = vps;

    // Broken vendor fix-up: some clients ask for a unicast reply they
    // cannot receive. Only applies when no relay is involved.
    let giaddr_zero = ipv4_at(&packet.data, 24).is_unspecified();
    if giaddr_zero
        && packet.value_u32(DHCP_MESSAGE_TYPE) == Some(3)
        && packet.value_str(DHCP_VENDOR_CLASS_IDENTIFIER) == Some("MSFT 98")
    {
        if let Some(Value::Short(flags)) = packet.find_mut(DHCP_FLAGS).map(|a| &mut a.value) {
            *flags |= 0x8000;
        }
        packet.data[10] |= 0x80;
    }

    // Clients can ask for larger replies, never smaller, and never larger
    // than their own MTU.
    let mtu = packet.value_u32(DHCP_INTERFACE_MTU);
    let maxms = packet.value_u32(DHCP_MAXIMUM_MSG_SIZE);

    if let Some(mtu) = mtu {
        if mtu < MIN_MESSAGE_SIZE {
            return Err(DhcpError::MtuTooSmall(mtu));
        }
    }
    if let Some(v) = maxms {
        if v < MIN_MESSAGE_SIZE {
            warn!(
                maximum_msg_size = v,
                "client maximum message size is below the protocol minimum, raising it"
            );
            packet.set(DHCP_MAXIMUM_MSG_SIZE, Value::Short(MIN_MESSAGE_SIZE as u16));
        } else if let Some(mtu) = mtu {
            if v > mtu {
                warn!(
                    maximum_msg_size = v,
                    mtu, "client maximum message size exceeds its MTU, capping it"
                );
                packet.set(DHCP_MAXIMUM_MSG_SIZE, Value::Short(mtu as u16));
            }
        }
    }

    Ok(())
}

/// Serialization order: Message-Type first, Relay-Agent-Information last,
/// everything else by ascending attribute id.
fn sort_group(attribute: u32) -> u8 {
    if attribute == DHCP_MESSAGE_TYPE {
        0
    } else if is_dhcp_attr(attribute) && dhcp_base_option(attribute) == 82 {
        2
    } else {
        1
    }
}

/// Encode a reply into `packet.data` and fill in its routing addresses
/// from the original request.
///
/// With no original, a client-mode header (opcode 1, fresh xid) is
/// started, but completing it is unsupported.
pub fn encode(packet: &mut Packet, original: Option<&Packet>) -> Result<(), DhcpError> {
    if !packet.data.is_empty() {
        return Ok(());
    }
    if packet.code == 0 {
        packet.code = code::DHCP_NAK;
    }

    let mut buf: Vec<u8> = Vec::with_capacity(MAX_PACKET_SIZE);

    buf.push(if original.is_some() { 2 } else { 1 });
    buf.push(1); // hardware type: ethernet
    buf.push(original.map_or(6, |o| o.data[2]));
    buf.push(0); // hops

    match original {
        Some(o) => buf.extend_from_slice(&o.data[4..8]),
        None => buf.extend_from_slice(&rand::rng().random::<u32>().to_be_bytes()),
    }

    buf.extend_from_slice(&[0, 0]); // secs

    match original {
        Some(o) => buf.extend_from_slice(&o.data[10..16]), // flags + ciaddr
        None => buf.extend_from_slice(&[0u8; 6]),
    }

    let yiaddr = packet
        .value_ipaddr(DHCP_YOUR_IP_ADDRESS)
        .unwrap_or(Ipv4Addr::UNSPECIFIED);
    buf.extend_from_slice(&yiaddr.octets());

    buf.extend_from_slice(&[0u8; 4]); // siaddr
    buf.extend_from_slice(&[0u8; 4]); // giaddr

    let original = original.ok_or(DhcpError::MissingOriginal)?;

    buf.extend_from_slice(&original.data[28..44]); // chaddr
    buf.extend_from_slice(&[0u8; 192]); // bootp legacy
    buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());

    // Effective maximum message size from the request.
    let mut mms = MIN_MESSAGE_SIZE;
    if let Some(v) = original.value_u32(DHCP_MAXIMUM_MSG_SIZE) {
        if v > mms {
            mms = v.min(MAX_PACKET_SIZE as u32);
        }
    }

    if let Some(mt) = packet.value_u32(DHCP_MESSAGE_TYPE) {
        if mt != packet.code - code::DHCP_OFFSET {
            warn!(
                avp_type = mt,
                code = code::code_name(packet.code),
                "Message-Type attribute does not match packet code"
            );
        }
    }
    packet.remove_all(DHCP_MESSAGE_TYPE);

    packet
        .vps
        .sort_by_key(|avp| (sort_group(avp.attribute), avp.attribute));

    // Message-Type always leads the option area.
    buf.push(0x35);
    buf.push(1);
    buf.push((packet.code - code::DHCP_OFFSET) as u8);

    let vps = &packet.vps;
    let mut idx = 0;
    while idx < vps.len() {
        let attribute = vps[idx].attribute;
        if !is_dhcp_attr(attribute)
            || ((attribute & 0xffff) > 255 && dhcp_base_option(attribute) != 82)
        {
            idx += 1;
            continue;
        }

        let mut run_end = idx + 1;
        while run_end < vps.len() && vps[run_end].attribute == attribute {
            run_end += 1;
        }
        let run_len = run_end - idx;

        buf.push(dhcp_base_option(attribute));
        let len_at = buf.len();
        buf.push(0);

        let relay_agent = dhcp_base_option(attribute) == 82;
        if relay_agent {
            // Nested TLV: sub-tag plus an inner length fixed up below.
            buf.push(dhcp_suboption(attribute));
            buf.push(0);
            buf[len_at] = 2;
        }

        // Consecutive attributes of the same id coalesce into one option.
        let mut entry = idx;
        while entry < run_end {
            let vp = &vps[entry];
            let mut value = Vec::with_capacity(vp.value.wire_len() + 1);
            if matches!(vp.value, Value::Ethernet(_)) && run_len == 1 {
                // Singleton hardware-address values gain the type-1
                // client-identifier prefix.
                value.push(1);
            }
            vp.value.to_wire(&mut value);

            if value.len() > 255 || usize::from(buf[len_at]) + value.len() > 255 {
                warn!(
                    attribute = dict::attr_name(attribute),
                    "ignoring attribute too long for a single option"
                );
                entry += 1;
                break;
            }
            buf.extend_from_slice(&value);
            buf[len_at] += value.len() as u8;
            entry += 1;
        }

        if relay_agent {
            buf[len_at + 2] = buf[len_at] - 2;
        }

        idx = entry;
    }

    buf.push(0xff);
    buf.push(0x00);

    if buf.len() > mms as usize {
        warn!(
            size = buf.len(),
            maximum_msg_size = mms,
            "encoded reply exceeds the client's maximum message size"
        );
    }
    if buf.len() < DEFAULT_PACKET_SIZE {
        buf.resize(DEFAULT_PACKET_SIZE, 0);
    }
    packet.data = buf;

    // Responses never go back to the source address of the request; the
    // relay closest to the client wins, then the routing ladder below.
    let giaddr = ipv4_at(&original.data, 24);
    let ciaddr = ipv4_at(&original.data, 12);
    let flags = be16(&original.data, 10);
    let yiaddr = ipv4_at(&original.data, 16);

    let preset_dst_unspecified = match packet.dst.ip() {
        IpAddr::V4(ip) => ip.is_unspecified(),
        IpAddr::V6(_) => true,
    };

    let dst_ip = if !giaddr.is_unspecified() {
        giaddr
    } else if packet.code == code::DHCP_NAK {
        Ipv4Addr::BROADCAST
    } else if !ciaddr.is_unspecified() {
        ciaddr
    } else if flags & 0x8000 != 0 {
        Ipv4Addr::BROADCAST
    } else if preset_dst_unspecified {
        Ipv4Addr::BROADCAST
    } else {
        yiaddr
    };

    packet.dst = SocketAddr::new(IpAddr::V4(dst_ip), original.src.port());
    packet.src = SocketAddr::new(original.dst.ip(), original.dst.port());

    debug!(
        code = code::code_name(packet.code),
        xid = packet.id,
        dst = %packet.dst,
        "encoded DHCP reply"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avp::{dhcp_attr, dhcp_suboption_attr};
    use crate::dict::{
        DHCP_CLIENT_HARDWARE_ADDRESS, DHCP_CLIENT_IDENTIFIER, DHCP_TRANSACTION_ID,
    };

    const CHADDR: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

    fn src() -> SocketAddr {
        "10.0.0.1:68".parse().unwrap()
    }

    fn dst() -> SocketAddr {
        "192.0.2.10:67".parse().unwrap()
    }

    /// A minimal DHCPDISCOVER frame with caller-supplied extra options.
    fn build_frame(message_type: u8, extra_options: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 300];
        data[0] = 1; // BOOTREQUEST
        data[1] = 1; // ethernet
        data[2] = 6;
        data[4..8].copy_from_slice(&0x1234_5678u32.to_be_bytes());
        data[28..34].copy_from_slice(&CHADDR);
        data[236..240].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        data[240] = 53;
        data[241] = 1;
        data[242] = message_type;
        let end = 243 + extra_options.len();
        data[243..end].copy_from_slice(extra_options);
        data[end] = 255;
        data
    }

    #[test]
    fn test_decode_discover() {
        // Option 55 with three requested parameters.
        let frame = build_frame(1, &[55, 3, 1, 3, 6]);
        let packet = recv(&frame, src(), dst()).unwrap();

        assert_eq!(packet.code, code::DHCP_DISCOVER);
        assert_eq!(packet.id, 0x1234_5678);
        assert_eq!(&packet.authenticator[..6], &CHADDR);
        assert_eq!(packet.authenticator[6], 1);
        assert_eq!(&packet.authenticator[7..], &[0u8; 9]);

        assert_eq!(packet.value_u32(DHCP_MESSAGE_TYPE), Some(1));
        let prl: Vec<u32> = packet
            .find_all(dhcp_attr(55))
            .filter_map(|a| a.value.as_u32())
            .collect();
        assert_eq!(prl, [1, 3, 6]);

        assert_eq!(packet.value_u32(DHCP_TRANSACTION_ID), Some(0x1234_5678));
        assert_eq!(
            packet.find(DHCP_CLIENT_HARDWARE_ADDRESS).map(|a| &a.value),
            Some(&Value::Ethernet(CHADDR))
        );
    }

    #[test]
    fn test_frame_rejections() {
        assert!(matches!(
            recv(&[0u8; 100], src(), dst()),
            Err(DhcpError::TooShort(100))
        ));
        assert!(matches!(
            recv(&vec![0u8; MAX_PACKET_SIZE + 1], src(), dst()),
            Err(DhcpError::TooLong(_))
        ));

        let mut frame = build_frame(1, &[]);
        frame[0] = 2;
        assert!(matches!(recv(&frame, src(), dst()), Err(DhcpError::OpcodeNotRequest(2))));

        let mut frame = build_frame(1, &[]);
        frame[1] = 6;
        assert!(matches!(
            recv(&frame, src(), dst()),
            Err(DhcpError::HardwareTypeNotEthernet(6))
        ));

        let mut frame = build_frame(1, &[]);
        frame[2] = 8;
        assert!(matches!(recv(&frame, src(), dst()), Err(DhcpError::BadHardwareLength(8))));

        let mut frame = build_frame(1, &[]);
        frame[238] = 0;
        assert!(matches!(recv(&frame, src(), dst()), Err(DhcpError::BadCookie(_))));

        let frame = build_frame(8, &[]);
        assert!(matches!(recv(&frame, src(), dst()), Err(DhcpError::BadMessageType(_))));
    }

    #[test]
    fn test_client_identifier_decodes_as_ethernet() {
        let frame = build_frame(1, &[61, 7, 1, 1, 2, 3, 4, 5, 6]);
        let packet = recv(&frame, src(), dst()).unwrap();
        assert_eq!(
            packet.find(DHCP_CLIENT_IDENTIFIER).map(|a| &a.value),
            Some(&Value::Ethernet([1, 2, 3, 4, 5, 6]))
        );
    }

    #[test]
    fn test_non_divisible_array_falls_back_to_octets() {
        // Option 6 (DNS, ipaddr array) with 5 bytes of payload.
        let frame = build_frame(1, &[6, 5, 1, 2, 3, 4, 5]);
        let packet = recv(&frame, src(), dst()).unwrap();
        assert_eq!(
            packet.find(dhcp_attr(6)).map(|a| &a.value),
            Some(&Value::Octets(vec![1, 2, 3, 4, 5]))
        );
    }

    #[test]
    fn test_fixed_width_mismatch_falls_back_to_octets() {
        // Option 51 (lease time, integer) with 2 bytes of payload.
        let frame = build_frame(1, &[51, 2, 0, 1]);
        let packet = recv(&frame, src(), dst()).unwrap();
        assert_eq!(
            packet.find(dhcp_attr(51)).map(|a| &a.value),
            Some(&Value::Octets(vec![0, 1]))
        );
    }

    #[test]
    fn test_msft98_broadcast_fixup() {
        let mut opts = vec![60, 7];
        opts.extend_from_slice(b"MSFT 98");
        let frame = build_frame(3, &opts);
        let packet = recv(&frame, src(), dst()).unwrap();

        assert_eq!(packet.value_u32(DHCP_FLAGS), Some(0x8000));
        assert_eq!(packet.data[10] & 0x80, 0x80);
    }

    #[test]
    fn test_msft98_skipped_when_relayed() {
        let mut opts = vec![60, 7];
        opts.extend_from_slice(b"MSFT 98");
        let mut frame = build_frame(3, &opts);
        frame[24..28].copy_from_slice(&[192, 0, 2, 1]); // giaddr
        let packet = recv(&frame, src(), dst()).unwrap();
        assert_eq!(packet.value_u32(DHCP_FLAGS), Some(0));
    }

    #[test]
    fn test_mtu_below_floor_is_fatal() {
        let frame = build_frame(1, &[26, 2, 0x01, 0x00]); // MTU 256
        assert!(matches!(recv(&frame, src(), dst()), Err(DhcpError::MtuTooSmall(256))));
    }

    #[test]
    fn test_small_maxms_raised_and_capped_to_mtu() {
        let frame = build_frame(1, &[57, 2, 0x01, 0x00]); // MaxMS 256
        let packet = recv(&frame, src(), dst()).unwrap();
        assert_eq!(packet.value_u32(DHCP_MAXIMUM_MSG_SIZE), Some(MIN_MESSAGE_SIZE));

        let frame = build_frame(1, &[26, 2, 0x02, 0x60, 57, 2, 0x03, 0x00]); // MTU 608, MaxMS 768
        let packet = recv(&frame, src(), dst()).unwrap();
        assert_eq!(packet.value_u32(DHCP_MAXIMUM_MSG_SIZE), Some(608));
    }

    fn offer_for(original: &Packet) -> Packet {
        let mut reply = Packet::new(code::DHCP_OFFER, original.id);
        reply.add(Avp::new(
            DHCP_YOUR_IP_ADDRESS,
            Value::Ipaddr(Ipv4Addr::new(10, 0, 0, 50)),
        ));
        reply
    }

    #[test]
    fn test_encode_header_and_padding() {
        let original = recv(&build_frame(1, &[]), src(), dst()).unwrap();
        let mut reply = offer_for(&original);
        encode(&mut reply, Some(&original)).unwrap();

        assert_eq!(reply.data.len(), DEFAULT_PACKET_SIZE);
        assert_eq!(reply.data[0], 2); // BOOTREPLY
        assert_eq!(reply.data[1], 1);
        assert_eq!(reply.data[2], 6);
        assert_eq!(&reply.data[4..8], &original.data[4..8]); // xid
        assert_eq!(&reply.data[16..20], &[10, 0, 0, 50]); // yiaddr
        assert_eq!(&reply.data[28..44], &original.data[28..44]); // chaddr
        assert_eq!(be32(&reply.data, 236), MAGIC_COOKIE);

        // Message-Type leads the option area.
        assert_eq!(reply.data[240], 0x35);
        assert_eq!(reply.data[241], 1);
        assert_eq!(reply.data[242], 2);

        // End option followed by zero padding.
        let end = (OPTIONS_OFFSET..reply.data.len())
            .find(|&i| reply.data[i] == 0xff)
            .unwrap();
        assert_eq!(reply.data[end + 1], 0x00);
        assert!(reply.data[end + 2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_sort_order() {
        let original = recv(&build_frame(1, &[]), src(), dst()).unwrap();
        let mut reply = offer_for(&original);
        reply.vps.clear();
        reply.add(Avp::octets(dhcp_suboption_attr(1), vec![0xde, 0xad]));
        reply.add(Avp::new(dhcp_attr(55), Value::Byte(1)));
        reply.add(Avp::new(DHCP_MESSAGE_TYPE, Value::Byte(2)));
        encode(&mut reply, Some(&original)).unwrap();

        let mut order = Vec::new();
        let mut i = OPTIONS_OFFSET;
        while i < reply.data.len() {
            let tag = reply.data[i];
            if tag == 0xff {
                break;
            }
            order.push(tag);
            i += 2 + usize::from(reply.data[i + 1]);
        }
        assert_eq!(order, [53, 55, 82]);
    }

    #[test]
    fn test_option82_nested_tlv_lengths() {
        let original = recv(&build_frame(1, &[]), src(), dst()).unwrap();
        let mut reply = offer_for(&original);
        reply.add(Avp::octets(dhcp_suboption_attr(1), vec![1, 2, 3, 4]));
        encode(&mut reply, Some(&original)).unwrap();

        let pos = (OPTIONS_OFFSET..reply.data.len())
            .find(|&i| reply.data[i] == 82)
            .unwrap();
        let outer_len = reply.data[pos + 1];
        let sub_tag = reply.data[pos + 2];
        let inner_len = reply.data[pos + 3];
        assert_eq!(sub_tag, 1);
        assert_eq!(inner_len, 4);
        assert_eq!(outer_len, inner_len + 2);
        assert_eq!(&reply.data[pos + 4..pos + 8], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_coalesced_runs_share_one_header() {
        let original = recv(&build_frame(1, &[]), src(), dst()).unwrap();
        let mut reply = offer_for(&original);
        for ip in [[10, 0, 0, 1], [10, 0, 0, 2], [10, 0, 0, 3]] {
            reply.add(Avp::new(dhcp_attr(6), Value::Ipaddr(ip.into())));
        }
        encode(&mut reply, Some(&original)).unwrap();

        let pos = (OPTIONS_OFFSET..reply.data.len())
            .find(|&i| reply.data[i] == 6)
            .unwrap();
        assert_eq!(reply.data[pos + 1], 12);
        assert_eq!(&reply.data[pos + 2..pos + 6], &[10, 0, 0, 1]);
        assert_eq!(&reply.data[pos + 10..pos + 14], &[10, 0, 0, 3]);
    }

    #[test]
    fn test_client_identifier_gains_type_prefix() {
        let original = recv(&build_frame(1, &[]), src(), dst()).unwrap();
        let mut reply = offer_for(&original);
        reply.add(Avp::new(DHCP_CLIENT_IDENTIFIER, Value::Ethernet(CHADDR)));
        encode(&mut reply, Some(&original)).unwrap();

        let pos = (OPTIONS_OFFSET..reply.data.len())
            .find(|&i| reply.data[i] == 61)
            .unwrap();
        assert_eq!(reply.data[pos + 1], 7);
        assert_eq!(reply.data[pos + 2], 1);
        assert_eq!(&reply.data[pos + 3..pos + 9], &CHADDR);
    }

    #[test]
    fn test_routing_giaddr_dominates() {
        let mut frame = build_frame(1, &[]);
        frame[24..28].copy_from_slice(&[192, 0, 2, 1]); // giaddr
        frame[12..16].copy_from_slice(&[10, 0, 0, 9]); // ciaddr would be rule 3
        let original = recv(&frame, src(), dst()).unwrap();

        let mut reply = offer_for(&original);
        encode(&mut reply, Some(&original)).unwrap();
        assert_eq!(reply.dst.ip(), IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
        assert_eq!(reply.dst.port(), src().port());
        assert_eq!(reply.src, dst());
    }

    #[test]
    fn test_routing_nak_broadcasts() {
        let mut frame = build_frame(1, &[]);
        frame[12..16].copy_from_slice(&[10, 0, 0, 9]);
        let original = recv(&frame, src(), dst()).unwrap();

        let mut reply = Packet::new(code::DHCP_NAK, original.id);
        encode(&mut reply, Some(&original)).unwrap();
        assert_eq!(reply.dst.ip(), IpAddr::V4(Ipv4Addr::BROADCAST));
    }

    #[test]
    fn test_routing_ciaddr_then_flags_then_default_broadcast() {
        let mut frame = build_frame(1, &[]);
        frame[12..16].copy_from_slice(&[10, 0, 0, 9]);
        let original = recv(&frame, src(), dst()).unwrap();
        let mut reply = offer_for(&original);
        encode(&mut reply, Some(&original)).unwrap();
        assert_eq!(reply.dst.ip(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)));

        let mut frame = build_frame(1, &[]);
        frame[10] = 0x80; // broadcast flag
        let original = recv(&frame, src(), dst()).unwrap();
        let mut reply = offer_for(&original);
        encode(&mut reply, Some(&original)).unwrap();
        assert_eq!(reply.dst.ip(), IpAddr::V4(Ipv4Addr::BROADCAST));

        // Nothing set at all: still broadcast.
        let original = recv(&build_frame(1, &[]), src(), dst()).unwrap();
        let mut reply = offer_for(&original);
        encode(&mut reply, Some(&original)).unwrap();
        assert_eq!(reply.dst.ip(), IpAddr::V4(Ipv4Addr::BROADCAST));
    }

    #[test]
    fn test_encode_without_original_fails() {
        let mut reply = Packet::new(code::DHCP_OFFER, 1);
        assert!(matches!(encode(&mut reply, None), Err(DhcpError::MissingOriginal)));
    }

    #[test]
    fn test_options_survive_encode_decode() {
        let original = recv(&build_frame(1, &[]), src(), dst()).unwrap();
        let mut reply = Packet::new(code::DHCP_ACK, original.id);
        reply.add(Avp::new(DHCP_YOUR_IP_ADDRESS, Value::Ipaddr(Ipv4Addr::new(10, 0, 0, 50))));
        reply.add(Avp::new(dhcp_attr(51), Value::Integer(3600)));
        reply.add(Avp::new(dhcp_attr(1), Value::Ipaddr(Ipv4Addr::new(255, 255, 255, 0))));
        reply.add(Avp::new(dhcp_attr(6), Value::Ipaddr(Ipv4Addr::new(10, 0, 0, 2))));
        reply.add(Avp::new(dhcp_attr(6), Value::Ipaddr(Ipv4Addr::new(10, 0, 0, 3))));
        encode(&mut reply, Some(&original)).unwrap();

        // Replies carry opcode 2, so frame-level validation does not
        // apply; decode the option area directly.
        let mut round = Packet::new(reply.code, reply.id);
        round.data = reply.data.clone();
        decode(&mut round).unwrap();

        for attribute in [dhcp_attr(51), dhcp_attr(1), DHCP_YOUR_IP_ADDRESS] {
            assert_eq!(
                round.find(attribute).map(|a| &a.value),
                reply.find(attribute).map(|a| &a.value),
                "attribute {attribute:#x}"
            );
        }
        let dns: Vec<_> = round.find_all(dhcp_attr(6)).map(|a| &a.value).collect();
        assert_eq!(dns.len(), 2);
        assert_eq!(round.value_u32(DHCP_MESSAGE_TYPE), Some(5));
    }
}
