//! RADIUS wire codec and authenticator cryptography (RFC 2865/2866).

use crate::avp::{Avp, Value, ValueKind};
use crate::code;
use crate::dict;
use crate::packet::Packet;
use rand::Rng;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Minimum RADIUS packet size: code + id + length + authenticator.
pub const MIN_PACKET_SIZE: usize = 20;
/// Maximum RADIUS packet size per RFC 2865.
pub const MAX_PACKET_SIZE: usize = 4096;
/// Maximum attribute value length (255 minus the two header bytes).
const MAX_VALUE_LENGTH: usize = 253;

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("invalid packet length: {0}")]
    InvalidLength(usize),
    #[error("invalid length {length} for attribute {attribute}")]
    InvalidAttribute { attribute: u8, length: usize },
    #[error("attribute {0} does not fit in a RADIUS frame")]
    AttributeTooLong(u32),
    #[error("packet too large: {0} bytes")]
    PacketTooLarge(usize),
    #[error("invalid password block length: {0}")]
    InvalidPassword(usize),
}

/// Decode a RADIUS datagram into a [`Packet`].
///
/// The code byte is preserved verbatim; classification of unsupported
/// codes happens in the dispatcher, not here.
pub fn decode(data: &[u8]) -> Result<Packet, PacketError> {
    if data.len() < MIN_PACKET_SIZE {
        return Err(PacketError::InvalidLength(data.len()));
    }

    let length = usize::from(u16::from_be_bytes([data[2], data[3]]));
    if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&length) || data.len() < length {
        return Err(PacketError::InvalidLength(length));
    }

    let mut packet = Packet::new(u32::from(data[0]), u32::from(data[1]));
    packet.authenticator.copy_from_slice(&data[4..20]);
    packet.data = data[..length].to_vec();

    let mut rest = &packet.data[20..];
    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(PacketError::InvalidLength(length));
        }
        let attribute = rest[0];
        let alen = usize::from(rest[1]);
        if alen < 2 || alen > rest.len() {
            return Err(PacketError::InvalidAttribute { attribute, length: alen });
        }
        let value = decode_value(attribute, &rest[2..alen]);
        packet.vps.push(Avp::new(u32::from(attribute), value));
        rest = &rest[alen..];
    }

    Ok(packet)
}

/// Type an attribute value via the dictionary, falling back to raw octets
/// on any width or encoding mismatch.
fn decode_value(attribute: u8, raw: &[u8]) -> Value {
    match dict::radius_kind(attribute) {
        ValueKind::String => match std::str::from_utf8(raw) {
            Ok(s) => Value::String(s.trim_end_matches('\0').to_string()),
            Err(_) => Value::Octets(raw.to_vec()),
        },
        ValueKind::Integer if raw.len() == 4 => {
            Value::Integer(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
        }
        ValueKind::Ipaddr if raw.len() == 4 => {
            Value::Ipaddr(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]))
        }
        _ => Value::Octets(raw.to_vec()),
    }
}

/// Serialize a packet's header and attributes with a caller-supplied
/// authenticator field.
fn encode_with_authenticator(
    packet: &Packet,
    authenticator: &[u8; 16],
) -> Result<Vec<u8>, PacketError> {
    let mut buf = Vec::with_capacity(MIN_PACKET_SIZE);
    buf.push((packet.code & 0xff) as u8);
    buf.push((packet.id & 0xff) as u8);
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(authenticator);

    for avp in &packet.vps {
        if avp.attribute > 255 {
            return Err(PacketError::AttributeTooLong(avp.attribute));
        }
        let vlen = avp.value.wire_len();
        if vlen > MAX_VALUE_LENGTH {
            return Err(PacketError::AttributeTooLong(avp.attribute));
        }
        buf.push(avp.attribute as u8);
        buf.push((vlen + 2) as u8);
        avp.value.to_wire(&mut buf);
    }

    let total = buf.len();
    if total > MAX_PACKET_SIZE {
        return Err(PacketError::PacketTooLarge(total));
    }
    buf[2] = (total >> 8) as u8;
    buf[3] = (total & 0xff) as u8;
    Ok(buf)
}

/// Encode a reply and sign it with the response authenticator:
/// MD5(code + id + length + request authenticator + attributes + secret).
///
/// The encoded bytes are stored in `reply.data` and returned.
pub fn encode_reply(
    reply: &mut Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> Result<Vec<u8>, PacketError> {
    let mut buf = encode_with_authenticator(reply, request_authenticator)?;

    let mut signed = buf.clone();
    signed.extend_from_slice(secret);
    let digest = md5::compute(&signed);

    buf[4..20].copy_from_slice(&digest.0);
    reply.authenticator.copy_from_slice(&digest.0);
    reply.data = buf.clone();
    Ok(buf)
}

/// Encode a request. Access-Requests carry the random authenticator
/// as-is; Accounting-Requests are signed over a zeroed authenticator
/// field per RFC 2866.
pub fn encode_request(request: &mut Packet, secret: &[u8]) -> Result<Vec<u8>, PacketError> {
    if request.code == code::ACCOUNTING_REQUEST {
        let mut buf = encode_with_authenticator(request, &[0u8; 16])?;
        let mut signed = buf.clone();
        signed.extend_from_slice(secret);
        let digest = md5::compute(&signed);
        buf[4..20].copy_from_slice(&digest.0);
        request.authenticator.copy_from_slice(&digest.0);
        request.data = buf.clone();
        Ok(buf)
    } else {
        let authenticator = request.authenticator;
        let buf = encode_with_authenticator(request, &authenticator)?;
        request.data = buf.clone();
        Ok(buf)
    }
}

/// Verify the authenticator of a received request against the client's
/// shared secret.
///
/// Only Accounting-Request authenticators are computable; Access-Request
/// authenticators are random by definition and always pass.
pub fn verify_request(packet: &Packet, secret: &[u8]) -> bool {
    if packet.code != code::ACCOUNTING_REQUEST {
        return true;
    }
    if packet.data.len() < MIN_PACKET_SIZE {
        return false;
    }

    let mut signed = packet.data.clone();
    signed[4..20].fill(0);
    signed.extend_from_slice(secret);
    let digest = md5::compute(&signed);
    digest.0 == packet.authenticator
}

/// Verify a response authenticator against the originating request's.
pub fn verify_response(
    response: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> bool {
    if response.data.len() < MIN_PACKET_SIZE {
        return false;
    }
    let mut signed = response.data.clone();
    signed[4..20].copy_from_slice(request_authenticator);
    signed.extend_from_slice(secret);
    let digest = md5::compute(&signed);
    digest.0 == response.authenticator
}

/// Random request authenticator per RFC 2865 Section 3.
pub fn generate_request_authenticator() -> [u8; 16] {
    let mut authenticator = [0u8; 16];
    rand::rng().fill(&mut authenticator);
    authenticator
}

/// Encrypt a User-Password value per RFC 2865 Section 5.2: the password
/// is zero-padded to 16-byte blocks and XOR-chained with
/// MD5(secret + previous block), seeded by the request authenticator.
pub fn encrypt_user_password(password: &str, secret: &[u8], authenticator: &[u8; 16]) -> Vec<u8> {
    let mut padded = password.as_bytes().to_vec();
    let rem = padded.len() % 16;
    if rem != 0 || padded.is_empty() {
        padded.resize(padded.len() + (16 - rem) % 16, 0);
        if padded.is_empty() {
            padded.resize(16, 0);
        }
    }

    let mut out = Vec::with_capacity(padded.len());
    let mut prev = authenticator.to_vec();
    for chunk in padded.chunks(16) {
        let mut data = secret.to_vec();
        data.extend_from_slice(&prev);
        let hash = md5::compute(&data);

        let mut block = [0u8; 16];
        for i in 0..16 {
            block[i] = chunk[i] ^ hash.0[i];
        }
        prev = block.to_vec();
        out.extend_from_slice(&block);
    }
    out
}

/// Reverse of [`encrypt_user_password`]; trailing padding is stripped.
pub fn decrypt_user_password(
    encrypted: &[u8],
    secret: &[u8],
    authenticator: &[u8; 16],
) -> Result<String, PacketError> {
    if encrypted.is_empty() || encrypted.len() % 16 != 0 {
        return Err(PacketError::InvalidPassword(encrypted.len()));
    }

    let mut out = Vec::with_capacity(encrypted.len());
    let mut prev = authenticator.to_vec();
    for chunk in encrypted.chunks(16) {
        let mut data = secret.to_vec();
        data.extend_from_slice(&prev);
        let hash = md5::compute(&data);

        for i in 0..16 {
            out.push(chunk[i] ^ hash.0[i]);
        }
        prev = chunk.to_vec();
    }

    while out.last() == Some(&0) {
        out.pop();
    }
    String::from_utf8(out).map_err(|e| PacketError::InvalidPassword(e.utf8_error().valid_up_to()))
}
