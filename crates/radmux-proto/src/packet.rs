use crate::avp::{Avp, Value};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// A decoded packet from either protocol.
///
/// `id` holds the one-byte RADIUS identifier or the 32-bit DHCP xid;
/// `authenticator` is the RADIUS request authenticator, or the synthesized
/// dedup vector for DHCP. Together with the source address they form the
/// duplicate-detection key used by the request table.
#[derive(Debug, Clone)]
pub struct Packet {
    pub code: u32,
    pub id: u32,
    pub authenticator: [u8; 16],
    pub src: SocketAddr,
    pub dst: SocketAddr,
    /// Raw wire bytes as received or encoded.
    pub data: Vec<u8>,
    pub vps: Vec<Avp>,
}

fn unspecified() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
}

impl Packet {
    pub fn new(code: u32, id: u32) -> Self {
        Packet {
            code,
            id,
            authenticator: [0u8; 16],
            src: unspecified(),
            dst: unspecified(),
            data: Vec::new(),
            vps: Vec::new(),
        }
    }

    pub fn add(&mut self, avp: Avp) {
        self.vps.push(avp);
    }

    /// First AVP with the given attribute id.
    pub fn find(&self, attribute: u32) -> Option<&Avp> {
        self.vps.iter().find(|a| a.attribute == attribute)
    }

    pub fn find_mut(&mut self, attribute: u32) -> Option<&mut Avp> {
        self.vps.iter_mut().find(|a| a.attribute == attribute)
    }

    pub fn find_all(&self, attribute: u32) -> impl Iterator<Item = &Avp> {
        self.vps.iter().filter(move |a| a.attribute == attribute)
    }

    pub fn remove_all(&mut self, attribute: u32) {
        self.vps.retain(|a| a.attribute != attribute);
    }

    /// Numeric value of the first matching AVP, if any.
    pub fn value_u32(&self, attribute: u32) -> Option<u32> {
        self.find(attribute).and_then(|a| a.value.as_u32())
    }

    pub fn value_str(&self, attribute: u32) -> Option<&str> {
        self.find(attribute).and_then(|a| a.value.as_str())
    }

    pub fn value_ipaddr(&self, attribute: u32) -> Option<Ipv4Addr> {
        self.find(attribute).and_then(|a| a.value.as_ipaddr())
    }

    /// Replace the value of the first matching AVP, or append a new one.
    pub fn set(&mut self, attribute: u32, value: Value) {
        match self.find_mut(attribute) {
            Some(avp) => avp.value = value,
            None => self.vps.push(Avp::new(attribute, value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_helpers() {
        let mut p = Packet::new(1, 42);
        p.add(Avp::string(1, "alice"));
        p.add(Avp::new(5, Value::Integer(7)));
        p.add(Avp::new(5, Value::Integer(8)));

        assert_eq!(p.value_str(1), Some("alice"));
        assert_eq!(p.value_u32(5), Some(7));
        assert_eq!(p.find_all(5).count(), 2);

        p.remove_all(5);
        assert!(p.find(5).is_none());
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut p = Packet::new(1, 1);
        p.set(12, Value::Short(576));
        p.set(12, Value::Short(1400));
        assert_eq!(p.find_all(12).count(), 1);
        assert_eq!(p.value_u32(12), Some(1400));
    }
}
