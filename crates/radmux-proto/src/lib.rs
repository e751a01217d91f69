//! Protocol library for the radmux daemon.
//!
//! Provides the typed attribute model shared by both protocols, the
//! RADIUS wire codec with its authenticator cryptography, and the DHCPv4
//! codec with option aggregation and response routing. Both codecs
//! produce the same [`Packet`] shape so the server can run them through
//! one request table.

pub mod avp;
pub mod code;
pub mod dhcp;
pub mod dict;
pub mod packet;
pub mod radius;

pub use avp::{dhcp_attr, dhcp_suboption_attr, is_dhcp_attr, Avp, Value, ValueKind};
pub use packet::Packet;
pub use radius::PacketError;
