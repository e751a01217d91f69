//! Static attribute dictionaries.
//!
//! Dictionary *files* are loaded by an external component; the codecs only
//! need the tables below: the DHCP fixed header layout, the commonly
//! deployed DHCP options, and the handful of RADIUS attributes the daemon
//! itself inspects.

use crate::avp::{dhcp_attr, is_dhcp_attr, ValueKind};

/// One DHCP option as the codec understands it.
#[derive(Debug, Clone, Copy)]
pub struct DictEntry {
    pub option: u8,
    pub name: &'static str,
    pub kind: ValueKind,
    /// Value is a packed array of fixed-width entries.
    pub array: bool,
}

/// One fixed DHCP header field.
#[derive(Debug, Clone, Copy)]
pub struct HeaderField {
    pub attribute: u32,
    pub name: &'static str,
    pub kind: ValueKind,
    pub width: usize,
}

// Header fields occupy attributes 256..270 in the DHCP namespace, above
// the option tag range.
pub const DHCP_OPCODE: u32 = dhcp_attr(256);
pub const DHCP_HARDWARE_TYPE: u32 = dhcp_attr(257);
pub const DHCP_HARDWARE_ADDRESS_LENGTH: u32 = dhcp_attr(258);
pub const DHCP_HOP_COUNT: u32 = dhcp_attr(259);
pub const DHCP_TRANSACTION_ID: u32 = dhcp_attr(260);
pub const DHCP_NUMBER_OF_SECONDS: u32 = dhcp_attr(261);
pub const DHCP_FLAGS: u32 = dhcp_attr(262);
pub const DHCP_CLIENT_IP_ADDRESS: u32 = dhcp_attr(263);
pub const DHCP_YOUR_IP_ADDRESS: u32 = dhcp_attr(264);
pub const DHCP_SERVER_IP_ADDRESS: u32 = dhcp_attr(265);
pub const DHCP_GATEWAY_IP_ADDRESS: u32 = dhcp_attr(266);
pub const DHCP_CLIENT_HARDWARE_ADDRESS: u32 = dhcp_attr(267);
pub const DHCP_SERVER_HOST_NAME: u32 = dhcp_attr(268);
pub const DHCP_BOOT_FILENAME: u32 = dhcp_attr(269);

pub const DHCP_MESSAGE_TYPE: u32 = dhcp_attr(53);
pub const DHCP_INTERFACE_MTU: u32 = dhcp_attr(26);
pub const DHCP_MAXIMUM_MSG_SIZE: u32 = dhcp_attr(57);
pub const DHCP_VENDOR_CLASS_IDENTIFIER: u32 = dhcp_attr(60);
pub const DHCP_CLIENT_IDENTIFIER: u32 = dhcp_attr(61);
pub const DHCP_RELAY_AGENT_INFORMATION: u32 = dhcp_attr(82);

/// The 14 named fields of the fixed BOOTP header, in wire order.
pub const DHCP_HEADER_FIELDS: [HeaderField; 14] = [
    HeaderField { attribute: DHCP_OPCODE, name: "DHCP-Opcode", kind: ValueKind::Byte, width: 1 },
    HeaderField { attribute: DHCP_HARDWARE_TYPE, name: "DHCP-Hardware-Type", kind: ValueKind::Byte, width: 1 },
    HeaderField { attribute: DHCP_HARDWARE_ADDRESS_LENGTH, name: "DHCP-Hardware-Address-Length", kind: ValueKind::Byte, width: 1 },
    HeaderField { attribute: DHCP_HOP_COUNT, name: "DHCP-Hop-Count", kind: ValueKind::Byte, width: 1 },
    HeaderField { attribute: DHCP_TRANSACTION_ID, name: "DHCP-Transaction-Id", kind: ValueKind::Integer, width: 4 },
    HeaderField { attribute: DHCP_NUMBER_OF_SECONDS, name: "DHCP-Number-of-Seconds", kind: ValueKind::Short, width: 2 },
    HeaderField { attribute: DHCP_FLAGS, name: "DHCP-Flags", kind: ValueKind::Short, width: 2 },
    HeaderField { attribute: DHCP_CLIENT_IP_ADDRESS, name: "DHCP-Client-IP-Address", kind: ValueKind::Ipaddr, width: 4 },
    HeaderField { attribute: DHCP_YOUR_IP_ADDRESS, name: "DHCP-Your-IP-Address", kind: ValueKind::Ipaddr, width: 4 },
    HeaderField { attribute: DHCP_SERVER_IP_ADDRESS, name: "DHCP-Server-IP-Address", kind: ValueKind::Ipaddr, width: 4 },
    HeaderField { attribute: DHCP_GATEWAY_IP_ADDRESS, name: "DHCP-Gateway-IP-Address", kind: ValueKind::Ipaddr, width: 4 },
    HeaderField { attribute: DHCP_CLIENT_HARDWARE_ADDRESS, name: "DHCP-Client-Hardware-Address", kind: ValueKind::Ethernet, width: 16 },
    HeaderField { attribute: DHCP_SERVER_HOST_NAME, name: "DHCP-Server-Host-Name", kind: ValueKind::String, width: 64 },
    HeaderField { attribute: DHCP_BOOT_FILENAME, name: "DHCP-Boot-Filename", kind: ValueKind::String, width: 128 },
];

/// DHCP option dictionary, RFC 2132 numbering.
const DHCP_OPTIONS: &[DictEntry] = &[
    DictEntry { option: 1, name: "DHCP-Subnet-Mask", kind: ValueKind::Ipaddr, array: false },
    DictEntry { option: 2, name: "DHCP-Time-Offset", kind: ValueKind::Integer, array: false },
    DictEntry { option: 3, name: "DHCP-Router-Address", kind: ValueKind::Ipaddr, array: true },
    DictEntry { option: 4, name: "DHCP-Time-Server", kind: ValueKind::Ipaddr, array: true },
    DictEntry { option: 6, name: "DHCP-Domain-Name-Server", kind: ValueKind::Ipaddr, array: true },
    DictEntry { option: 7, name: "DHCP-Log-Server", kind: ValueKind::Ipaddr, array: true },
    DictEntry { option: 12, name: "DHCP-Client-Hostname", kind: ValueKind::String, array: false },
    DictEntry { option: 13, name: "DHCP-Boot-File-Size", kind: ValueKind::Short, array: false },
    DictEntry { option: 15, name: "DHCP-Domain-Name", kind: ValueKind::String, array: false },
    DictEntry { option: 19, name: "DHCP-IP-Forwarding", kind: ValueKind::Byte, array: false },
    DictEntry { option: 26, name: "DHCP-Interface-MTU-Size", kind: ValueKind::Short, array: false },
    DictEntry { option: 28, name: "DHCP-Broadcast-Address", kind: ValueKind::Ipaddr, array: false },
    DictEntry { option: 33, name: "DHCP-Static-Route", kind: ValueKind::Ipaddr, array: true },
    DictEntry { option: 42, name: "DHCP-NTP-Servers", kind: ValueKind::Ipaddr, array: true },
    DictEntry { option: 43, name: "DHCP-Vendor", kind: ValueKind::Octets, array: false },
    DictEntry { option: 44, name: "DHCP-NETBIOS-Name-Servers", kind: ValueKind::Ipaddr, array: true },
    DictEntry { option: 50, name: "DHCP-Requested-IP-Address", kind: ValueKind::Ipaddr, array: false },
    DictEntry { option: 51, name: "DHCP-IP-Address-Lease-Time", kind: ValueKind::Integer, array: false },
    DictEntry { option: 52, name: "DHCP-Overload", kind: ValueKind::Byte, array: false },
    DictEntry { option: 53, name: "DHCP-Message-Type", kind: ValueKind::Byte, array: false },
    DictEntry { option: 54, name: "DHCP-DHCP-Server-Identifier", kind: ValueKind::Ipaddr, array: false },
    DictEntry { option: 55, name: "DHCP-Parameter-Request-List", kind: ValueKind::Byte, array: true },
    DictEntry { option: 56, name: "DHCP-DHCP-Message", kind: ValueKind::String, array: false },
    DictEntry { option: 57, name: "DHCP-DHCP-Maximum-Msg-Size", kind: ValueKind::Short, array: false },
    DictEntry { option: 58, name: "DHCP-Renewal-Time", kind: ValueKind::Integer, array: false },
    DictEntry { option: 59, name: "DHCP-Rebinding-Time", kind: ValueKind::Integer, array: false },
    DictEntry { option: 60, name: "DHCP-Vendor-Class-Identifier", kind: ValueKind::String, array: false },
    DictEntry { option: 61, name: "DHCP-Client-Identifier", kind: ValueKind::Octets, array: false },
    DictEntry { option: 64, name: "DHCP-NIS-Domain-Name", kind: ValueKind::String, array: false },
    DictEntry { option: 66, name: "DHCP-TFTP-Server-Name", kind: ValueKind::String, array: false },
    DictEntry { option: 67, name: "DHCP-Boot-Filename", kind: ValueKind::String, array: false },
    DictEntry { option: 82, name: "DHCP-Relay-Agent-Information", kind: ValueKind::Octets, array: false },
    DictEntry { option: 91, name: "DHCP-Client-Last-Transaction-Time", kind: ValueKind::Date, array: false },
];

/// Look up a DHCP option tag. Unknown options decode as skipped.
pub fn dhcp_option_entry(option: u8) -> Option<&'static DictEntry> {
    DHCP_OPTIONS.iter().find(|e| e.option == option)
}

// RADIUS attributes the daemon itself looks at.
pub const USER_NAME: u32 = 1;
pub const USER_PASSWORD: u32 = 2;
pub const CHAP_PASSWORD: u32 = 3;
pub const NAS_IP_ADDRESS: u32 = 4;
pub const NAS_PORT: u32 = 5;
pub const FRAMED_IP_ADDRESS: u32 = 8;
pub const REPLY_MESSAGE: u32 = 18;
pub const STATE: u32 = 24;
pub const PROXY_STATE: u32 = 33;
pub const ACCT_STATUS_TYPE: u32 = 40;
pub const ACCT_SESSION_ID: u32 = 44;

/// Value kind for a RADIUS attribute. Anything we do not know decodes as
/// opaque octets.
pub fn radius_kind(attribute: u8) -> ValueKind {
    match u32::from(attribute) {
        USER_NAME | REPLY_MESSAGE | ACCT_SESSION_ID => ValueKind::String,
        NAS_IP_ADDRESS | FRAMED_IP_ADDRESS => ValueKind::Ipaddr,
        NAS_PORT | ACCT_STATUS_TYPE => ValueKind::Integer,
        _ => ValueKind::Octets,
    }
}

/// Human-readable attribute name for log lines and detail records.
pub fn attr_name(attribute: u32) -> &'static str {
    if is_dhcp_attr(attribute) {
        if let Some(f) = DHCP_HEADER_FIELDS.iter().find(|f| f.attribute == attribute) {
            return f.name;
        }
        if let Some(e) = dhcp_option_entry((attribute & 0xff) as u8) {
            return e.name;
        }
        return "DHCP-Unknown";
    }
    match attribute {
        USER_NAME => "User-Name",
        USER_PASSWORD => "User-Password",
        CHAP_PASSWORD => "CHAP-Password",
        NAS_IP_ADDRESS => "NAS-IP-Address",
        NAS_PORT => "NAS-Port",
        FRAMED_IP_ADDRESS => "Framed-IP-Address",
        REPLY_MESSAGE => "Reply-Message",
        STATE => "State",
        PROXY_STATE => "Proxy-State",
        ACCT_STATUS_TYPE => "Acct-Status-Type",
        ACCT_SESSION_ID => "Acct-Session-Id",
        _ => "Attr-Unknown",
    }
}
