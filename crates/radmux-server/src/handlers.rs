//! Handler seams between the dispatcher and the authentication,
//! accounting, DHCP and proxy back ends.
//!
//! The dispatcher only sees the traits; the bundled implementations cover
//! the common file-configured case. Handlers run inside worker tasks and
//! return a reply packet (code + attributes); encoding, signing and
//! sending stay with the worker.

use crate::config::Config;
use crate::detail::DetailWriter;
use radmux_proto::{code, dict, radius, Avp, Packet};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Authentication back end for Access-Request packets.
pub trait AuthHandler: Send + Sync {
    /// Produce a reply, or `None` to stay silent.
    fn handle(&self, request: &Packet, secret: &[u8]) -> Option<Packet>;
}

/// Accounting back end for Accounting-Request packets.
pub trait AcctHandler: Send + Sync {
    fn handle(&self, request: &Packet, secret: &[u8]) -> Option<Packet>;
}

/// DHCP back end, fed by the DHCPv4 listener.
pub trait DhcpHandler: Send + Sync {
    fn handle(&self, request: &Packet) -> Option<Packet>;
}

/// Hooks for forwarding requests to and accepting replies from upstream
/// servers. The real proxy lives outside the dispatch engine.
pub trait ProxyHooks: Send + Sync {
    /// Claim a request for upstream forwarding. Returning `true` stops
    /// local processing.
    fn proxy_send(&self, _request: &Packet) -> bool {
        false
    }

    /// Consume a reply that arrived on the proxy socket.
    fn proxy_receive(&self, _reply: &Packet) {}
}

/// Default hooks: never proxy, drop stray proxy replies.
pub struct NullProxy;

impl ProxyHooks for NullProxy {}

/// The complete handler set wired into a server.
pub struct Handlers {
    pub auth: Box<dyn AuthHandler>,
    pub acct: Box<dyn AcctHandler>,
    pub dhcp: Box<dyn DhcpHandler>,
    pub proxy: Box<dyn ProxyHooks>,
}

/// Copy Proxy-State attributes from request to reply, RFC 2865 §5.33.
fn copy_proxy_state(request: &Packet, reply: &mut Packet) {
    for avp in request.find_all(dict::PROXY_STATE) {
        reply.add(avp.clone());
    }
}

/// PAP authentication against the users list in the configuration.
pub struct FileAuthHandler {
    users: HashMap<String, String>,
    log_auth: bool,
    log_auth_pass: bool,
    detail: Option<Arc<DetailWriter>>,
}

impl FileAuthHandler {
    pub fn new(config: &Config, detail: Option<Arc<DetailWriter>>) -> Self {
        let users = config
            .users
            .iter()
            .map(|u| (u.username.clone(), u.password.clone()))
            .collect();
        FileAuthHandler {
            users,
            log_auth: config.log_auth,
            log_auth_pass: config.log_auth_pass,
            detail,
        }
    }

    pub fn add_user(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.users.insert(username.into(), password.into());
    }

    fn check(&self, username: &str, password: &str) -> bool {
        self.users.get(username).map(|p| p == password).unwrap_or(false)
    }
}

impl AuthHandler for FileAuthHandler {
    fn handle(&self, request: &Packet, secret: &[u8]) -> Option<Packet> {
        let username = request.value_str(dict::USER_NAME)?.to_string();

        let password = request
            .find(dict::USER_PASSWORD)
            .and_then(|avp| match &avp.value {
                radmux_proto::Value::Octets(o) => {
                    radius::decrypt_user_password(o, secret, &request.authenticator).ok()
                }
                _ => None,
            });

        let ok = match password.as_deref() {
            Some(pw) => self.check(&username, pw),
            None => false,
        };

        if let Some(writer) = &self.detail {
            writer.write("auth-detail", request);
        }

        let mut reply = if ok {
            if self.log_auth {
                info!(username = %username, "login OK");
            }
            Packet::new(code::ACCESS_ACCEPT, request.id)
        } else {
            if self.log_auth {
                if self.log_auth_pass {
                    info!(
                        username = %username,
                        password = password.as_deref().unwrap_or("<none>"),
                        "login incorrect"
                    );
                } else {
                    info!(username = %username, "login incorrect");
                }
            }
            let mut p = Packet::new(code::ACCESS_REJECT, request.id);
            p.add(Avp::string(dict::REPLY_MESSAGE, "Authentication failed"));
            p
        };

        copy_proxy_state(request, &mut reply);
        Some(reply)
    }
}

/// Accounting handler that acknowledges every record and appends it to
/// the per-client detail file.
pub struct LogAcctHandler {
    detail: Option<Arc<DetailWriter>>,
}

impl LogAcctHandler {
    pub fn new(detail: Option<Arc<DetailWriter>>) -> Self {
        LogAcctHandler { detail }
    }
}

impl AcctHandler for LogAcctHandler {
    fn handle(&self, request: &Packet, _secret: &[u8]) -> Option<Packet> {
        debug!(
            status_type = request.value_u32(dict::ACCT_STATUS_TYPE),
            session = request.value_str(dict::ACCT_SESSION_ID),
            "accounting record"
        );

        if let Some(writer) = &self.detail {
            writer.write("detail", request);
        }

        let mut reply = Packet::new(code::ACCOUNTING_RESPONSE, request.id);
        copy_proxy_state(request, &mut reply);
        Some(reply)
    }
}

/// DHCP handler that stays silent. Address allocation is someone else's
/// job; wiring a real allocator in means implementing [`DhcpHandler`].
pub struct NullDhcpHandler;

impl DhcpHandler for NullDhcpHandler {
    fn handle(&self, request: &Packet) -> Option<Packet> {
        warn!(
            code = code::code_name(request.code),
            xid = request.id,
            "no DHCP handler configured, dropping request"
        );
        None
    }
}

impl Handlers {
    /// The default file-configured set.
    pub fn from_config(config: &Config, detail: Option<Arc<DetailWriter>>) -> Self {
        Handlers {
            auth: Box::new(FileAuthHandler::new(config, detail.clone())),
            acct: Box::new(LogAcctHandler::new(detail)),
            dhcp: Box::new(NullDhcpHandler),
            proxy: Box::new(NullProxy),
        }
    }
}
