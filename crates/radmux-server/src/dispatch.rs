//! The dispatcher: a single task draining the auth, acct, proxy and
//! (optionally) DHCP sockets, classifying each datagram, admitting it to
//! the request table and delegating it to a worker.
//!
//! Workers report back over an mpsc channel drained between datagrams, so
//! the table never needs a lock. Reload requests from SIGHUP set a flag
//! that is honoured at the top of the loop, never concurrently with
//! admission.

use crate::config::{Config, ConfigError};
use crate::handlers::Handlers;
use crate::request::{Admission, CachedReply, RequestRecord, RequestTable, SocketRole};
use radmux_proto::{code, dhcp, dict, radius, Packet, Value};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("could not find a free proxy port")]
    NoProxyPort,
}

/// Worker result delivered back to the dispatcher.
struct Completion {
    worker_id: u64,
    reply: Option<CachedReply>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct Server {
    config: Arc<Config>,
    config_path: Option<PathBuf>,
    auth_sock: Arc<UdpSocket>,
    acct_sock: Arc<UdpSocket>,
    proxy_sock: Arc<UdpSocket>,
    dhcp_sock: Option<Arc<UdpSocket>>,
    handlers: Arc<Handlers>,
    table: RequestTable,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    next_worker_id: u64,
    reload_pending: bool,
}

impl Server {
    /// Bind all sockets and assemble a server.
    pub async fn bind(config: Config, handlers: Handlers) -> Result<Self, ServerError> {
        config.validate()?;

        let auth_sock = Arc::new(UdpSocket::bind(config.auth_addr()?).await?);
        let acct_sock = Arc::new(UdpSocket::bind(config.acct_addr()?).await?);
        let proxy_sock = Arc::new(Self::bind_proxy(config.listen_ip()?).await?);

        let dhcp_sock = if config.dhcp_enabled {
            let sock = UdpSocket::bind(config.dhcp_addr()?).await?;
            sock.set_broadcast(true)?;
            Some(Arc::new(sock))
        } else {
            None
        };

        info!(
            auth = %auth_sock.local_addr()?,
            acct = %acct_sock.local_addr()?,
            proxy = %proxy_sock.local_addr()?,
            dhcp = ?dhcp_sock.as_ref().and_then(|s| s.local_addr().ok()),
            "listening"
        );

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let table = RequestTable::new(config.max_request_time, config.cleanup_delay);

        Ok(Server {
            config: Arc::new(config),
            config_path: None,
            auth_sock,
            acct_sock,
            proxy_sock,
            dhcp_sock,
            handlers: Arc::new(handlers),
            table,
            completion_tx,
            completion_rx,
            next_worker_id: 0,
            reload_pending: false,
        })
    }

    /// Remember where the configuration came from so SIGHUP can re-read it.
    pub fn set_config_path(&mut self, path: impl Into<PathBuf>) {
        self.config_path = Some(path.into());
    }

    /// The proxy socket takes the first free port at or above a
    /// pid-derived starting point.
    async fn bind_proxy(ip: IpAddr) -> Result<UdpSocket, ServerError> {
        let mut port = (std::process::id() & 0x7fff) as u16 + 1024;
        while port < 64000 {
            match UdpSocket::bind(SocketAddr::new(ip, port)).await {
                Ok(sock) => return Ok(sock),
                Err(_) => port += 1,
            }
        }
        Err(ServerError::NoProxyPort)
    }

    pub fn local_addr(&self, role: SocketRole) -> Option<SocketAddr> {
        match role {
            SocketRole::Auth => self.auth_sock.local_addr().ok(),
            SocketRole::Acct => self.acct_sock.local_addr().ok(),
            SocketRole::Proxy => self.proxy_sock.local_addr().ok(),
            SocketRole::Dhcp => self.dhcp_sock.as_ref().and_then(|s| s.local_addr().ok()),
        }
    }

    fn socket_for(&self, role: SocketRole) -> &Arc<UdpSocket> {
        match role {
            SocketRole::Auth => &self.auth_sock,
            SocketRole::Acct => &self.acct_sock,
            SocketRole::Proxy => &self.proxy_sock,
            SocketRole::Dhcp => self
                .dhcp_sock
                .as_ref()
                .expect("DHCP record admitted without a DHCP socket"),
        }
    }

    /// Main loop. Runs until the task is cancelled; socket-level errors
    /// are logged and the loop keeps going.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        let mut sighup = signal(SignalKind::hangup())?;

        let mut auth_buf = [0u8; radius::MAX_PACKET_SIZE];
        let mut acct_buf = [0u8; radius::MAX_PACKET_SIZE];
        let mut proxy_buf = [0u8; radius::MAX_PACKET_SIZE];
        let mut dhcp_buf = [0u8; dhcp::MAX_PACKET_SIZE];

        info!("ready to process requests");

        loop {
            if self.reload_pending {
                self.reload();
                self.reload_pending = false;
            }

            // Drain finished workers before admitting anything new.
            while let Ok(c) = self.completion_rx.try_recv() {
                self.table.reap(c.worker_id, c.reply, unix_now());
            }

            let auth = Arc::clone(&self.auth_sock);
            let acct = Arc::clone(&self.acct_sock);
            let proxy = Arc::clone(&self.proxy_sock);
            let dhcp_sock = self.dhcp_sock.clone();

            tokio::select! {
                biased;

                _ = sighup.recv() => {
                    info!("received SIGHUP, scheduling configuration reload");
                    self.reload_pending = true;
                }

                Some(c) = self.completion_rx.recv() => {
                    self.table.reap(c.worker_id, c.reply, unix_now());
                }

                r = auth.recv_from(&mut auth_buf) => match r {
                    Ok((len, src)) => self.receive(SocketRole::Auth, &auth_buf[..len], src).await,
                    Err(e) => error!(error = %e, "failed reading auth socket"),
                },

                r = acct.recv_from(&mut acct_buf) => match r {
                    Ok((len, src)) => self.receive(SocketRole::Acct, &acct_buf[..len], src).await,
                    Err(e) => error!(error = %e, "failed reading acct socket"),
                },

                r = proxy.recv_from(&mut proxy_buf) => match r {
                    Ok((len, src)) => self.receive(SocketRole::Proxy, &proxy_buf[..len], src).await,
                    Err(e) => error!(error = %e, "failed reading proxy socket"),
                },

                r = recv_optional(&dhcp_sock, &mut dhcp_buf) => match r {
                    Ok((len, src)) => self.receive_dhcp(&dhcp_buf[..len], src).await,
                    Err(e) => error!(error = %e, "failed reading DHCP socket"),
                },
            }
        }
    }

    /// Re-read the configuration. Failures keep the previous one.
    fn reload(&mut self) {
        let Some(path) = self.config_path.clone() else {
            debug!("no configuration file to reload");
            return;
        };
        info!(path = %path.display(), "reloading configuration files");
        match Config::from_file(&path) {
            Ok(new) => self.config = Arc::new(new),
            Err(e) => error!(error = %e, "errors reading config file, keeping previous configuration"),
        }
    }

    /// Decode a RADIUS datagram, authenticate its sender and classify it.
    async fn receive(&mut self, role: SocketRole, data: &[u8], src: SocketAddr) {
        let mut packet = match radius::decode(data) {
            Ok(p) => p,
            Err(e) => {
                warn!(src = %src, error = %e, "dropping malformed packet");
                return;
            }
        };

        let Some(client) = self.config.find_client(src.ip()) else {
            warn!(src = %src.ip(), "request from unknown client");
            return;
        };
        if !client.auth_policy.permits(role) {
            warn!(
                client = %client.display_name(),
                id = packet.id,
                "client is not permitted to send to this port"
            );
            return;
        }
        let secret = client.secret.clone().into_bytes();
        let client_name = client.display_name().to_string();

        if !radius::verify_request(&packet, &secret) {
            warn!(
                client = %client_name,
                id = packet.id,
                "packet failed authenticator verification"
            );
            return;
        }

        packet.src = src;
        if let Some(local) = self.local_addr(role) {
            packet.dst = local;
        }

        debug!(
            code = code::code_name(packet.code),
            client = %client_name,
            id = packet.id,
            "received packet"
        );

        self.process(role, packet, secret, client_name).await;
    }

    /// Decode a DHCP datagram and feed it into the shared dispatch path.
    ///
    /// DHCP peers are often broadcasting from 0.0.0.0 and have no entry in
    /// the client registry; there is no shared secret to verify.
    async fn receive_dhcp(&mut self, data: &[u8], src: SocketAddr) {
        let Some(local) = self.local_addr(SocketRole::Dhcp) else {
            return;
        };
        let packet = match dhcp::recv(data, src, local) {
            Ok(p) => p,
            Err(e) => {
                warn!(src = %src, error = %e, "dropping malformed DHCP packet");
                return;
            }
        };
        self.process(SocketRole::Dhcp, packet, Vec::new(), "dhcp".to_string())
            .await;
    }

    /// Classification: reject what does not belong on this socket, give
    /// the proxy hooks their chance, then admit and delegate.
    async fn process(
        &mut self,
        role: SocketRole,
        mut packet: Packet,
        secret: Vec<u8>,
        client_name: String,
    ) {
        match packet.code {
            code::ACCESS_REQUEST | code::ACCOUNTING_REQUEST => {
                if role == SocketRole::Proxy {
                    warn!(
                        code = packet.code,
                        client = %client_name,
                        id = packet.id,
                        "request packet sent to proxy port, ignored"
                    );
                    return;
                }
                if !self.normalize_username(&mut packet) {
                    warn!(
                        client = %client_name,
                        id = packet.id,
                        "request without a usable User-Name, dropped"
                    );
                    return;
                }
                if self.handlers.proxy.proxy_send(&packet) {
                    return;
                }
            }

            code::ACCESS_ACCEPT | code::ACCESS_REJECT | code::ACCOUNTING_RESPONSE => {
                if role == SocketRole::Proxy {
                    self.handlers.proxy.proxy_receive(&packet);
                } else {
                    warn!(
                        code = packet.code,
                        client = %client_name,
                        id = packet.id,
                        "reply packet sent to request port, ignored"
                    );
                }
                return;
            }

            code::PASSWORD_REQUEST => {
                warn!(
                    client = %client_name,
                    id = packet.id,
                    "deprecated password change request, ignored"
                );
                return;
            }

            c if code::is_dhcp(c) => {}

            other => {
                warn!(
                    code = other,
                    client = %client_name,
                    id = packet.id,
                    "unknown packet type, ignored"
                );
                return;
            }
        }

        self.admit_and_dispatch(role, packet, secret, client_name).await;
    }

    /// Trim the User-Name attribute and strip its realm when configured.
    /// Returns false if no usable name remains.
    fn normalize_username(&self, packet: &mut Packet) -> bool {
        let strip_realm = self.config.strip_realm;
        let Some(avp) = packet.find_mut(dict::USER_NAME) else {
            return false;
        };
        let Value::String(name) = &mut avp.value else {
            return false;
        };

        let mut normalized = name.trim().to_string();
        if strip_realm {
            if let Some(at) = normalized.find('@') {
                normalized.truncate(at);
            }
        }
        if normalized.is_empty() {
            return false;
        }
        *name = normalized;
        true
    }

    async fn admit_and_dispatch(
        &mut self,
        role: SocketRole,
        packet: Packet,
        secret: Vec<u8>,
        client_name: String,
    ) {
        let now = unix_now();
        let mut record =
            RequestRecord::new(packet.clone(), secret.clone(), client_name, role, now);
        self.next_worker_id += 1;
        let worker_id = self.next_worker_id;
        record.worker_id = worker_id;

        match self.table.admit(record, now) {
            Admission::Duplicate(Some(reply)) => self.send_cached(&reply).await,
            Admission::Duplicate(None) | Admission::Overloaded => {}
            Admission::Accepted => {
                let handlers = Arc::clone(&self.handlers);
                let sock = Arc::clone(self.socket_for(role));

                if self.config.spawn_workers {
                    let tx = self.completion_tx.clone();
                    let task = tokio::spawn(async move {
                        let reply = run_worker(handlers, role, packet, secret, sock).await;
                        let _ = tx.send(Completion { worker_id, reply });
                    });
                    self.table.set_worker(worker_id, task.abort_handle());
                } else {
                    let reply = run_worker(handlers, role, packet, secret, sock).await;
                    self.table.reap(worker_id, reply, unix_now());
                }
            }
        }
    }

    /// Retransmit a cached reply verbatim.
    async fn send_cached(&self, reply: &CachedReply) {
        let sock = self.socket_for(reply.socket);
        if let Err(e) = sock.send_to(&reply.data, reply.dst).await {
            warn!(dst = %reply.dst, error = %e, "failed to retransmit cached reply");
        }
    }
}

/// Receive from an optional socket; absent sockets never become ready.
async fn recv_optional(
    sock: &Option<Arc<UdpSocket>>,
    buf: &mut [u8],
) -> std::io::Result<(usize, SocketAddr)> {
    match sock {
        Some(s) => s.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

/// Worker body: run the handler, encode and sign the reply, send it, and
/// hand the exact bytes back for retransmission replay.
///
/// The handler itself runs on a nested task so a panicking back end takes
/// down neither the worker bookkeeping nor the dispatcher.
async fn run_worker(
    handlers: Arc<Handlers>,
    role: SocketRole,
    packet: Packet,
    secret: Vec<u8>,
    sock: Arc<UdpSocket>,
) -> Option<CachedReply> {
    let request = Arc::new(packet);

    let handler_request = Arc::clone(&request);
    let handler_secret = secret.clone();
    let handler_set = Arc::clone(&handlers);
    let joined = tokio::spawn(async move {
        if code::is_dhcp(handler_request.code) {
            handler_set.dhcp.handle(&handler_request)
        } else if handler_request.code == code::ACCOUNTING_REQUEST {
            handler_set.acct.handle(&handler_request, &handler_secret)
        } else {
            handler_set.auth.handle(&handler_request, &handler_secret)
        }
    })
    .await;

    let mut reply = match joined {
        Ok(Some(reply)) => reply,
        Ok(None) => return None,
        Err(e) => {
            error!(panicked = e.is_panic(), "handler failed, no reply sent");
            return None;
        }
    };

    let (data, dst) = if code::is_dhcp(request.code) {
        if let Err(e) = dhcp::encode(&mut reply, Some(&request)) {
            error!(error = %e, "failed to encode DHCP reply");
            return None;
        }
        (reply.data.clone(), reply.dst)
    } else {
        match radius::encode_reply(&mut reply, &request.authenticator, &secret) {
            Ok(bytes) => (bytes, request.src),
            Err(e) => {
                error!(error = %e, "failed to encode reply");
                return None;
            }
        }
    };

    if let Err(e) = sock.send_to(&data, dst).await {
        warn!(dst = %dst, error = %e, "failed to send reply");
    }

    Some(CachedReply { data, dst, socket: role })
}
