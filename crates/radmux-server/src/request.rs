//! In-flight request records and the request table.
//!
//! The table is owned by the dispatcher task; nothing else touches it.
//! Worker completions arrive over a channel and are applied between
//! datagrams, so no locking is needed.

use radmux_proto::{code, Packet};
use std::net::SocketAddr;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Upper bound on live request records.
pub const MAX_REQUESTS: usize = 256;
/// Default watchdog horizon for unresponsive workers, in seconds.
pub const MAX_REQUEST_TIME: u64 = 30;
/// Default retention window for finished requests, in seconds.
pub const CLEANUP_DELAY: u64 = 5;

/// Which server socket a packet arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRole {
    Auth,
    Acct,
    Proxy,
    Dhcp,
}

/// A reply retained for retransmission replay: the exact bytes that went
/// out, where they went, and on which socket.
#[derive(Debug, Clone)]
pub struct CachedReply {
    pub data: Vec<u8>,
    pub dst: SocketAddr,
    pub socket: SocketRole,
}

/// One in-flight or recently finished request.
#[derive(Debug)]
pub struct RequestRecord {
    pub packet: Packet,
    pub secret: Vec<u8>,
    pub client_name: String,
    pub socket: SocketRole,
    pub reply: Option<CachedReply>,
    /// Arrival time, unix seconds. Refreshed when the worker finishes so
    /// the record lingers for one cleanup window.
    pub timestamp: u64,
    /// Running worker, if any. `None` means freshly admitted or finished.
    pub worker: Option<AbortHandle>,
    pub worker_id: u64,
    pub finished: bool,
}

impl RequestRecord {
    pub fn new(
        packet: Packet,
        secret: Vec<u8>,
        client_name: String,
        socket: SocketRole,
        now: u64,
    ) -> Self {
        RequestRecord {
            packet,
            secret,
            client_name,
            socket,
            reply: None,
            timestamp: now,
            worker: None,
            worker_id: 0,
            finished: false,
        }
    }
}

/// Outcome of [`RequestTable::admit`].
#[derive(Debug)]
pub enum Admission {
    Accepted,
    /// Same `(source, id, vector)` as a live or cached record. Carries the
    /// cached reply to retransmit, if one exists.
    Duplicate(Option<CachedReply>),
    /// Too many live requests.
    Overloaded,
}

/// The set of in-flight requests, owned by the dispatcher.
pub struct RequestTable {
    records: Vec<RequestRecord>,
    max_requests: usize,
    max_request_time: u64,
    cleanup_delay: u64,
}

impl RequestTable {
    pub fn new(max_request_time: u64, cleanup_delay: u64) -> Self {
        RequestTable {
            records: Vec::new(),
            max_requests: MAX_REQUESTS,
            max_request_time,
            cleanup_delay,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Walk the table, retiring finished records past the cleanup window
    /// and killing workers past the watchdog horizon, then admit the new
    /// record unless it duplicates a live one or the table is full.
    pub fn admit(&mut self, mut record: RequestRecord, now: u64) -> Admission {
        let src_ip = record.packet.src.ip();
        let id = record.packet.id;
        let vector = record.packet.authenticator;

        let mut live = 0usize;
        let mut i = 0;
        while i < self.records.len() {
            let cur = &mut self.records[i];

            if cur.worker.is_none() && cur.timestamp + self.cleanup_delay <= now {
                // Request completed and lingered long enough.
                self.records.remove(i);
                continue;
            }

            if cur.packet.src.ip() == src_ip && cur.packet.id == id {
                if cur.packet.authenticator == vector {
                    if cur.reply.is_some() {
                        info!(
                            client = %record.client_name,
                            id,
                            "sending duplicate reply to retransmitted request"
                        );
                    } else {
                        warn!(
                            client = %record.client_name,
                            id,
                            "dropping duplicate request"
                        );
                    }
                    return Admission::Duplicate(cur.reply.clone());
                }

                // Same id, different vector: the client reused the id. A
                // finished record is retired on the spot; a live one keeps
                // running.
                if cur.worker.is_none() {
                    cur.timestamp = now.saturating_sub(self.cleanup_delay);
                    continue;
                }

                live += 1;
                i += 1;
                continue;
            }

            if cur.worker.is_some() && cur.timestamp + self.max_request_time <= now {
                warn!(
                    worker_id = cur.worker_id,
                    client = %cur.client_name,
                    "killing unresponsive worker"
                );
                if let Some(handle) = cur.worker.take() {
                    handle.abort();
                }
                // Retired by the sweep on a later pass.
            }

            live += 1;
            i += 1;
        }

        if live >= self.max_requests {
            warn!(
                client = %record.client_name,
                id,
                "dropping request: too many in flight"
            );
            return Admission::Overloaded;
        }

        record.worker = None;
        record.timestamp = now;
        self.records.push(record);
        Admission::Accepted
    }

    /// Attach a worker handle to a freshly admitted record.
    pub fn set_worker(&mut self, worker_id: u64, handle: AbortHandle) {
        if let Some(rec) = self.records.iter_mut().find(|r| r.worker_id == worker_id) {
            rec.worker = Some(handle);
        }
    }

    /// Apply a worker completion: clear the handle, cache the reply for
    /// replay, and start the cleanup clock.
    pub fn reap(&mut self, worker_id: u64, reply: Option<CachedReply>, now: u64) {
        match self.records.iter_mut().find(|r| r.worker_id == worker_id) {
            Some(rec) => {
                rec.worker = None;
                if reply.is_some() {
                    rec.reply = reply;
                }
                rec.finished = true;
                rec.timestamp = now;
                debug!(
                    worker_id,
                    code = code::code_name(rec.packet.code),
                    "worker finished"
                );
            }
            None => debug!(worker_id, "completion for already-retired request"),
        }
    }

    #[cfg(test)]
    fn record(&self, worker_id: u64) -> Option<&RequestRecord> {
        self.records.iter().find(|r| r.worker_id == worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radmux_proto::code::ACCESS_REQUEST;

    fn request(ip: &str, id: u32, vector: [u8; 16], worker_id: u64) -> RequestRecord {
        let mut packet = Packet::new(ACCESS_REQUEST, id);
        packet.authenticator = vector;
        packet.src = format!("{ip}:1812").parse().unwrap();
        let mut rec = RequestRecord::new(
            packet,
            b"secret".to_vec(),
            "test-client".to_string(),
            SocketRole::Auth,
            0,
        );
        rec.worker_id = worker_id;
        rec
    }

    fn cached_reply() -> CachedReply {
        CachedReply {
            data: vec![2, 7, 0, 20],
            dst: "10.0.0.1:4242".parse().unwrap(),
            socket: SocketRole::Auth,
        }
    }

    #[test]
    fn test_duplicate_rejected_before_reply() {
        let mut table = RequestTable::new(MAX_REQUEST_TIME, CLEANUP_DELAY);
        let vector = [7u8; 16];

        assert!(matches!(
            table.admit(request("10.0.0.1", 7, vector, 1), 100),
            Admission::Accepted
        ));
        assert!(matches!(
            table.admit(request("10.0.0.1", 7, vector, 2), 100),
            Admission::Duplicate(None)
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_retransmission_replays_cached_reply() {
        let mut table = RequestTable::new(MAX_REQUEST_TIME, CLEANUP_DELAY);
        let vector = [7u8; 16];

        table.admit(request("10.0.0.1", 7, vector, 1), 100);
        table.reap(1, Some(cached_reply()), 101);

        // Within the cleanup window the cached reply comes back verbatim.
        match table.admit(request("10.0.0.1", 7, vector, 2), 103) {
            Admission::Duplicate(Some(reply)) => assert_eq!(reply.data, cached_reply().data),
            other => panic!("expected cached reply, got {other:?}"),
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_finished_record_swept_after_cleanup_delay() {
        let mut table = RequestTable::new(MAX_REQUEST_TIME, CLEANUP_DELAY);
        table.admit(request("10.0.0.1", 7, [1u8; 16], 1), 100);
        table.reap(1, None, 101);

        // Next admission after the window retires it.
        table.admit(request("10.0.0.2", 8, [2u8; 16], 2), 101 + CLEANUP_DELAY);
        assert_eq!(table.len(), 1);
        assert!(table.record(1).is_none());
    }

    #[tokio::test]
    async fn test_hung_worker_killed_after_max_request_time() {
        let mut table = RequestTable::new(MAX_REQUEST_TIME, CLEANUP_DELAY);

        let task = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        });
        table.admit(request("10.0.0.2", 9, [3u8; 16], 1), 100);
        table.set_worker(1, task.abort_handle());

        // 31 seconds later any admission kills the stale worker.
        table.admit(request("10.0.0.3", 1, [4u8; 16], 2), 131);
        assert!(table.record(1).unwrap().worker.is_none());
        assert!(task.await.unwrap_err().is_cancelled());

        // The retired record goes away on the next sweep.
        table.admit(request("10.0.0.4", 2, [5u8; 16], 3), 132);
        assert!(table.record(1).is_none());
    }

    #[test]
    fn test_same_id_different_vector_retires_finished_record() {
        let mut table = RequestTable::new(MAX_REQUEST_TIME, CLEANUP_DELAY);
        table.admit(request("10.0.0.1", 7, [1u8; 16], 1), 100);
        table.reap(1, Some(cached_reply()), 100);

        // Same id, new vector: a genuinely new request. The finished
        // record is force-retired and the new one admitted.
        assert!(matches!(
            table.admit(request("10.0.0.1", 7, [9u8; 16], 2), 101),
            Admission::Accepted
        ));
        assert_eq!(table.len(), 1);
        assert!(table.record(1).is_none());
        assert!(table.record(2).is_some());
    }

    #[test]
    fn test_overload_shedding() {
        let mut table = RequestTable::new(MAX_REQUEST_TIME, CLEANUP_DELAY);
        for n in 0..MAX_REQUESTS as u64 {
            let mut vector = [0u8; 16];
            vector[..8].copy_from_slice(&n.to_be_bytes());
            let outcome = table.admit(request("10.0.0.1", n as u32 + 1000, vector, n), 100);
            assert!(matches!(outcome, Admission::Accepted));
        }
        assert_eq!(table.len(), MAX_REQUESTS);

        // The table never grows past the bound.
        let outcome = table.admit(request("10.0.0.9", 1, [0xaa; 16], 9999), 100);
        assert!(matches!(outcome, Admission::Overloaded));
        assert_eq!(table.len(), MAX_REQUESTS);
    }

    #[test]
    fn test_admitted_timestamps_not_in_future() {
        let mut table = RequestTable::new(MAX_REQUEST_TIME, CLEANUP_DELAY);
        let mut rec = request("10.0.0.1", 1, [1u8; 16], 1);
        rec.timestamp = 9999;
        table.admit(rec, 100);
        assert_eq!(table.record(1).unwrap().timestamp, 100);
    }
}
