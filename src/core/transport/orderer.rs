//! Per-account ordering of the inbound event stream.
//!
//! The server assigns each stream packet a per-account monotonically
//! increasing sequence number. Packets can arrive out of order; the orderer
//! buffers ahead-of-sequence packets and releases them once their
//! predecessors show up. A gap that persists past the configured timeout is
//! given up on and reported so the synchronization engine can resync.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use super::protocol::RawPacket;
use crate::core::domain::AccountId;

/// Default time a sequence gap may persist before it is promoted.
pub const DEFAULT_OUT_OF_ORDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on the number of buffered ahead-of-sequence packets.
pub const DEFAULT_BUFFER_CAPACITY: usize = 512;

/// Output of submitting a packet to the orderer.
#[derive(Debug)]
pub enum Ordered {
    /// A packet released in sequence order.
    Release(RawPacket),
    /// A gap that timed out; the listed sequence numbers will never arrive.
    Gap(Range<u64>),
}

struct Session {
    next_expected: u64,
    buffer: BTreeMap<u64, RawPacket>,
    /// When the currently-observed gap was first seen.
    gap_since: Option<Instant>,
}

impl Session {
    fn new() -> Self {
        Self {
            next_expected: 1,
            buffer: BTreeMap::new(),
            gap_since: None,
        }
    }

    fn drain_contiguous(&mut self, out: &mut Vec<Ordered>) {
        while let Some(packet) = self.buffer.remove(&self.next_expected) {
            out.push(Ordered::Release(packet));
            self.next_expected += 1;
        }
        self.gap_since = if self.buffer.is_empty() {
            None
        } else {
            // A gap remains in front of the earliest buffered packet.
            self.gap_since.or_else(|| Some(Instant::now()))
        };
    }

    fn promote_gap(&mut self, out: &mut Vec<Ordered>) {
        if let Some((&first_buffered, _)) = self.buffer.iter().next() {
            out.push(Ordered::Gap(self.next_expected..first_buffered));
            self.next_expected = first_buffered;
            self.gap_since = None;
            self.drain_contiguous(out);
        }
    }
}

/// Reorders inbound stream packets per account.
pub struct PacketOrderer {
    sessions: Mutex<HashMap<AccountId, Session>>,
    out_of_order_timeout: Duration,
    buffer_capacity: usize,
}

impl PacketOrderer {
    #[must_use]
    pub fn new(out_of_order_timeout: Duration, buffer_capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            out_of_order_timeout,
            buffer_capacity,
        }
    }

    /// Submit a packet, returning whatever can be released in order.
    ///
    /// A `synchronizationStarted` packet resets the account's expected
    /// counter to the server-declared base, discarding stale buffered
    /// packets below it.
    pub fn submit(&self, account_id: &AccountId, packet: RawPacket) -> Vec<Ordered> {
        let mut out = Vec::new();
        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(account_id.clone())
            .or_insert_with(Session::new);

        let Some(sequence) = packet.sequence_number else {
            // Housekeeping frames are not part of the ordered stream.
            out.push(Ordered::Release(packet));
            return out;
        };

        if packet.packet_type == "synchronizationStarted" {
            session.next_expected = sequence;
            session.buffer.retain(|&seq, _| seq > sequence);
            session.gap_since = None;
        }

        if sequence < session.next_expected {
            // Already delivered.
            return out;
        }

        if sequence == session.next_expected {
            session.next_expected += 1;
            out.push(Ordered::Release(packet));
            session.drain_contiguous(&mut out);
            return out;
        }

        // Ahead of sequence: buffer and watch the gap.
        if session.buffer.len() >= self.buffer_capacity {
            if let Some((&oldest, _)) = session.buffer.iter().next() {
                session.buffer.remove(&oldest);
                warn!(
                    account_id = %account_id,
                    sequence = oldest,
                    "Packet buffer overflow, dropping oldest buffered packet"
                );
            }
        }
        session.buffer.insert(sequence, packet);
        session.gap_since.get_or_insert_with(Instant::now);

        if session
            .gap_since
            .is_some_and(|since| since.elapsed() >= self.out_of_order_timeout)
        {
            session.promote_gap(&mut out);
        }
        out
    }

    /// Promote gaps that have outlived the timeout on quiet streams.
    ///
    /// Called periodically by the transport so a gap is detected even when
    /// no further packets arrive to trigger the check in [`submit`](Self::submit).
    pub fn check_timeouts(&self) -> Vec<(AccountId, Vec<Ordered>)> {
        let mut results = Vec::new();
        let mut sessions = self.sessions.lock();
        for (account_id, session) in sessions.iter_mut() {
            if session
                .gap_since
                .is_some_and(|since| since.elapsed() >= self.out_of_order_timeout)
            {
                let mut out = Vec::new();
                session.promote_gap(&mut out);
                if !out.is_empty() {
                    results.push((account_id.clone(), out));
                }
            }
        }
        results
    }

    /// Drop all ordering state for an account.
    pub fn reset(&self, account_id: &AccountId) {
        self.sessions.lock().remove(account_id);
    }
}

impl Default for PacketOrderer {
    fn default() -> Self {
        Self::new(DEFAULT_OUT_OF_ORDER_TIMEOUT, DEFAULT_BUFFER_CAPACITY)
    }
}
