//! Cross-process transport over shared-memory mailboxes.
//!
//! Every ordered rank pair `(src, dst)` that exchanges messages gets two
//! segments, both created lazily on first use:
//!
//! ```text
//! cpl_<run>_msg_<src>_<dst>_<pid>   written by src: [MessageHeader | payload]
//! cpl_<run>_ack_<src>_<dst>_<pid>   written by dst: last consumed seq (u64 LE)
//! ```
//!
//! A mailbox holds one message. Before writing message `n` the sender waits
//! until the receiver has acknowledged message `n-1`; the receiver waits for
//! a header carrying sequence `n`. Messages on a link are therefore
//! delivered strictly in order, and a receive asking for a different tag
//! than the head message fails with [`TransportError::TagMismatch`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};

use cpl_common::shm::consts::{SHM_MIN_SIZE, page_aligned};
use cpl_common::shm::link::{MESSAGE_HEADER_SIZE, MessageHeader};
use cpl_shared_memory::{SegmentReader, SegmentWriter, ShmError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Communicator, check_rank};
use crate::error::TransportError;

/// Default mailbox payload capacity (4 MiB).
pub const DEFAULT_MAILBOX_BYTES: usize = 4 * 1024 * 1024;

const POLL_INTERVAL: Duration = Duration::from_micros(50);
const SPINS_BEFORE_SLEEP: u32 = 64;

struct Outbound {
    mailbox: SegmentWriter,
    ack: Option<SegmentReader>,
    seq: u64,
    scratch: Vec<u8>,
}

struct Inbound {
    mailbox: Option<SegmentReader>,
    ack: SegmentWriter,
    seq: u64,
}

#[derive(Default)]
struct Links {
    outbound: HashMap<usize, Outbound>,
    inbound: HashMap<usize, Inbound>,
}

/// One rank's endpoint in a shared-memory world.
pub struct ShmCommunicator {
    rank: usize,
    size: usize,
    run_id: String,
    capacity: usize,
    ack_timeout: Duration,
    links: Mutex<Links>,
}

impl ShmCommunicator {
    /// Endpoint for `rank` of a `size`-rank world namespaced by `run_id`.
    ///
    /// `ack_timeout` bounds how long a send waits for the previous message
    /// on the same link to be consumed.
    pub fn new(
        run_id: &str,
        rank: usize,
        size: usize,
        capacity: usize,
        ack_timeout: Duration,
    ) -> Result<Self, TransportError> {
        check_rank(rank, size)?;
        Ok(Self {
            rank,
            size,
            run_id: run_id.to_string(),
            capacity,
            ack_timeout,
            links: Mutex::new(Links::default()),
        })
    }

    /// Mailbox payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn msg_name(&self, src: usize, dst: usize) -> String {
        format!("{}_msg_{src}_{dst}", self.run_id)
    }

    fn ack_name(&self, src: usize, dst: usize) -> String {
        format!("{}_ack_{src}_{dst}", self.run_id)
    }

    fn timeout(&self, peer: usize, tag: u32, started: Instant) -> TransportError {
        TransportError::Timeout {
            rank: self.rank,
            peer,
            tag,
            waited_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Wait until every peer has acknowledged every message sent to it.
    ///
    /// Returns `false` if the acknowledgement did not arrive within
    /// `timeout`.
    pub fn drain(&self, timeout: Duration) -> bool {
        let mut links = self.links.lock();
        let ack_names: Vec<(usize, String)> = links
            .outbound
            .keys()
            .map(|&dest| (dest, self.ack_name(self.rank, dest)))
            .collect();
        let deadline = Instant::now() + timeout;
        ack_names.into_iter().all(|(dest, ack_name)| {
            links.outbound.get_mut(&dest).is_some_and(|link| {
                let target = link.seq;
                wait_for_ack(link, &ack_name, target, deadline)
            })
        })
    }
}

fn read_ack(reader: &mut SegmentReader) -> Option<u64> {
    reader
        .read_range(0, 8)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_le_bytes)
}

fn backoff(spins: &mut u32) {
    if *spins < SPINS_BEFORE_SLEEP {
        *spins += 1;
        std::thread::yield_now();
    } else {
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Block until the peer acknowledged message `target`; `false` on deadline.
fn wait_for_ack(link: &mut Outbound, ack_name: &str, target: u64, deadline: Instant) -> bool {
    if target == 0 {
        return true;
    }
    let mut spins = 0;
    loop {
        if link.ack.is_none() {
            link.ack = SegmentReader::attach(ack_name).ok();
        }
        if let Some(acked) = link.ack.as_mut().and_then(read_ack) {
            if acked >= target {
                return true;
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        backoff(&mut spins);
    }
}

impl Communicator for ShmCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: usize, tag: u32, payload: &[u8]) -> Result<(), TransportError> {
        check_rank(dest, self.size)?;
        if payload.len() > self.capacity {
            return Err(TransportError::PayloadTooLarge {
                len: payload.len(),
                capacity: self.capacity,
            });
        }

        let mut links = self.links.lock();
        let link = match links.outbound.entry(dest) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let size = page_aligned(MESSAGE_HEADER_SIZE + self.capacity);
                let mailbox = SegmentWriter::create(&self.msg_name(self.rank, dest), size)?;
                debug!(rank = self.rank, dest, "Opened outbound mailbox");
                e.insert(Outbound {
                    mailbox,
                    ack: None,
                    seq: 0,
                    scratch: Vec::with_capacity(MESSAGE_HEADER_SIZE),
                })
            }
        };

        let started = Instant::now();
        let previous = link.seq;
        let ack_name = self.ack_name(self.rank, dest);
        if !wait_for_ack(link, &ack_name, previous, started + self.ack_timeout) {
            return Err(self.timeout(dest, tag, started));
        }

        let seq = previous + 1;
        let header = MessageHeader::new(seq, tag, payload.len() as u32, self.rank as u32, dest as u32);
        link.scratch.clear();
        link.scratch.extend_from_slice(&header.encode());
        link.scratch.extend_from_slice(payload);
        link.mailbox.write(&link.scratch)?;
        link.seq = seq;
        Ok(())
    }

    fn recv(&self, source: usize, tag: u32, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        check_rank(source, self.size)?;

        let mut links = self.links.lock();
        let link = match links.inbound.entry(source) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let ack = SegmentWriter::create(&self.ack_name(source, self.rank), SHM_MIN_SIZE)?;
                e.insert(Inbound {
                    mailbox: None,
                    ack,
                    seq: 0,
                })
            }
        };

        let msg_name = self.msg_name(source, self.rank);
        let started = Instant::now();
        let deadline = started + timeout;
        let expected = link.seq + 1;
        let mut spins = 0;

        loop {
            if link.mailbox.is_none() {
                match SegmentReader::attach(&msg_name) {
                    Ok(reader) => link.mailbox = Some(reader),
                    Err(ShmError::NotFound { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }

            if let Some(reader) = link.mailbox.as_mut() {
                let header = reader
                    .read_range(0, MESSAGE_HEADER_SIZE)
                    .ok()
                    .and_then(MessageHeader::decode);
                match header {
                    Some(h) if h.seq == expected => {
                        if h.tag != tag {
                            return Err(TransportError::TagMismatch {
                                rank: self.rank,
                                peer: source,
                                expected: tag,
                                found: h.tag,
                            });
                        }
                        let payload = reader
                            .read_range(MESSAGE_HEADER_SIZE, h.payload_len as usize)?
                            .to_vec();
                        link.ack.write(&expected.to_le_bytes())?;
                        link.seq = expected;
                        return Ok(payload);
                    }
                    Some(h) if h.seq > expected => {
                        return Err(TransportError::OutOfSequence {
                            rank: self.rank,
                            peer: source,
                            expected,
                            found: h.seq,
                        });
                    }
                    _ => {}
                }
            }

            if Instant::now() >= deadline {
                return Err(self.timeout(source, tag, started));
            }
            backoff(&mut spins);
        }
    }
}

impl Drop for ShmCommunicator {
    fn drop(&mut self) {
        if !self.drain(self.ack_timeout) {
            warn!(
                rank = self.rank,
                "Closing shared-memory endpoint with unacknowledged messages"
            );
        }
    }
}
