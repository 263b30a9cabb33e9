//! In-process transport: every rank is a thread holding a [`LocalEndpoint`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Communicator, check_rank};
use crate::error::TransportError;

type Mailboxes = HashMap<(usize, usize, u32), VecDeque<Vec<u8>>>;

/// Shared mailboxes of an in-process world, keyed by `(source, dest, tag)`.
#[derive(Debug)]
pub struct LocalFabric {
    size: usize,
    mailboxes: Mutex<Mailboxes>,
    arrived: Condvar,
}

impl LocalFabric {
    /// Fabric for `size` ranks.
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            mailboxes: Mutex::new(HashMap::new()),
            arrived: Condvar::new(),
        })
    }

    /// One endpoint per rank, in rank order.
    pub fn endpoints(size: usize) -> Vec<LocalEndpoint> {
        let fabric = Self::new(size);
        (0..size)
            .map(|rank| LocalEndpoint {
                fabric: Arc::clone(&fabric),
                rank,
            })
            .collect()
    }

    /// Messages queued and not yet received.
    pub fn pending(&self) -> usize {
        self.mailboxes.lock().values().map(VecDeque::len).sum()
    }
}

/// One rank's view of a [`LocalFabric`].
#[derive(Debug, Clone)]
pub struct LocalEndpoint {
    fabric: Arc<LocalFabric>,
    rank: usize,
}

impl LocalEndpoint {
    /// The fabric this endpoint belongs to.
    pub fn fabric(&self) -> &Arc<LocalFabric> {
        &self.fabric
    }
}

impl Communicator for LocalEndpoint {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.fabric.size
    }

    fn send(&self, dest: usize, tag: u32, payload: &[u8]) -> Result<(), TransportError> {
        check_rank(dest, self.fabric.size)?;
        self.fabric
            .mailboxes
            .lock()
            .entry((self.rank, dest, tag))
            .or_default()
            .push_back(payload.to_vec());
        self.fabric.arrived.notify_all();
        Ok(())
    }

    fn recv(&self, source: usize, tag: u32, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        check_rank(source, self.fabric.size)?;
        let key = (source, self.rank, tag);
        let started = Instant::now();
        let deadline = started + timeout;

        let mut mailboxes = self.fabric.mailboxes.lock();
        loop {
            if let Some(message) = mailboxes.get_mut(&key).and_then(VecDeque::pop_front) {
                return Ok(message);
            }
            if self
                .fabric
                .arrived
                .wait_until(&mut mailboxes, deadline)
                .timed_out()
            {
                if let Some(message) = mailboxes.get_mut(&key).and_then(VecDeque::pop_front) {
                    return Ok(message);
                }
                return Err(TransportError::Timeout {
                    rank: self.rank,
                    peer: source,
                    tag,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        }
    }
}
