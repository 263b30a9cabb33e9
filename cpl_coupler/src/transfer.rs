//! Moves attribute vector contents along a router's routes.
//!
//! One message per route and round:
//!
//! ```text
//! [0..8]   round        u64
//! [8..12]  fingerprint  u32   field-list hash of the sender
//! [12..16] nfields      u32
//! [16..20] npoints      u32   = route length
//! [20..24] reserved
//! [24..]   nfields × npoints f64, field-major, route order
//! ```

use std::time::Duration;

use tracing::trace;

use crate::attrvect::AttrVect;
use crate::error::CouplingError;
use crate::router::Router;
use crate::transport::{Communicator, tags};

/// Encoded size of [`TransferHeader`].
pub const TRANSFER_HEADER_SIZE: usize = 24;

/// Per-message header of a field transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferHeader {
    /// Exchange round the data belongs to.
    pub round: u64,
    /// [`AttrVect::fingerprint`] of the sender's vector.
    pub fingerprint: u32,
    /// Fields in the message.
    pub nfields: u32,
    /// Points per field.
    pub npoints: u32,
}

impl TransferHeader {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.round.to_le_bytes());
        out.extend_from_slice(&self.fingerprint.to_le_bytes());
        out.extend_from_slice(&self.nfields.to_le_bytes());
        out.extend_from_slice(&self.npoints.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let word = |at: usize| -> Option<u32> {
            Some(u32::from_le_bytes(bytes.get(at..at + 4)?.try_into().ok()?))
        };
        Some(Self {
            round: u64::from_le_bytes(bytes.get(0..8)?.try_into().ok()?),
            fingerprint: word(8)?,
            nfields: word(12)?,
            npoints: word(16)?,
        })
    }
}

/// Blocking send/receive of whole attribute vectors.
#[derive(Debug, Clone, Copy)]
pub struct TransferEngine {
    timeout: Duration,
}

impl TransferEngine {
    /// Engine whose receives wait at most `timeout` per message.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn check_size(av: &AttrVect, router: &Router, what: &str) -> Result<(), CouplingError> {
        if av.lsize() != router.lsize() {
            return Err(CouplingError::SizeMismatch {
                rank: router.rank(),
                what: what.to_string(),
                expected: router.lsize(),
                found: av.lsize(),
            });
        }
        Ok(())
    }

    /// Send the values of `av` at every route's positions to that route's peer.
    pub fn send(
        &self,
        comm: &dyn Communicator,
        av: &AttrVect,
        router: &Router,
        round: u64,
    ) -> Result<(), CouplingError> {
        Self::check_size(av, router, "outbound attribute vector")?;

        let nfields = av.nfields();
        let mut message = Vec::new();
        for route in router.routes() {
            message.clear();
            message.reserve(TRANSFER_HEADER_SIZE + nfields * route.positions.len() * 8);
            TransferHeader {
                round,
                fingerprint: av.fingerprint(),
                nfields: nfields as u32,
                npoints: route.positions.len() as u32,
            }
            .encode_into(&mut message);

            for field in 0..nfields {
                let column = av.column(field);
                for &pos in &route.positions {
                    message.extend_from_slice(&column[pos].to_le_bytes());
                }
            }

            trace!(rank = router.rank(), peer = route.peer, bytes = message.len(), "Sending fields");
            comm.send(route.peer, tags::FIELDS, &message)?;
        }
        Ok(())
    }

    /// Fill `av` from the most recent send of every peer on the router.
    pub fn receive(
        &self,
        comm: &dyn Communicator,
        av: &mut AttrVect,
        router: &Router,
        round: u64,
    ) -> Result<(), CouplingError> {
        Self::check_size(av, router, "inbound attribute vector")?;

        let rank = router.rank();
        let nfields = av.nfields();
        let fingerprint = av.fingerprint();

        for route in router.routes() {
            let peer = route.peer;
            let message = comm.recv(peer, tags::FIELDS, self.timeout)?;
            let header = TransferHeader::decode(&message).ok_or_else(|| CouplingError::Malformed {
                rank,
                peer,
                detail: format!("{} bytes cannot hold a transfer header", message.len()),
            })?;

            if header.round != round {
                return Err(CouplingError::HeaderMismatch {
                    rank,
                    peer,
                    detail: format!("round {} while expecting round {round}", header.round),
                });
            }
            if header.nfields as usize != nfields {
                return Err(CouplingError::SizeMismatch {
                    rank,
                    what: format!("field count from rank {peer}"),
                    expected: nfields,
                    found: header.nfields as usize,
                });
            }
            if header.npoints as usize != route.positions.len() {
                return Err(CouplingError::SizeMismatch {
                    rank,
                    what: format!("point count from rank {peer}"),
                    expected: route.positions.len(),
                    found: header.npoints as usize,
                });
            }
            if header.fingerprint != fingerprint {
                return Err(CouplingError::HeaderMismatch {
                    rank,
                    peer,
                    detail: format!(
                        "field list fingerprint {:#010x} differs from local {fingerprint:#010x}",
                        header.fingerprint
                    ),
                });
            }

            let body = &message[TRANSFER_HEADER_SIZE..];
            let expected_bytes = nfields * route.positions.len() * 8;
            if body.len() != expected_bytes {
                return Err(CouplingError::SizeMismatch {
                    rank,
                    what: format!("payload bytes from rank {peer}"),
                    expected: expected_bytes,
                    found: body.len(),
                });
            }

            let mut values = body
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]));
            for field in 0..nfields {
                let column = av.column_mut(field);
                for (&pos, value) in route.positions.iter().zip(values.by_ref()) {
                    column[pos] = value;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gsmap::GlobalSegMap;
    use crate::grid::GridDomain;
    use crate::transport::local::LocalFabric;
    use cpl_common::field_code::FieldCode;

    fn codes(list: &[&str]) -> Vec<FieldCode> {
        list.iter().map(|c| FieldCode::new(c).unwrap()).collect()
    }

    fn loopback_router(comm: &dyn Communicator) -> Router {
        let d = GridDomain::new(3, 3, 1, 1, false, false).unwrap();
        let map = GlobalSegMap::from_tile(&d, &d.tile(0, 0).unwrap());
        Router::build(comm, &map, 0..1, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn loopback_transfer_is_exact() {
        let ep = LocalFabric::endpoints(1).remove(0);
        let router = loopback_router(&ep);
        let engine = TransferEngine::new(Duration::from_secs(1));

        let mut out = AttrVect::new(codes(&["A", "B"]), router.lsize());
        for (p, v) in out.column_mut(1).iter_mut().enumerate() {
            *v = p as f64 * 0.1 - 3.0;
        }
        let mut inb = AttrVect::new(codes(&["A", "B"]), router.lsize());

        engine.send(&ep, &out, &router, 1).unwrap();
        engine.receive(&ep, &mut inb, &router, 1).unwrap();
        assert_eq!(inb, out);
    }

    #[test]
    fn wrong_vector_length_is_fatal() {
        let ep = LocalFabric::endpoints(1).remove(0);
        let router = loopback_router(&ep);
        let engine = TransferEngine::new(Duration::from_secs(1));
        let short = AttrVect::new(codes(&["A"]), router.lsize() - 1);
        let err = engine.send(&ep, &short, &router, 1).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn field_list_mismatch_detected() {
        let ep = LocalFabric::endpoints(1).remove(0);
        let router = loopback_router(&ep);
        let engine = TransferEngine::new(Duration::from_secs(1));

        let out = AttrVect::new(codes(&["A", "B"]), router.lsize());
        let mut inb = AttrVect::new(codes(&["B", "A"]), router.lsize());
        engine.send(&ep, &out, &router, 3).unwrap();
        assert!(matches!(
            engine.receive(&ep, &mut inb, &router, 3),
            Err(CouplingError::HeaderMismatch { .. })
        ));
    }

    #[test]
    fn stale_round_detected() {
        let ep = LocalFabric::endpoints(1).remove(0);
        let router = loopback_router(&ep);
        let engine = TransferEngine::new(Duration::from_secs(1));
        let out = AttrVect::new(codes(&["A"]), router.lsize());
        let mut inb = out.clone();
        engine.send(&ep, &out, &router, 1).unwrap();
        assert!(matches!(
            engine.receive(&ep, &mut inb, &router, 2),
            Err(CouplingError::HeaderMismatch { .. })
        ));
    }
}
