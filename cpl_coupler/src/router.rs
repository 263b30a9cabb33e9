//! Communication schedule between two independently decomposed models.
//!
//! Built once per pairing: every rank sends its segment map to every peer
//! rank and receives theirs, then intersects the sorted ranges. For each
//! peer rank with a non-empty intersection the router keeps the local
//! positions of the shared global points in ascending global order, which
//! is the element order of every message on that route.

use std::ops::Range;
use std::time::Duration;

use cpl_common::config::ConfigError;
use tracing::{debug, warn};

use crate::error::CouplingError;
use crate::gsmap::GlobalSegMap;
use crate::transport::{Communicator, tags};

/// Local positions exchanged with one peer rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Peer rank in the shared world.
    pub peer: usize,
    /// Local positions, ordered by global index.
    pub positions: Vec<usize>,
}

/// Immutable point correspondence with the peer model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Router {
    rank: usize,
    lsize: usize,
    routes: Vec<Route>,
    uncovered: usize,
}

impl Router {
    /// Exchange segment maps with `peers` and build the schedule.
    pub fn build(
        comm: &dyn Communicator,
        local: &GlobalSegMap,
        peers: Range<usize>,
        timeout: Duration,
    ) -> Result<Self, CouplingError> {
        let rank = comm.rank();
        let wire = local.encode();
        for peer in peers.clone() {
            comm.send(peer, tags::SEGMENT_MAP, &wire)?;
        }

        let mut peer_maps = Vec::with_capacity(peers.len());
        for peer in peers {
            let bytes = comm.recv(peer, tags::SEGMENT_MAP, timeout)?;
            peer_maps.push((peer, GlobalSegMap::decode(&bytes, rank, peer)?));
        }

        let router = Self::from_maps(rank, local, &peer_maps)?;
        debug!(
            rank,
            routes = router.routes.len(),
            points = router.routed_points(),
            "Router built"
        );
        Ok(router)
    }

    /// Intersect `local` with every peer map.
    ///
    /// Fails if a peer map indexes a grid of different extents or two peers
    /// claim the same global point. Local points claimed by no peer are
    /// counted and logged.
    pub fn from_maps(
        rank: usize,
        local: &GlobalSegMap,
        peer_maps: &[(usize, GlobalSegMap)],
    ) -> Result<Self, CouplingError> {
        let local_segments = local.segments();
        let offsets: Vec<usize> = local_segments
            .iter()
            .scan(0, |acc, seg| {
                let offset = *acc;
                *acc += seg.length;
                Some(offset)
            })
            .collect();

        let (lm, mm) = local.extents();
        for (peer, map) in peer_maps {
            let (peer_lm, peer_mm) = map.extents();
            if (peer_lm, peer_mm) != (lm, mm) {
                return Err(ConfigError::ValidationError(format!(
                    "rank {rank} couples a {lm}x{mm} grid but rank {peer} has {peer_lm}x{peer_mm}"
                ))
                .into());
            }
        }

        let mut owner: Vec<Option<usize>> = vec![None; local.lsize()];
        let mut routes = Vec::new();

        for (peer, map) in peer_maps {
            let peer_segments = map.segments();
            let mut positions = Vec::new();
            let (mut a, mut b) = (0, 0);

            while a < local_segments.len() && b < peer_segments.len() {
                let (mine, theirs) = (local_segments[a], peer_segments[b]);
                let lo = mine.start.max(theirs.start);
                let hi = mine.end().min(theirs.end());
                for global in lo..hi {
                    let pos = offsets[a] + (global - mine.start);
                    if let Some(first) = owner[pos] {
                        return Err(CouplingError::OverlappingMaps {
                            rank,
                            global,
                            first,
                            second: *peer,
                        });
                    }
                    owner[pos] = Some(*peer);
                    positions.push(pos);
                }
                if mine.end() <= theirs.end() {
                    a += 1;
                } else {
                    b += 1;
                }
            }

            if !positions.is_empty() {
                routes.push(Route {
                    peer: *peer,
                    positions,
                });
            }
        }

        let uncovered = owner.iter().filter(|o| o.is_none()).count();
        if uncovered > 0 {
            warn!(
                rank,
                uncovered,
                lsize = local.lsize(),
                "Local points not covered by any peer rank"
            );
        }

        Ok(Self {
            rank,
            lsize: local.lsize(),
            routes,
            uncovered,
        })
    }

    /// Rank this router belongs to.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Local points the router was built for.
    pub fn lsize(&self) -> usize {
        self.lsize
    }

    /// Routes in peer rank order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Points exchanged over all routes.
    pub fn routed_points(&self) -> usize {
        self.routes.iter().map(|r| r.positions.len()).sum()
    }

    /// Local points no peer owns.
    pub fn uncovered(&self) -> usize {
        self.uncovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gsmap::Segment;
    use crate::grid::GridDomain;
    use crate::transport::local::LocalFabric;

    fn maps(lm: usize, mm: usize, nti: usize, ntj: usize) -> Vec<GlobalSegMap> {
        let d = GridDomain::new(lm, mm, nti, ntj, false, false).unwrap();
        (0..d.tile_count())
            .map(|t| {
                let (ti, tj) = d.tile_coords(t);
                GlobalSegMap::from_tile(&d, &d.tile(ti, tj).unwrap())
            })
            .collect()
    }

    #[test]
    fn different_layouts_cover_every_point() {
        let ocean = maps(6, 4, 2, 1);
        let ice = maps(6, 4, 1, 3);
        let peers: Vec<_> = ice.iter().cloned().enumerate().map(|(i, m)| (10 + i, m)).collect();

        for local in &ocean {
            let router = Router::from_maps(0, local, &peers).unwrap();
            assert_eq!(router.uncovered(), 0);
            assert_eq!(router.routed_points(), local.lsize());
            for route in router.routes() {
                assert!(route.positions.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }

    #[test]
    fn route_order_matches_on_both_sides() {
        let left = maps(5, 5, 2, 2);
        let right = maps(5, 5, 3, 1);
        let globals = |map: &GlobalSegMap, positions: &[usize]| -> Vec<usize> {
            let all: Vec<usize> = map.global_indices().collect();
            positions.iter().map(|&p| all[p]).collect()
        };

        let l0 = Router::from_maps(0, &left[0], &[(1, right[1].clone())]).unwrap();
        let r1 = Router::from_maps(1, &right[1], &[(0, left[0].clone())]).unwrap();
        assert_eq!(
            globals(&left[0], &l0.routes()[0].positions),
            globals(&right[1], &r1.routes()[0].positions)
        );
    }

    #[test]
    fn overlapping_peers_rejected() {
        let seg = |start, length| GlobalSegMap::from_segments(2, 2, vec![Segment { start, length }]);
        let local = seg(1, 10).unwrap();
        let a = seg(1, 6).unwrap();
        let b = seg(5, 6).unwrap();
        let err = Router::from_maps(0, &local, &[(1, a), (2, b)]).unwrap_err();
        assert!(matches!(
            err,
            CouplingError::OverlappingMaps { global: 5, first: 1, second: 2, .. }
        ));
    }

    #[test]
    fn partial_coverage_counts_uncovered() {
        let local = GlobalSegMap::from_segments(2, 2, vec![Segment { start: 1, length: 10 }]).unwrap();
        let a = GlobalSegMap::from_segments(2, 2, vec![Segment { start: 3, length: 4 }]).unwrap();
        let router = Router::from_maps(0, &local, &[(1, a)]).unwrap();
        assert_eq!(router.uncovered(), 6);
        assert_eq!(router.routes()[0].positions, vec![2, 3, 4, 5]);
    }

    #[test]
    fn differing_grid_extents_rejected() {
        let ocean = maps(8, 6, 2, 1);
        let ice = maps(10, 6, 1, 1);
        let err = Router::from_maps(0, &ocean[0], &[(2, ice[0].clone())]).unwrap_err();
        match err {
            CouplingError::Config(ConfigError::ValidationError(msg)) => {
                assert!(msg.contains("rank 0") && msg.contains("rank 2"), "{msg}");
                assert!(msg.contains("8x6") && msg.contains("10x6"), "{msg}");
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn build_rejects_peer_with_other_extents() {
        let mut endpoints = LocalFabric::endpoints(2);
        let ice_ep = endpoints.pop().unwrap();
        let ocean_ep = endpoints.pop().unwrap();
        let ocean = maps(8, 6, 1, 1).remove(0);
        let ice = maps(10, 6, 1, 1).remove(0);

        let ice_side = std::thread::spawn(move || {
            Router::build(&ice_ep, &ice, 0..1, Duration::from_secs(5))
        });
        let ocean_result = Router::build(&ocean_ep, &ocean, 1..2, Duration::from_secs(5));
        assert!(matches!(ocean_result, Err(CouplingError::Config(_))));
        assert!(matches!(ice_side.join().unwrap(), Err(CouplingError::Config(_))));
    }

    #[test]
    fn build_over_local_fabric() {
        let endpoints = LocalFabric::endpoints(2);
        let all = maps(4, 4, 1, 2);
        let handles: Vec<_> = endpoints
            .into_iter()
            .zip(all)
            .map(|(ep, map)| {
                std::thread::spawn(move || {
                    Router::build(&ep, &map, 0..2, Duration::from_secs(5)).unwrap()
                })
            })
            .collect();
        for handle in handles {
            let router = handle.join().unwrap();
            assert_eq!(router.routes().len(), 1);
            assert_eq!(router.routes()[0].peer, router.rank());
            assert_eq!(router.uncovered(), 0);
        }
    }
}
