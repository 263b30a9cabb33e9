//! Segment maps of every tiling partition the halo-extended global grid.

use cpl_coupler::grid::GridDomain;
use cpl_coupler::gsmap::GlobalSegMap;
use cpl_coupler::router::Router;
use proptest::prelude::*;

fn maps(domain: &GridDomain) -> Vec<GlobalSegMap> {
    (0..domain.tile_count())
        .map(|t| {
            let (ti, tj) = domain.tile_coords(t);
            GlobalSegMap::from_tile(domain, &domain.tile(ti, tj).unwrap())
        })
        .collect()
}

/// `(lm, mm, ntile_i, ntile_j)` with at least one cell per tile.
fn layout() -> impl Strategy<Value = (usize, usize, usize, usize)> {
    (1usize..=40, 1usize..=30).prop_flat_map(|(lm, mm)| (Just(lm), Just(mm), 1..=lm.min(8), 1..=mm.min(8)))
}

proptest! {
    #[test]
    fn tiles_partition_global_index_space((lm, mm, nti, ntj) in layout(), ew in any::<bool>(), ns in any::<bool>()) {
        let domain = GridDomain::new(lm, mm, nti, ntj, ew, ns).unwrap();
        let total = (lm + 2) * (mm + 2);
        let mut seen = vec![false; total + 1];

        for map in maps(&domain) {
            for g in map.global_indices() {
                prop_assert!((1..=total).contains(&g), "index {} outside 1..={}", g, total);
                prop_assert!(!seen[g], "index {} owned twice", g);
                seen[g] = true;
            }
        }
        prop_assert!(seen[1..].iter().all(|&s| s));
    }

    #[test]
    fn routers_between_tilings_cover_every_point(
        (lm, mm, nti, ntj) in layout(),
        peer_i in 1usize..=4,
        peer_j in 1usize..=4,
    ) {
        let ours = GridDomain::new(lm, mm, nti, ntj, false, false).unwrap();
        let theirs = GridDomain::new(lm, mm, peer_i.min(lm), peer_j.min(mm), false, false).unwrap();
        let peer_maps: Vec<(usize, GlobalSegMap)> = maps(&theirs).into_iter().enumerate().collect();

        for (rank, local) in maps(&ours).iter().enumerate() {
            let router = Router::from_maps(rank, local, &peer_maps).unwrap();
            prop_assert_eq!(router.uncovered(), 0);
            prop_assert_eq!(router.routed_points(), local.lsize());
        }
    }
}
