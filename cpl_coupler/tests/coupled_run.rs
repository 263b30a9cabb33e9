//! End-to-end coupling runs over the in-process fabric.
//!
//! Ranks 0-1 run the ocean side on a 2×1 tiling, ranks 2-3 the ice side on
//! a 1×2 tiling of the same 8×6 grid.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpl_common::config::ConfigLoader;
use cpl_common::field_code::FieldCode;
use cpl_coupler::adapter::FieldAdapter;
use cpl_coupler::attrvect::AttrVect;
use cpl_coupler::boundary::TileBoundary;
use cpl_coupler::config::{CouplerConfig, VerticalSection};
use cpl_coupler::grid::{Field2d, Field3d, GridDomain, Staggering, TileBounds};
use cpl_coupler::gsmap::GlobalSegMap;
use cpl_coupler::lifecycle::CouplerState;
use cpl_coupler::native::{ModelState, NativeModel};
use cpl_coupler::registry::{Derivation, FieldDescriptor};
use cpl_coupler::router::Router;
use cpl_coupler::thermo::{FreezeMeltAccumulator, ThermoParams};
use cpl_coupler::transfer::TransferEngine;
use cpl_coupler::transport::Communicator;
use cpl_coupler::transport::local::LocalFabric;
use cpl_coupler::{Coupler, CouplingError, RoundReport};

const LM: i32 = 8;
const MM: i32 = 6;

fn ocean_config() -> CouplerConfig {
    CouplerConfig::from_toml_str(
        r#"
[shared]
service_name = "ocean-test"

[coupling]
model = "ocean"
peer = "ice"
interval_s = 3600.0
substeps = 3
halo_width = 2
recv_timeout_ms = 10000

[grid]
lm = 8
mm = 6
ntile_i = 2
ntile_j = 1

[[models]]
name = "ocean"
ranks = 2

[[models]]
name = "ice"
ranks = 2

[[fields]]
code = "SST"
array = "temp"
derivation = "surface_slice"

[[fields]]
code = "SSH"
array = "zeta"

[[fields]]
code = "SSS"
array = "sea_surface_salinity"

[[fields]]
code = "FRZMLT"
array = "frzmlt"
derivation = "freeze_melt_potential"

[[fields]]
code = "UOCN"
array = "u"
staggering = "u"
exchange_staggering = "u"
derivation = "mixed_layer_mean"

[[fields]]
code = "UICE"
array = "uice"
staggering = "u"

[lists]
export = ["SST", "SSH", "SSS", "FRZMLT", "UOCN"]
import = ["UICE"]
"#,
    )
    .unwrap()
}

fn ice_config() -> CouplerConfig {
    CouplerConfig::from_toml_str(
        r#"
[shared]
service_name = "ice-test"

[coupling]
model = "ice"
peer = "ocean"
interval_s = 3600.0
halo_width = 2
recv_timeout_ms = 10000

[grid]
lm = 8
mm = 6
ntile_i = 1
ntile_j = 2

[[models]]
name = "ocean"
ranks = 2

[[models]]
name = "ice"
ranks = 2

[[fields]]
code = "SST"
array = "sst"

[[fields]]
code = "SSH"
array = "ssh"

[[fields]]
code = "SSS"
array = "sss"

[[fields]]
code = "FRZMLT"
array = "frzmlt"

[[fields]]
code = "UOCN"
array = "uocn"
staggering = "u"
exchange_staggering = "u"

[[fields]]
code = "UICE"
array = "ui"

[lists]
import = ["SST", "SSH", "SSS", "FRZMLT", "UOCN"]
export = ["UICE"]
"#,
    )
    .unwrap()
}

fn window2d() -> Field2d {
    Field2d::new(-2..=LM + 3, -2..=MM + 3, 0.0)
}

fn window3d(nk: usize) -> Field3d {
    Field3d::new(-2..=LM + 3, -2..=MM + 3, nk, 0.0)
}

fn sst(i: i32, j: i32) -> f64 {
    0.5 * f64::from(i) + 0.25 * f64::from(j)
}

fn ssh(i: i32, j: i32) -> f64 {
    f64::from(i - 2 * j)
}

fn ocean_state() -> ModelState {
    let mut temp = window3d(2);
    let mut salt = window3d(2);
    let mut zeta = window2d();
    let mut z = window3d(5);
    let mut hz = window3d(5);
    let mut u = window3d(5);
    let depth = [-20.0, -12.0, -6.0, -3.0, -1.0];
    let thick = [8.0, 6.0, 3.0, 2.0, 2.0];
    let speed = [9.0, 4.0, 3.0, 2.0, 1.0];

    for j in -2..=MM + 3 {
        for i in -2..=LM + 3 {
            temp[(i, j, 2)] = sst(i, j);
            salt[(i, j, 1)] = 34.0;
            salt[(i, j, 2)] = 34.0;
            zeta[(i, j)] = ssh(i, j);
            for k in 1..=5 {
                z[(i, j, k)] = depth[k - 1];
                hz[(i, j, k)] = thick[k - 1];
                u[(i, j, k)] = speed[k - 1];
            }
        }
    }

    let mut state = ModelState::new();
    state
        .insert_3d("temp", temp)
        .insert_3d("salt", salt)
        .insert_3d("z_r", z)
        .insert_3d("Hz", hz)
        .insert_3d("u", u)
        .insert_2d("zeta", zeta)
        .insert_2d("uice", window2d());
    state
}

fn ice_state() -> ModelState {
    let mut ui = window2d();
    for j in -2..=MM + 3 {
        for i in -2..=LM + 3 {
            ui[(i, j)] = if i % 2 == 0 { 2.0 } else { 4.0 };
        }
    }
    let mut state = ModelState::new();
    state.insert_2d("ui", ui);
    for name in ["sst", "ssh", "sss", "frzmlt", "uocn"] {
        state.insert_2d(name, window2d());
    }
    state
}

struct RankOutcome {
    rank: usize,
    bounds: TileBounds,
    reports: Vec<RoundReport>,
    state: ModelState,
}

fn run_rank(comm: Arc<dyn Communicator>) -> RankOutcome {
    let rank = comm.rank();
    let is_ocean = rank < 2;
    let config = if is_ocean { ocean_config() } else { ice_config() };
    let mut state = if is_ocean { ocean_state() } else { ice_state() };

    let mut coupler = Coupler::new(comm);
    coupler.initialize(&config).unwrap();
    assert_eq!(coupler.state(), CouplerState::Ready);
    let bounds = *coupler.context().unwrap().bounds();

    let mut reports = Vec::new();
    for round in 1..=2 {
        if is_ocean && round == 1 {
            let mut frazil = window2d();
            frazil[(2, 2)] = 6.0;
            for _ in 0..3 {
                coupler.accumulate_freeze_melt(&frazil).unwrap();
            }
        }
        reports.push(coupler.exchange(&mut state).unwrap());
        assert!(coupler.context().unwrap().accumulator().is_zero());
    }

    coupler.finalize().unwrap();
    assert_eq!(coupler.state(), CouplerState::Uninitialized);
    RankOutcome {
        rank,
        bounds,
        reports,
        state,
    }
}

fn range_of(report: &RoundReport, code: &str) -> Option<(f64, f64)> {
    report
        .imported
        .iter()
        .find(|s| s.code == code)
        .and_then(|s| s.range)
        .map(|r| (r.min, r.max))
}

#[test]
fn four_ranks_exchange_twice_without_stalling() {
    let handles: Vec<_> = LocalFabric::endpoints(4)
        .into_iter()
        .map(|ep| thread::spawn(move || run_rank(Arc::new(ep))))
        .collect();
    let outcomes: Vec<RankOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for out in &outcomes {
        let b = &out.bounds;
        assert_eq!(out.reports.len(), 2);
        assert_eq!(out.reports[1].round, 2);

        if out.rank < 2 {
            for report in &out.reports {
                assert_eq!(report.skipped, vec![FieldCode::new("SSS").unwrap()]);
                assert_eq!(report.exported.len(), 4);
                assert_eq!(report.imported.len(), 1);
            }
            // 2/4 alternating rho values average to 3 on every u point,
            // tile edges and domain edges included.
            let uice = out.state.array2d("uice").unwrap();
            for j in b.jstr_r()..=b.jend_r() {
                for i in b.istr..=b.iend_r() {
                    assert_eq!(uice[(i, j)], 3.0, "rank {} u({i}, {j})", out.rank);
                }
            }
            continue;
        }

        let s = &out.state;
        for (i, j) in b.extended_points_iter() {
            assert_eq!(s.array2d("sst").unwrap()[(i, j)], sst(i, j));
            assert_eq!(s.array2d("ssh").unwrap()[(i, j)], ssh(i, j));
            assert_eq!(s.array2d("sss").unwrap()[(i, j)], 0.0);
        }
        for j in b.jstr..=b.jend {
            for i in b.istr..=b.iend {
                assert_eq!(s.array2d("uocn").unwrap()[(i, j)], 3.0);
                assert_eq!(s.array2d("frzmlt").unwrap()[(i, j)], -1000.0);
            }
        }

        // Freezing was reported at (2, 2) in round 1 only.
        let holds_point = b.extended_points_iter().any(|p| p == (2, 2));
        let round1 = range_of(&out.reports[0], "FRZMLT").unwrap();
        let round2 = range_of(&out.reports[1], "FRZMLT").unwrap();
        assert_eq!(round1.1, if holds_point { 6.0 } else { -1000.0 });
        assert_eq!(round2, (-1000.0, -1000.0));
    }
}

fn pair_config(model: &str, peer: &str, export: &str, import: &str) -> CouplerConfig {
    CouplerConfig::from_toml_str(&format!(
        r#"
[shared]
service_name = "{model}-pair"

[coupling]
model = "{model}"
peer = "{peer}"
interval_s = 600.0
halo_width = 1
recv_timeout_ms = 5000

[grid]
lm = 4
mm = 4

[[models]]
name = "ocean"
ranks = 1

[[models]]
name = "ice"
ranks = 1

[[fields]]
code = "SSH"
array = "ssh"

[lists]
export = [{export}]
import = [{import}]
"#
    ))
    .unwrap()
}

#[test]
fn lifecycle_guards_hold_across_a_run() {
    let mut endpoints = LocalFabric::endpoints(2);
    let ice_ep = endpoints.pop().unwrap();
    let ocean_ep = endpoints.pop().unwrap();

    let ice = thread::spawn(move || {
        let mut coupler = Coupler::new(Arc::new(ice_ep));
        coupler.initialize(&pair_config("ice", "ocean", "", "\"SSH\"")).unwrap();
        let mut state = ModelState::new();
        state.insert_2d("ssh", Field2d::new(-1..=6, -1..=6, 0.0));
        coupler.exchange(&mut state).unwrap();
        coupler.finalize().unwrap();
        state
    });

    let config = pair_config("ocean", "ice", "\"SSH\"", "");
    let mut coupler = Coupler::new(Arc::new(ocean_ep));
    coupler.initialize(&config).unwrap();
    assert!(matches!(
        coupler.initialize(&config),
        Err(CouplingError::InvalidState { operation: "initialize", .. })
    ));
    assert_eq!(coupler.state(), CouplerState::Ready);

    let mut state = ModelState::new();
    state.insert_2d("ssh", Field2d::new(-1..=6, -1..=6, 0.75));
    coupler.exchange(&mut state).unwrap();
    coupler.finalize().unwrap();
    assert!(matches!(
        coupler.exchange(&mut state),
        Err(CouplingError::InvalidState { operation: "exchange", .. })
    ));

    let ice_state = ice.join().unwrap();
    assert_eq!(ice_state.array2d("ssh").unwrap()[(3, 2)], 0.75);
}

#[test]
fn timed_out_round_leaves_coupler_failed() {
    let mut endpoints = LocalFabric::endpoints(2);
    let ice_ep = endpoints.pop().unwrap();
    let ocean_ep = endpoints.pop().unwrap();

    // The ice side initializes but never joins a round.
    let ice = thread::spawn(move || {
        let mut coupler = Coupler::new(Arc::new(ice_ep));
        coupler.initialize(&pair_config("ice", "ocean", "", "")).unwrap();
        coupler.finalize().unwrap();
    });

    let mut config = pair_config("ocean", "ice", "", "\"SSH\"");
    config.coupling.recv_timeout_ms = 100;
    let mut coupler = Coupler::new(Arc::new(ocean_ep));
    coupler.initialize(&config).unwrap();
    ice.join().unwrap();

    let mut state = ModelState::new();
    state.insert_2d("ssh", Field2d::new(-1..=6, -1..=6, 0.0));
    let err = coupler.exchange(&mut state).unwrap_err();
    assert!(matches!(err, CouplingError::Transport(_)));
    assert!(err.is_fatal());
    assert_eq!(coupler.state(), CouplerState::Failed);

    assert!(matches!(
        coupler.exchange(&mut state),
        Err(CouplingError::InvalidState { operation: "exchange", .. })
    ));
    coupler.finalize().unwrap();
    assert_eq!(coupler.state(), CouplerState::Uninitialized);
}

#[test]
fn unknown_list_code_fails_initialize() {
    let ep = LocalFabric::endpoints(2).remove(0);
    let mut coupler = Coupler::new(Arc::new(ep));
    let err = coupler
        .initialize(&pair_config("ocean", "ice", "\"NOPE\"", ""))
        .unwrap_err();
    assert!(matches!(err, CouplingError::UnknownField { ref code, list: "export" } if code == "NOPE"));
    assert_eq!(coupler.state(), CouplerState::Uninitialized);
}

#[test]
fn loopback_round_trip_is_exact() {
    let domain = GridDomain::new(6, 5, 1, 1, false, false).unwrap();
    let bounds = domain.tile(0, 0).unwrap();
    let map = GlobalSegMap::from_tile(&domain, &bounds);
    let router = Router::from_maps(0, &map, &[(0, map.clone())]).unwrap();

    let comm: Arc<dyn Communicator> = Arc::new(LocalFabric::endpoints(1).remove(0));
    let boundary = TileBoundary::new(comm.clone(), domain, 0, 0, 1, Duration::from_secs(1)).unwrap();
    let adapter = FieldAdapter::new(
        0,
        bounds,
        1,
        VerticalSection::default(),
        ThermoParams::default(),
        600.0,
    );
    let field = |array: &str| FieldDescriptor {
        code: FieldCode::new("SSH").unwrap(),
        array: array.to_string(),
        staggering: Staggering::Rho,
        exchange_staggering: Staggering::Rho,
        scale: 1.0,
        offset: 0.0,
        valid_min: None,
        valid_max: None,
        derivation: Derivation::Direct,
        membership: Default::default(),
        observed: None,
    };

    let mut source = Field2d::for_tile(&bounds, 1);
    for (i, j) in bounds.extended_points_iter() {
        source[(i, j)] = (f64::from(i) * 0.3).sin() + f64::from(j) / 7.0;
    }
    let mut sender = ModelState::new();
    sender.insert_2d("zeta", source.clone());
    let mut receiver = ModelState::new();
    receiver.insert_2d("ssh", Field2d::for_tile(&bounds, 1));

    let codes = vec![FieldCode::new("SSH").unwrap()];
    let mut outbound = AttrVect::new(codes.clone(), map.lsize());
    let mut inbound = AttrVect::new(codes, map.lsize());
    let mut acc = FreezeMeltAccumulator::new(&bounds, 1, 1);

    adapter
        .export(&mut field("zeta"), outbound.column_mut(0), &sender, &mut acc, &boundary)
        .unwrap();
    let engine = TransferEngine::new(Duration::from_secs(1));
    engine.send(comm.as_ref(), &outbound, &router, 1).unwrap();
    engine.receive(comm.as_ref(), &mut inbound, &router, 1).unwrap();
    adapter
        .import(&mut field("ssh"), inbound.column(0), &mut receiver, &boundary)
        .unwrap();

    let received = receiver.array2d("ssh").unwrap();
    for (i, j) in bounds.extended_points_iter() {
        assert_eq!(received[(i, j)].to_bits(), source[(i, j)].to_bits());
    }
}
