//! Transfer round benchmarks.
//!
//! One send plus receive of a five-field attribute vector through a
//! loopback router, for several tile sizes.

use std::hint::black_box;
use std::time::Duration;

use cpl_common::field_code::FieldCode;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use cpl_coupler::attrvect::AttrVect;
use cpl_coupler::grid::GridDomain;
use cpl_coupler::gsmap::GlobalSegMap;
use cpl_coupler::router::Router;
use cpl_coupler::transfer::TransferEngine;
use cpl_coupler::transport::local::LocalFabric;
use cpl_coupler::vertical::scan_mixed_layer;

const CODES: [&str; 5] = ["SST", "SSS", "SSH", "FRZMLT", "UOCN"];

fn bench_transfer_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer_round");
    for n in [32usize, 128, 512] {
        let domain = GridDomain::new(n, n, 1, 1, false, false).unwrap();
        let bounds = domain.tile(0, 0).unwrap();
        let map = GlobalSegMap::from_tile(&domain, &bounds);
        let router = Router::from_maps(0, &map, &[(0, map.clone())]).unwrap();
        let codes: Vec<FieldCode> = CODES.iter().map(|c| FieldCode::new(c).unwrap()).collect();
        let mut outbound = AttrVect::new(codes.clone(), map.lsize());
        let mut inbound = AttrVect::new(codes, map.lsize());
        for f in 0..outbound.nfields() {
            outbound
                .column_mut(f)
                .iter_mut()
                .enumerate()
                .for_each(|(p, v)| *v = p as f64 * 0.5);
        }

        let comm = LocalFabric::endpoints(1).remove(0);
        let engine = TransferEngine::new(Duration::from_secs(1));
        let mut round = 0;

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                round += 1;
                engine.send(&comm, black_box(&outbound), &router, round).unwrap();
                engine.receive(&comm, &mut inbound, &router, round).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_mixed_layer_scan(c: &mut Criterion) {
    let z: Vec<f64> = (1..=60).map(|k| -f64::from(k).powf(1.5)).collect();
    c.bench_function("mixed_layer_scan_60_levels", |b| {
        b.iter(|| scan_mixed_layer(black_box(&z), black_box(-150.0)));
    });
}

criterion_group!(benches, bench_transfer_round, bench_mixed_layer_scan);
criterion_main!(benches);
