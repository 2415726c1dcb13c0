//! Planner throughput benchmark

use cachewatch::geo::Coordinate;
use cachewatch::monitor::{planner, AllPeersLive, PlannerConfig};
use cachewatch::topology::{Assignment, MonitorEntry, MonitorStatus, Topology};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn build_fleet(monitors: usize, cache_groups: usize) -> (Topology, Assignment) {
    let mut topology = Topology::default();

    for i in 0..monitors {
        topology.monitors.insert(
            format!("tm{i:03}"),
            MonitorEntry {
                base_url: format!("http://10.0.0.{}:8080", i % 250 + 1),
                status: MonitorStatus::Online,
                coordinate: Some(Coordinate::new(
                    25.0 + (i % 5) as f64 * 5.0,
                    -120.0 + (i % 12) as f64 * 6.0,
                )),
            },
        );
    }

    let mut assignment = Assignment::new();
    for i in 0..cache_groups {
        let name = format!("cg{i:04}");
        topology.cache_groups.insert(
            name.clone(),
            Some(Coordinate::new(
                25.0 + (i % 7) as f64 * 4.0,
                -120.0 + (i % 17) as f64 * 4.0,
            )),
        );
        // Seed ownership round-robin so planning exercises the steal path,
        // not just cold-start claiming.
        let owner = format!("tm{:03}", i % monitors);
        assignment.entry(owner).or_insert_with(Vec::new).push(name);
    }

    (topology, assignment)
}

fn bench_plan(c: &mut Criterion) {
    let config = PlannerConfig {
        near_km: 1000.0,
        min_steal: 1,
    };

    let mut group = c.benchmark_group("plan");
    for (monitors, cache_groups) in [(5, 100), (20, 500), (50, 2000)] {
        let (topology, assignment) = build_fleet(monitors, cache_groups);
        group.throughput(Throughput::Elements(cache_groups as u64));
        group.bench_function(format!("{monitors}m_{cache_groups}cg"), |b| {
            b.iter(|| {
                let outcome = planner::plan(
                    black_box("tm000"),
                    black_box(&topology),
                    black_box(&assignment),
                    &AllPeersLive,
                    &config,
                )
                .unwrap();
                black_box(outcome)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_plan);
criterion_main!(benches);
