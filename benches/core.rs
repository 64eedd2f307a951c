use bytes::Bytes;
use cfnagg::flow::{CongestionEvent, FlowConfig, FlowController};
use cfnagg::tree::TreeBuilder;
use cfnagg::wire::ModelData;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

fn ring_cost(a: &str, b: &str, n: usize) -> Option<i64> {
    let idx = |s: &str| s.trim_start_matches('p').parse::<i64>().unwrap();
    let (x, y) = (idx(a), idx(b));
    let diff = (x - y).abs();
    Some(diff.min(n as i64 - diff))
}

fn wire_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_round_trip");
    for p in [64usize, 3_000] {
        let data = ModelData {
            parameters: vec![1.0; p],
            congested_nodes: vec!["agg0".to_owned(), "agg1".to_owned()],
        };
        let bytes = data.serialize();

        group.bench_with_input(BenchmarkId::new("serialize", p), &data, |b, data| {
            b.iter(|| data.serialize());
        });
        group.bench_with_input(BenchmarkId::new("deserialize", p), &bytes, |b, bytes| {
            b.iter(|| ModelData::deserialize(Bytes::clone(bytes), p).unwrap());
        });
    }
    group.finish();
}

fn tree_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_construction");
    for n in [12usize, 96] {
        let leaves: Vec<String> = (0..n).map(|i| format!("p{i}")).collect();
        let aggregators: Vec<String> = (0..n.div_ceil(4)).map(|i| format!("agg{i}")).collect();

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| TreeBuilder::build("consumer", &leaves, &aggregators, 4, |a, b| ring_cost(a, b, n)).unwrap());
        });
    }
    group.finish();
}

fn flow_controller_sample(c: &mut Criterion) {
    c.bench_function("flow_controller_on_sample", |b| {
        b.iter(|| {
            let mut flow = FlowController::new(FlowConfig::aggregator_default(4));
            for rtt in [100, 120, 95, 150, 80, 400] {
                flow.on_sample(rtt);
                if flow.is_local_congestion(rtt) {
                    flow.on_congestion_event(CongestionEvent::LocalCongestion, rtt);
                } else {
                    flow.on_congestion_free_reply();
                }
            }
        });
    });
}

criterion_group!(benches, wire_round_trip, tree_construction, flow_controller_sample);
criterion_main!(benches);
