//! End-to-end scenarios driving a consumer, one aggregator and a pair of
//! stub producers through the public node API, exercising the pieces
//! (pipeline, flow control, retransmission, aggregation) together rather
//! than in isolation.

use std::collections::HashMap;

use cfnagg::config::Config;
use cfnagg::face::{Clock, DataPacket, Duration, EventHandle, Face, Interest, ScheduledCallback, Time};
use cfnagg::logsink::{LogSink, NullLogSink};
use cfnagg::node::{Aggregator, Consumer, NodeContext};
use cfnagg::tree::{RoundMap, Tree, TreeBuilder};
use cfnagg::wire::{InterestKind, ModelData, Name};

fn config(fan_out: usize, iterations: u64) -> Config {
    Config::parse(&format!(
        "
        Constraint: {fan_out}
        Window: 1
        Alpha: 0.5
        Beta: 0.6
        Gamma: 0.7
        EWMAFactor: 0.3
        ThresholdFactor: 1.2
        UseCwa: true
        InterestQueue: 100
        QueueSize: 100
        Iteration: {iterations}
        "
    ))
    .unwrap()
}

#[derive(Default)]
struct RoutingFace {
    interests: Vec<Interest>,
    data: Vec<DataPacket>,
}

impl Face for RoutingFace {
    fn send_interest(&mut self, interest: Interest) {
        self.interests.push(interest);
    }
    fn send_data(&mut self, data: DataPacket) {
        self.data.push(data);
    }
}

#[derive(Default)]
struct FixedClock {
    now: Time,
}

impl Clock for FixedClock {
    fn now(&self) -> Time {
        self.now
    }
    fn schedule(&mut self, _delay: Duration, _callback: ScheduledCallback) -> EventHandle {
        EventHandle(0)
    }
    fn cancel(&mut self, _handle: EventHandle) {}
}

/// Counts how many times a run's throughput was persisted, so a scenario
/// can assert it happened exactly once per node.
#[derive(Default)]
struct CountingLog {
    throughput_calls: u32,
}

impl LogSink for CountingLog {
    fn record_rto(&mut self, _node: &str, _flow: &str, _t: Time, _rto: Duration) {}
    fn record_rtt(&mut self, _node: &str, _flow: &str, _t: Time, _seq: u64, _ecn: bool, _threshold: Duration, _rtt: Duration) {}
    fn record_window(&mut self, _node: &str, _flow: &str, _t: Time, _cwnd: f64) {}
    fn record_aggregation_time(&mut self, _node: &str, _t: Time, _agg_time: Duration) {}
    fn record_throughput(&mut self, _interest_bytes: u64, _data_bytes: u64, _fan_in: usize, _t_start: Time, _t_end: Time) {
        self.throughput_calls += 1;
    }
}

/// One consumer aggregator, two leaves: `consumer -> agg0 -> {p0, p1}`.
fn two_leaf_tree() -> Tree {
    let mut round0 = HashMap::new();
    round0.insert("consumer".to_owned(), vec!["agg0".to_owned()]);
    round0.insert("agg0".to_owned(), vec!["p0".to_owned(), "p1".to_owned()]);
    Tree {
        rounds: vec![RoundMap::new(round0)],
        broadcast_list: vec!["agg0".to_owned()],
    }
}

fn initialization_reply(consumer: &mut Consumer, clock: &mut FixedClock, log: &mut impl LogSink) {
    consumer.on_data(
        DataPacket {
            name: Name::sub_interest("agg0", &[], InterestKind::Initialization, 0),
            payload: ModelData::zeros(0).serialize(),
            freshness: 0,
            congestion_mark: None,
        },
        clock,
        log,
    );
}

/// Repeatedly drains send slots on both nodes and feeds synthetic producer
/// replies through until the consumer reports every iteration complete.
fn drive_to_completion(
    consumer: &mut Consumer,
    agg: &mut Aggregator,
    clock: &mut FixedClock,
    consumer_log: &mut impl LogSink,
    agg_log: &mut impl LogSink,
) {
    const DRAIN_ATTEMPTS: usize = 16;
    let mut ticks = 0;
    while !consumer.is_stopped() {
        ticks += 1;
        assert!(ticks < 10_000, "simulation did not converge");
        clock.now += 1;

        let mut to_agg = RoutingFace::default();
        for _ in 0..DRAIN_ATTEMPTS {
            consumer.on_send_slot(&mut to_agg, clock);
        }
        for interest in to_agg.interests.drain(..) {
            agg.on_interest(interest, clock).unwrap();
        }

        let mut to_producers = RoutingFace::default();
        for _ in 0..DRAIN_ATTEMPTS {
            agg.on_send_slot(&mut to_producers, clock);
        }

        let mut to_agg_data = RoutingFace::default();
        for interest in to_producers.interests.drain(..) {
            let payload = ModelData { parameters: vec![1.0, 1.0], congested_nodes: vec![] };
            agg.on_data(
                DataPacket { name: interest.name.clone(), payload: payload.serialize(), freshness: 0, congestion_mark: None },
                &mut to_agg_data,
                clock,
                agg_log,
            );
        }

        for data in to_agg_data.data.drain(..) {
            consumer.on_data(data, clock, consumer_log);
        }
    }
}

#[test]
fn two_producer_single_aggregator_completes_with_no_loss() {
    let ctx = NodeContext::new("consumer", config(2, 1), 2);
    let mut consumer = Consumer::new(ctx, two_leaf_tree(), 2);
    let agg_ctx = NodeContext::new("agg0", config(2, 1), 2);
    let mut agg = Aggregator::new(
        agg_ctx,
        vec![("p0".to_owned(), vec!["p0".to_owned()]), ("p1".to_owned(), vec!["p1".to_owned()])],
    );
    let mut clock = FixedClock::default();
    let mut log = NullLogSink;

    consumer.start(&mut RoutingFace::default(), &mut clock);
    agg.on_initialization(
        &Interest { name: Name::sub_interest("agg0", &[], InterestKind::Initialization, 0), nonce: 0, lifetime: 0 },
        &mut RoutingFace::default(),
        &mut clock,
    );
    initialization_reply(&mut consumer, &mut clock, &mut log);

    let mut to_agg = RoutingFace::default();
    consumer.on_send_slot(&mut to_agg, &mut clock);
    assert_eq!(to_agg.interests.len(), 1);
    agg.on_interest(to_agg.interests.remove(0), &mut clock).unwrap();

    let mut to_producers = RoutingFace::default();
    agg.on_send_slot(&mut to_producers, &mut clock);
    agg.on_send_slot(&mut to_producers, &mut clock);
    assert_eq!(to_producers.interests.len(), 2);

    let payloads: HashMap<&str, ModelData> = [
        ("p0", ModelData { parameters: vec![1.0, 2.0], congested_nodes: vec![] }),
        ("p1", ModelData { parameters: vec![3.0, 4.0], congested_nodes: vec![] }),
    ]
    .into_iter()
    .collect();

    let mut to_agg_data = RoutingFace::default();
    for interest in &to_producers.interests {
        let leaf = interest.name.destination().unwrap();
        let payload = payloads.get(leaf).unwrap();
        agg.on_data(
            DataPacket { name: interest.name.clone(), payload: payload.serialize(), freshness: 0, congestion_mark: None },
            &mut to_agg_data,
            &mut clock,
            &mut log,
        );
    }
    assert_eq!(to_agg_data.data.len(), 1, "aggregator relays exactly one combined reply upstream");

    consumer.on_data(to_agg_data.data.remove(0), &mut clock, &mut log);

    assert_eq!(consumer.completed_iterations(), 1);
    assert!(consumer.is_stopped());
    assert_eq!(consumer.last_result(), Some(&[2.0, 3.0][..]));
}

#[test]
fn fifty_iteration_run_persists_throughput_exactly_once_per_node() {
    let ctx = NodeContext::new("consumer", config(2, 50), 2);
    let mut consumer = Consumer::new(ctx, two_leaf_tree(), 2);
    let agg_ctx = NodeContext::new("agg0", config(2, 50), 2);
    let mut agg = Aggregator::new(
        agg_ctx,
        vec![("p0".to_owned(), vec!["p0".to_owned()]), ("p1".to_owned(), vec!["p1".to_owned()])],
    );
    let mut clock = FixedClock::default();
    let mut consumer_log = CountingLog::default();
    let mut agg_log = CountingLog::default();

    consumer.start(&mut RoutingFace::default(), &mut clock);
    agg.on_initialization(
        &Interest { name: Name::sub_interest("agg0", &[], InterestKind::Initialization, 0), nonce: 0, lifetime: 0 },
        &mut RoutingFace::default(),
        &mut clock,
    );
    initialization_reply(&mut consumer, &mut clock, &mut consumer_log);

    drive_to_completion(&mut consumer, &mut agg, &mut clock, &mut consumer_log, &mut agg_log);

    assert_eq!(consumer.completed_iterations(), 50);
    assert_eq!(consumer_log.throughput_calls, 1);
    assert_eq!(agg_log.throughput_calls, 1);
}

#[test]
fn timed_out_interest_is_retransmitted_with_the_same_name() {
    let ctx = NodeContext::new("consumer", config(2, 1), 3);
    let mut consumer = Consumer::new(ctx, two_leaf_tree(), 2);
    let mut clock = FixedClock::default();
    let mut log = NullLogSink;

    consumer.start(&mut RoutingFace::default(), &mut clock);
    initialization_reply(&mut consumer, &mut clock, &mut log);

    let mut first = RoutingFace::default();
    consumer.on_send_slot(&mut first, &mut clock);
    assert_eq!(first.interests.len(), 1);
    let first_name = first.interests[0].name.clone();

    // the flow has no RTT sample yet, so its RTO is 0: any elapsed time trips the sweep.
    clock.now += 1;
    consumer.on_retransmission_sweep(&mut clock, &mut log);

    let mut retry = RoutingFace::default();
    consumer.on_send_slot(&mut retry, &mut clock);
    assert_eq!(retry.interests.len(), 1);
    assert_eq!(retry.interests[0].name, first_name);
    assert_eq!(consumer.completed_iterations(), 0);
}

#[test]
fn duplicate_upstream_interest_is_dropped_after_a_retransmission() {
    let ctx = NodeContext::new("agg0", config(2, 1), 3);
    let children = vec![("p0".to_owned(), vec!["p0".to_owned()]), ("p1".to_owned(), vec!["p1".to_owned()])];
    let mut agg = Aggregator::new(ctx, children);
    let mut clock = FixedClock::default();
    let mut log = NullLogSink;

    agg.on_initialization(
        &Interest { name: Name::sub_interest("agg0", &[], InterestKind::Initialization, 0), nonce: 0, lifetime: 0 },
        &mut RoutingFace::default(),
        &mut clock,
    );

    let upstream = Interest {
        name: Name::sub_interest("agg0", &["p0".to_owned(), "p1".to_owned()], InterestKind::Data, 0),
        nonce: 0,
        lifetime: 0,
    };
    agg.on_interest(upstream.clone(), &mut clock).unwrap();

    let mut to_producers = RoutingFace::default();
    agg.on_send_slot(&mut to_producers, &mut clock);
    agg.on_send_slot(&mut to_producers, &mut clock);
    assert_eq!(to_producers.interests.len(), 2);

    clock.now += 1;
    agg.on_retransmission_sweep(&mut clock, &mut log);

    // the forwarder redelivers the same upstream interest a second time.
    agg.on_interest(upstream, &mut clock).unwrap();

    let mut drained = RoutingFace::default();
    for _ in 0..4 {
        agg.on_send_slot(&mut drained, &mut clock);
    }
    assert_eq!(
        drained.interests.len(),
        2,
        "the duplicate re-delivery must not split into a second pair of sub-interests"
    );
}

#[test]
fn local_rtt_spike_after_warm_up_marks_the_aggregator_congested() {
    let ctx = NodeContext::new("agg0", config(1, 20), 2);
    let mut agg = Aggregator::new(ctx, vec![("p0".to_owned(), vec!["p0".to_owned()])]);
    let mut clock = FixedClock::default();
    let mut log = NullLogSink;

    agg.on_initialization(
        &Interest { name: Name::sub_interest("agg0", &[], InterestKind::Initialization, 0), nonce: 0, lifetime: 0 },
        &mut RoutingFace::default(),
        &mut clock,
    );

    let mut last_forwarded = None;
    for seq in 0..11u64 {
        let upstream = Interest {
            name: Name::sub_interest("agg0", &["p0".to_owned()], InterestKind::Data, seq),
            nonce: 0,
            lifetime: 0,
        };
        agg.on_interest(upstream, &mut clock).unwrap();

        let mut to_p0 = RoutingFace::default();
        agg.on_send_slot(&mut to_p0, &mut clock);
        assert_eq!(to_p0.interests.len(), 1);
        let sub = to_p0.interests.remove(0);

        let rtt: Duration = if seq < 10 { 100 } else { 5_000 };
        clock.now += rtt;

        let mut to_consumer = RoutingFace::default();
        let data = ModelData { parameters: vec![1.0, 2.0], congested_nodes: vec![] };
        agg.on_data(
            DataPacket { name: sub.name, payload: data.serialize(), freshness: 0, congestion_mark: None },
            &mut to_consumer,
            &mut clock,
            &mut log,
        );
        last_forwarded = to_consumer.data.pop();
        clock.now += 10;
    }

    let forwarded = last_forwarded.expect("every iteration relays exactly one reply");
    let payload = ModelData::deserialize(forwarded.payload, 2).unwrap();
    assert!(
        payload.congested_nodes.contains(&"agg0".to_owned()),
        "a reply far above the warmed-up RTT threshold must mark this aggregator as locally congested"
    );
}

#[test]
fn six_leaf_ring_tree_wires_into_a_working_consumer() {
    let leaves: Vec<String> = (0..6).map(|i| format!("p{i}")).collect();
    let aggregators = vec!["agg0".to_owned(), "agg1".to_owned()];
    let ring_cost = |a: &str, b: &str| {
        let idx = |s: &str| s.trim_start_matches('p').parse::<i64>().unwrap();
        let (x, y) = (idx(a), idx(b));
        let diff = (x - y).abs();
        Some(diff.min(6 - diff))
    };
    let tree = TreeBuilder::build("consumer", &leaves, &aggregators, 3, ring_cost).unwrap();

    let covered: std::collections::HashSet<String> = tree.rounds[0]
        .children_of("consumer")
        .iter()
        .flat_map(|agg| tree.rounds[0].children_of(agg).to_vec())
        .collect();
    assert_eq!(covered, leaves.into_iter().collect());

    let ctx = NodeContext::new("consumer", config(3, 1), 3);
    let mut consumer = Consumer::new(ctx, tree, 6);
    let mut face = RoutingFace::default();
    let mut clock = FixedClock::default();
    consumer.start(&mut face, &mut clock);

    assert_eq!(face.interests.len(), 2, "every intermediate aggregator must receive an initialization interest");
}
