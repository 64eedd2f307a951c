//! Single-process demonstration driver: wires a [`Consumer`] and its
//! [`Aggregator`]s into a discrete-event loop and runs one scenario
//! end-to-end, driving producers (out of scope per the core, §1) as
//! trivial always-reply stubs.
//!
//! Usage: `cfnagg-sim <config-file> [log-dir]`

use std::cell::RefCell;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::rc::Rc;

use cfnagg::config::Config;
use cfnagg::face::{Clock, DataPacket, Duration, EventHandle, Face, Interest, Nack, ScheduledCallback, Time};
use cfnagg::logsink::{FileLogSink, LogSink, NullLogSink};
use cfnagg::node::{Aggregator, Consumer, NodeContext};
use cfnagg::tree::TreeBuilder;
use cfnagg::wire::{InterestKind, ModelData, Name};

const PARAMETER_COUNT: usize = 3000;

/// Demo scenario: a ring of producers behind a consumer, sized larger than
/// any one aggregator's fan-out so the tree always needs more than one.
const DEMO_PRODUCER_COUNT: usize = 12;

fn main() {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| {
        eprintln!("usage: cfnagg-sim <config-file> [log-dir]");
        std::process::exit(2);
    });
    let log_dir = args.next();

    let text = std::fs::read_to_string(&config_path).unwrap_or_else(|err| {
        eprintln!("failed to read {config_path}: {err}");
        std::process::exit(1);
    });
    let config = Config::parse(&text).unwrap_or_else(|err| {
        eprintln!("invalid config {config_path}: {err}");
        std::process::exit(1);
    });

    let producer_count = DEMO_PRODUCER_COUNT;
    let exit_code = match log_dir {
        Some(dir) => {
            let sink = FileLogSink::new(dir).expect("create log directory");
            run(config, producer_count, sink)
        }
        None => run(config, producer_count, NullLogSink),
    };
    std::process::exit(exit_code);
}

/// A ring topology with unit hop costs, mirroring the scenario in §8.5.
fn ring_cost(a: &str, b: &str, n: usize) -> Option<i64> {
    let idx = |s: &str| s.trim_start_matches('p').parse::<i64>().ok();
    let (x, y) = (idx(a)?, idx(b)?);
    let diff = (x - y).abs();
    Some(diff.min(n as i64 - diff))
}

fn run(config: Config, producer_count: usize, log: impl LogSink + 'static) -> i32 {
    if config.fan_out == 0 {
        eprintln!("tree construction failed: fan-out constraint must be positive");
        return 1;
    }

    let leaves: Vec<String> = (0..producer_count).map(|i| format!("p{i}")).collect();
    let aggregator_count = producer_count.div_ceil(config.fan_out);
    let aggregators: Vec<String> = (0..aggregator_count).map(|i| format!("agg{i}")).collect();

    let tree = match TreeBuilder::build("consumer", &leaves, &aggregators, config.fan_out, |a, b| {
        ring_cost(a, b, producer_count)
    }) {
        Ok(tree) => tree,
        Err(err) => {
            eprintln!("tree construction failed: {err}");
            return 1;
        }
    };

    let shared_clock = Rc::new(RefCell::new(ClockState::default()));
    let shared_router = Rc::new(RefCell::new(RouterState::default()));
    let producer_ids: HashSet<String> = leaves.iter().cloned().collect();

    let mut sim = Simulator {
        clock: shared_clock.clone(),
        router: shared_router.clone(),
        producer_ids,
        parameter_count: PARAMETER_COUNT,
        consumer_id: "consumer".to_owned(),
        consumer: Consumer::new(
            NodeContext::new("consumer", config.clone(), PARAMETER_COUNT),
            tree,
            producer_count,
        ),
        aggregators: HashMap::new(),
        log: Box::new(log),
        fatal: false,
    };

    for agg_id in &aggregators {
        let ctx = NodeContext::new(agg_id.clone(), config.clone(), PARAMETER_COUNT);
        // Each aggregator learns the slice of the tree rooted at itself
        // from the (externally loaded) topology; here that's just its own
        // id's fan-out-sized share of leaves.
        let served: Vec<String> = leaves
            .iter()
            .filter(|leaf| aggregator_for(leaf, &aggregators, config.fan_out) == *agg_id)
            .cloned()
            .collect();
        let child_to_leaves = served.iter().map(|leaf| (leaf.clone(), vec![leaf.clone()])).collect();
        sim.aggregators.insert(agg_id.clone(), Aggregator::new(ctx, child_to_leaves));
    }

    let mut consumer_clock = sim.node_clock(&sim.consumer_id);
    let mut consumer_router = sim.node_router(&sim.consumer_id);
    sim.consumer.start(&mut consumer_router, &mut consumer_clock);
    sim.drain_outbox();

    loop {
        if sim.fatal || sim.consumer.is_stopped() {
            break;
        }
        let Some(timer) = sim.clock.borrow_mut().pop_ready() else { break };
        sim.clock.borrow_mut().now = timer.at;
        sim.fire_timer(timer);
        sim.drain_outbox();
    }

    if sim.fatal {
        2
    } else {
        0
    }
}

fn aggregator_for(leaf: &str, aggregators: &[String], fan_out: usize) -> String {
    let idx: usize = leaf.trim_start_matches('p').parse().unwrap_or(0);
    aggregators[(idx / fan_out).min(aggregators.len() - 1)].clone()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    RetransmissionSweep,
    SendNext,
}

#[derive(Debug, Clone)]
struct Timer {
    at: Time,
    seq: u64,
    node: String,
    kind: TimerKind,
    handle: u64,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for Timer {}
impl Ord for Timer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest (at, seq) pops first.
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}
impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct ClockState {
    now: Time,
    events: BinaryHeap<Timer>,
    next_seq: u64,
    next_handle: u64,
    cancelled: HashSet<u64>,
}

impl ClockState {
    fn pop_ready(&mut self) -> Option<Timer> {
        loop {
            let timer = self.events.pop()?;
            if self.cancelled.remove(&timer.handle) {
                continue;
            }
            return Some(timer);
        }
    }
}

/// Per-node handle onto the shared event queue; `node` disambiguates whose
/// retransmission sweep / send slot a fired timer belongs to, since
/// [`ScheduledCallback`] itself carries no node identity.
struct NodeClock {
    node: String,
    shared: Rc<RefCell<ClockState>>,
}

impl Clock for NodeClock {
    fn now(&self) -> Time {
        self.shared.borrow().now
    }

    fn schedule(&mut self, delay: Duration, callback: ScheduledCallback) -> EventHandle {
        let mut state = self.shared.borrow_mut();
        let at = state.now + delay;
        let seq = state.next_seq;
        state.next_seq += 1;
        let handle = state.next_handle;
        state.next_handle += 1;
        let kind = match callback {
            ScheduledCallback::RetransmissionSweep => TimerKind::RetransmissionSweep,
            ScheduledCallback::SendNext => TimerKind::SendNext,
        };
        state.events.push(Timer { at, seq, node: self.node.clone(), kind, handle });
        EventHandle(handle)
    }

    fn cancel(&mut self, handle: EventHandle) {
        self.shared.borrow_mut().cancelled.insert(handle.0);
    }
}

enum Delivery {
    Interest { to: String, interest: Interest },
    Data { to: String, data: DataPacket },
    Nack { to: String, nack: Nack },
}

#[derive(Default)]
struct RouterState {
    /// Sub-interest name -> node that sent it, so the matching data packet
    /// (which carries the same name) routes back to the right sender; a
    /// minimal stand-in for a forwarder's pending-interest table.
    pit: HashMap<Name, String>,
    outbox: VecDeque<Delivery>,
}

struct NodeRouter {
    node: String,
    shared: Rc<RefCell<RouterState>>,
}

impl Face for NodeRouter {
    fn send_interest(&mut self, interest: Interest) {
        let mut state = self.shared.borrow_mut();
        state.pit.insert(interest.name.clone(), self.node.clone());
        let to = interest.name.destination().unwrap_or_default().to_owned();
        state.outbox.push_back(Delivery::Interest { to, interest });
    }

    fn send_data(&mut self, data: DataPacket) {
        let mut state = self.shared.borrow_mut();
        if let Some(to) = state.pit.remove(&data.name) {
            state.outbox.push_back(Delivery::Data { to, data });
        }
    }
}

struct Simulator {
    clock: Rc<RefCell<ClockState>>,
    router: Rc<RefCell<RouterState>>,
    producer_ids: HashSet<String>,
    parameter_count: usize,
    consumer_id: String,
    consumer: Consumer,
    aggregators: HashMap<String, Aggregator>,
    log: Box<dyn LogSink>,
    fatal: bool,
}

/// Builds a [`NodeClock`]/[`NodeRouter`] pair from just the shared cells
/// they wrap, so constructing one never needs to borrow all of
/// [`Simulator`] - only the specific field the caller already holds.
fn make_clock(shared: &Rc<RefCell<ClockState>>, node: &str) -> NodeClock {
    NodeClock { node: node.to_owned(), shared: shared.clone() }
}

fn make_router(shared: &Rc<RefCell<RouterState>>, node: &str) -> NodeRouter {
    NodeRouter { node: node.to_owned(), shared: shared.clone() }
}

impl Simulator {
    fn node_clock(&self, node: &str) -> NodeClock {
        make_clock(&self.clock, node)
    }

    fn node_router(&self, node: &str) -> NodeRouter {
        make_router(&self.router, node)
    }

    fn fire_timer(&mut self, timer: Timer) {
        let mut clock = make_clock(&self.clock, &timer.node);
        if timer.node == self.consumer_id {
            match timer.kind {
                TimerKind::RetransmissionSweep => self.consumer.on_retransmission_sweep(&mut clock, &mut *self.log),
                TimerKind::SendNext => {
                    let mut router = make_router(&self.router, &timer.node);
                    self.consumer.on_send_slot(&mut router, &mut clock);
                }
            }
        } else if let Some(agg) = self.aggregators.get_mut(&timer.node) {
            match timer.kind {
                TimerKind::RetransmissionSweep => agg.on_retransmission_sweep(&mut clock, &mut *self.log),
                TimerKind::SendNext => {
                    let mut router = make_router(&self.router, &timer.node);
                    agg.on_send_slot(&mut router, &mut clock);
                }
            }
        }
    }

    fn drain_outbox(&mut self) {
        loop {
            let delivery = self.router.borrow_mut().outbox.pop_front();
            let Some(delivery) = delivery else { break };
            self.dispatch(delivery);
        }
    }

    fn dispatch(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Interest { to, interest } => self.dispatch_interest(to, interest),
            Delivery::Data { to, data } => self.dispatch_data(to, data),
            Delivery::Nack { to, nack } => self.dispatch_nack(to, nack),
        }
    }

    fn dispatch_interest(&mut self, to: String, interest: Interest) {
        if let Some(agg) = self.aggregators.get_mut(&to) {
            let mut clock = make_clock(&self.clock, &to);
            match interest.name.kind() {
                Some(InterestKind::Initialization) => {
                    let mut router = make_router(&self.router, &to);
                    agg.on_initialization(&interest, &mut router, &mut clock);
                }
                _ => {
                    if let Err(err) = agg.on_interest(interest, &mut clock) {
                        if err.is_fatal() {
                            tracing::error!(%err, node = %to, "fatal error, stopping simulation");
                            self.fatal = true;
                        }
                    }
                }
            }
        } else if self.producer_ids.contains(&to) {
            // Producers are external (§1): reply immediately with a fixed
            // vector and no congestion signal.
            if let Some(sender) = self.router.borrow_mut().pit.remove(&interest.name) {
                let payload = ModelData { parameters: vec![1.0; self.parameter_count], congested_nodes: vec![] };
                self.router.borrow_mut().outbox.push_back(Delivery::Data {
                    to: sender,
                    data: DataPacket {
                        name: interest.name,
                        payload: payload.serialize(),
                        freshness: 0,
                        congestion_mark: None,
                    },
                });
            }
        } else if let Some(sender) = self.router.borrow_mut().pit.remove(&interest.name) {
            // No route to `to`: nack the sender instead of dropping silently.
            self.router.borrow_mut().outbox.push_back(Delivery::Nack {
                to: sender,
                nack: Nack { reason: format!("no route to {to}"), interest },
            });
        }
    }

    fn dispatch_nack(&mut self, to: String, nack: Nack) {
        if to == self.consumer_id {
            self.consumer.on_nack(nack);
        } else if let Some(agg) = self.aggregators.get_mut(&to) {
            agg.on_nack(nack);
        }
    }

    fn dispatch_data(&mut self, to: String, data: DataPacket) {
        let mut clock = make_clock(&self.clock, &to);
        if to == self.consumer_id {
            self.consumer.on_data(data, &mut clock, &mut *self.log);
        } else if let Some(agg) = self.aggregators.get_mut(&to) {
            let mut router = make_router(&self.router, &to);
            agg.on_data(data, &mut router, &mut clock, &mut *self.log);
        }
    }
}
