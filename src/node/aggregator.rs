//! Aggregator role (C8): an intermediate node that fans an upstream
//! interest out to its own children, aggregates their replies, and relays
//! a single combined reply upstream.
//!
//! Lifecycle (§4.8): `listen for initialization -> learn aggregation_map
//! -> reply immediately with empty data -> steady state`.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::aggregation::{AggregatorIterationState, IterationTable};
use crate::dedup::DuplicateSuppressionFifo;
use crate::error::{Error, Result};
use crate::face::{Clock, DataPacket, Face, Interest, Nack, ScheduledCallback, Time};
use crate::flow::{CongestionEvent, FlowConfig, FlowController};
use crate::logsink::LogSink;
use crate::node::NodeContext;
use crate::pipeline::{self, InterestQueue, QueuedInterest};
use crate::retransmit::{OutstandingTable, RetransmissionTimer};
use crate::wire::{InterestKind, ModelData, Name};

/// `child id -> leaves it serves`, the slice of the global tree rooted at
/// this aggregator (learned at initialization in the source; here supplied
/// at construction since topology loading is an external concern, §6).
pub type ChildLeaves = Vec<(String, Vec<String>)>;

#[derive(Debug)]
pub struct Aggregator {
    ctx: NodeContext,
    child_to_leaves: ChildLeaves,

    flows: HashMap<String, FlowController>,
    outstanding: OutstandingTable,
    pending: HashMap<Name, String>,
    dedup: DuplicateSuppressionFifo,
    queue: InterestQueue,
    iterations: IterationTable<AggregatorIterationState>,
    retx_timer: RetransmissionTimer,

    initialized: bool,
    run_start: Option<Time>,
    interest_bytes: u64,
    data_bytes: u64,
    producer_count: usize,
    stopped: bool,
}

impl Aggregator {
    pub fn new(ctx: NodeContext, child_to_leaves: ChildLeaves) -> Self {
        let producer_count: usize = child_to_leaves.iter().map(|(_, leaves)| leaves.len()).sum();
        let retx_tick = ctx.config.retx_tick();
        let queue_capacity = ctx.config.aggregator_queue_capacity;
        Self {
            flows: HashMap::new(),
            outstanding: OutstandingTable::new(),
            pending: HashMap::new(),
            dedup: DuplicateSuppressionFifo::new(),
            queue: InterestQueue::new(Some(queue_capacity)),
            iterations: IterationTable::new(),
            retx_timer: RetransmissionTimer::new(retx_tick),
            initialized: false,
            run_start: None,
            interest_bytes: 0,
            data_bytes: 0,
            producer_count,
            stopped: false,
            child_to_leaves,
            ctx,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn flow_for(&mut self, child: &str) -> &mut FlowController {
        self.flows
            .entry(child.to_owned())
            .or_insert_with(|| FlowController::new(FlowConfig::aggregator_from_config(&self.ctx.config, 1)))
    }

    /// Replies immediately to an initialization interest with an empty
    /// payload and arms the retransmission sweep (§4.8).
    pub fn on_initialization(&mut self, interest: &Interest, face: &mut impl Face, clock: &mut impl Clock) {
        let now = clock.now();
        self.initialized = true;
        self.run_start = Some(now);

        face.send_data(DataPacket {
            name: interest.name.clone(),
            payload: ModelData::zeros(0).serialize(),
            freshness: 0,
            congestion_mark: None,
        });

        clock.schedule(self.ctx.config.retx_tick(), ScheduledCallback::RetransmissionSweep);
        clock.schedule(0, ScheduledCallback::SendNext);
    }

    /// An upstream interest for one iteration, to be split across this
    /// aggregator's own children.
    pub fn on_interest(&mut self, interest: Interest, clock: &mut impl Clock) -> Result<()> {
        if !self.initialized {
            return Err(Error::MissingTree { name: interest.name.to_uri() });
        }
        let Some(seq) = interest.name.sequence() else {
            return Err(Error::MissingTree { name: interest.name.to_uri() });
        };
        let now = clock.now();
        let leaf_list = interest.name.leaves();

        let Some(subs) = pipeline::split(
            &leaf_list,
            &self.child_to_leaves,
            InterestKind::Data,
            seq,
            &self.dedup,
        ) else {
            debug!(seq, "dropping upstream interest as retransmission noise");
            return Ok(());
        };

        if !self.queue.has_room_for(subs.len()) {
            debug!(seq, queue_len = self.queue.len(), "dropping upstream interest: queue at capacity");
            return Ok(());
        }

        let mut outstanding = HashSet::new();
        let mut first = true;
        for (child, name) in subs {
            outstanding.insert(name.clone());
            self.pending.insert(name.clone(), child);
            self.queue.push(QueuedInterest {
                iteration: seq,
                first_of_iteration: first,
                name,
            });
            first = false;
        }

        self.iterations.insert(
            seq,
            AggregatorIterationState::new(self.ctx.parameter_count, interest.name, now, outstanding),
        );
        Ok(())
    }

    /// One send-scheduler tick: drains whatever `QueueSize` admitted into
    /// the queue every tick regardless of any one child's window, round-
    /// robining the head across per-child flows so a closed window on one
    /// child doesn't starve the rest.
    pub fn on_send_slot(&mut self, face: &mut impl Face, clock: &mut impl Clock) {
        if self.stopped || self.queue.is_empty() {
            let backoff = pipeline::closed_window_backoff(self.ctx.config.retx_tick());
            clock.schedule(backoff, ScheduledCallback::SendNext);
            return;
        }
        let now = clock.now();

        let attempts = self.queue.len();
        for _ in 0..attempts {
            let Some(entry) = self.queue.pop() else { break };
            let child = self.pending.get(&entry.name).cloned().unwrap_or_default();
            let flow = self.flow_for(&child);

            if flow.can_send() {
                self.interest_bytes += entry.name.to_uri().len() as u64;
                flow.note_send();
                self.outstanding.insert(entry.name.clone(), child, now);
                face.send_interest(Interest {
                    name: entry.name,
                    nonce: 0,
                    lifetime: self.ctx.config.interest_lifetime(),
                });
                clock.schedule(0, ScheduledCallback::SendNext);
                return;
            }
            self.queue.push(entry);
        }

        let backoff = pipeline::closed_window_backoff(self.ctx.config.retx_tick());
        clock.schedule(backoff, ScheduledCallback::SendNext);
    }

    /// A child's reply: updates that child's flow, folds the payload into
    /// the iteration it belongs to, and relays upstream once complete.
    pub fn on_data(&mut self, data: DataPacket, face: &mut impl Face, clock: &mut impl Clock, log: &mut impl LogSink) {
        let now = clock.now();
        let Some(child) = self.pending.remove(&data.name) else {
            debug!(name = %data.name, "late or unexpected data, dropping");
            return;
        };
        let Some(sent_at) = self.outstanding.remove_with_sent_at(&data.name) else {
            debug!(name = %data.name, "data for a name with no outstanding entry, dropping");
            return;
        };

        let model = match ModelData::deserialize(data.payload, self.ctx.parameter_count) {
            Ok(model) => model,
            Err(err) => {
                warn!(%err, name = %data.name, "failed to decode data payload");
                return;
            }
        };
        self.data_bytes += model.serialize().len() as u64;

        let rtt = now.saturating_sub(sent_at);
        let flow_key = child.clone();
        let flow = self.flow_for(&child);
        flow.note_outstanding_cleared();
        flow.on_sample(rtt);

        let local_congestion = flow.is_local_congestion(rtt);
        if local_congestion {
            flow.on_congestion_event(CongestionEvent::LocalCongestion, now);
        }
        let remote_congestion = !model.congested_nodes.is_empty();
        if remote_congestion {
            flow.on_congestion_event(CongestionEvent::RemoteCongestion, now);
        }
        if !local_congestion && !remote_congestion {
            flow.on_congestion_free_reply();
        }

        log.record_rto(&self.ctx.node_id, &flow_key, now, flow.rto());
        log.record_rtt(
            &self.ctx.node_id,
            &flow_key,
            now,
            data.name.sequence().unwrap_or_default(),
            local_congestion || remote_congestion,
            flow.rtt_threshold(),
            rtt,
        );
        log.record_window(&self.ctx.node_id, &flow_key, now, flow.cwnd());

        let Some(seq) = data.name.sequence() else { return };
        let Some(state) = self.iterations.get_mut(seq) else {
            debug!(seq, "data for a sequence with no iteration state, dropping as duplicate");
            return;
        };
        if local_congestion {
            state.self_congested = true;
        }
        let complete = state.accumulate(&data.name, &model);
        if !complete {
            return;
        }

        let state = self.iterations.remove(seq).expect("just confirmed present");
        let original_name = state.original_name.clone();
        let start_time = state.start_time;
        let forwarded = state.into_forwarded_payload(&self.ctx.node_id);
        let congestion_mark = if forwarded.congested_nodes.is_empty() { None } else { Some(1) };
        let payload = forwarded.serialize();
        self.data_bytes += payload.len() as u64;

        face.send_data(DataPacket {
            name: original_name,
            payload,
            freshness: 0,
            congestion_mark,
        });
        log.record_aggregation_time(&self.ctx.node_id, now, now.saturating_sub(start_time));

        if seq >= self.ctx.config.iteration_count.saturating_sub(1) {
            log.record_throughput(
                self.interest_bytes,
                self.data_bytes,
                self.producer_count,
                self.run_start.unwrap_or(0),
                now,
            );
        }
    }

    /// A forwarder-level nack (§6): logged only, per §7's policy table -
    /// the retransmission timer is what eventually recovers the interest.
    pub fn on_nack(&mut self, nack: Nack) {
        warn!(name = %nack.interest.name, reason = %nack.reason, "nack received");
    }

    pub fn on_retransmission_sweep(&mut self, clock: &mut impl Clock, log: &mut impl LogSink) {
        let now = clock.now();

        let Aggregator { outstanding, flows, retx_timer, .. } = self;
        let expired = retx_timer.fire(outstanding, now, |child| {
            flows.get(child).map(FlowController::rto).unwrap_or(0)
        });

        for (name, child) in expired {
            let flow = self.flow_for(&child);
            flow.note_outstanding_cleared();
            flow.on_congestion_event(CongestionEvent::Timeout, now);
            log.record_window(&self.ctx.node_id, &child, now, flow.cwnd());

            self.dedup.push(name.clone());
            self.pending.insert(name.clone(), child);
            self.queue.push(QueuedInterest {
                iteration: name.sequence().unwrap_or_default(),
                first_of_iteration: false,
                name,
            });
        }

        clock.schedule(self.ctx.config.retx_tick(), ScheduledCallback::RetransmissionSweep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::logsink::NullLogSink;

    fn config() -> Config {
        Config::parse(
            "
            Constraint: 2
            Window: 1
            Alpha: 0.5
            Beta: 0.6
            Gamma: 0.7
            EWMAFactor: 0.3
            ThresholdFactor: 1.0
            UseCwa: true
            InterestQueue: 10
            QueueSize: 10
            Iteration: 1
            ",
        )
        .unwrap()
    }

    #[derive(Default)]
    struct RecordingFace {
        sent_interests: Vec<Interest>,
        sent_data: Vec<DataPacket>,
    }

    impl Face for RecordingFace {
        fn send_interest(&mut self, interest: Interest) {
            self.sent_interests.push(interest);
        }
        fn send_data(&mut self, data: DataPacket) {
            self.sent_data.push(data);
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
        fn schedule(&mut self, _delay: crate::face::Duration, _callback: ScheduledCallback) -> crate::face::EventHandle {
            crate::face::EventHandle(0)
        }
        fn cancel(&mut self, _handle: crate::face::EventHandle) {}
    }

    fn aggregator() -> Aggregator {
        let ctx = NodeContext::new("agg0", config(), 3);
        let children = vec![
            ("p0".to_owned(), vec!["p0".to_owned()]),
            ("p1".to_owned(), vec!["p1".to_owned()]),
        ];
        Aggregator::new(ctx, children)
    }

    #[test]
    fn initialization_replies_immediately_with_empty_data() {
        let mut agg = aggregator();
        let mut face = RecordingFace::default();
        let mut clock = FixedClock::default();

        let init = Interest {
            name: Name::sub_interest("agg0", &[], InterestKind::Initialization, 0),
            nonce: 0,
            lifetime: 0,
        };
        agg.on_initialization(&init, &mut face, &mut clock);

        assert!(agg.is_initialized());
        assert_eq!(face.sent_data.len(), 1);
        assert_eq!(face.sent_data[0].name, init.name);
    }

    #[test]
    fn interest_before_initialization_is_missing_tree() {
        let mut agg = aggregator();
        let mut clock = FixedClock::default();
        let interest = Interest {
            name: Name::sub_interest("agg0", &["p0".to_owned(), "p1".to_owned()], InterestKind::Data, 0),
            nonce: 0,
            lifetime: 0,
        };
        let err = agg.on_interest(interest, &mut clock).unwrap_err();
        assert!(matches!(err, Error::MissingTree { .. }));
    }

    #[test]
    fn steady_state_splits_and_relays_aggregated_reply() {
        let mut agg = aggregator();
        let mut face = RecordingFace::default();
        let mut clock = FixedClock::default();
        let mut log = NullLogSink;

        let init = Interest {
            name: Name::sub_interest("agg0", &[], InterestKind::Initialization, 0),
            nonce: 0,
            lifetime: 0,
        };
        agg.on_initialization(&init, &mut face, &mut clock);

        let upstream_name = Name::sub_interest(
            "agg0",
            &["p0".to_owned(), "p1".to_owned()],
            InterestKind::Data,
            0,
        );
        let interest = Interest { name: upstream_name.clone(), nonce: 0, lifetime: 0 };
        agg.on_interest(interest, &mut clock).unwrap();
        assert_eq!(agg.queue.len(), 2);

        let p0_name = Name::sub_interest("p0", &["p0".to_owned()], InterestKind::Data, 0);
        let p1_name = Name::sub_interest("p1", &["p1".to_owned()], InterestKind::Data, 0);
        agg.pending.insert(p0_name.clone(), "p0".to_owned());
        agg.pending.insert(p1_name.clone(), "p1".to_owned());
        agg.outstanding.insert(p0_name.clone(), "p0", 0);
        agg.outstanding.insert(p1_name.clone(), "p1", 0);

        let d0 = ModelData { parameters: vec![1.0, 2.0, 3.0], congested_nodes: vec![] };
        let d1 = ModelData { parameters: vec![4.0, 5.0, 6.0], congested_nodes: vec![] };

        clock.now = 100;
        agg.on_data(
            DataPacket { name: p0_name, payload: d0.serialize(), freshness: 0, congestion_mark: None },
            &mut face,
            &mut clock,
            &mut log,
        );
        assert!(face.sent_data.iter().all(|d| d.name != upstream_name));

        clock.now = 150;
        agg.on_data(
            DataPacket { name: p1_name, payload: d1.serialize(), freshness: 0, congestion_mark: None },
            &mut face,
            &mut clock,
            &mut log,
        );

        let reply = face.sent_data.iter().find(|d| d.name == upstream_name).unwrap();
        let forwarded = ModelData::deserialize(reply.payload.clone(), 3).unwrap();
        assert_eq!(forwarded.parameters, vec![5.0, 7.0, 9.0]);
    }
}
