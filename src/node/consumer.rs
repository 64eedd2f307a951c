//! Consumer role (C7): the global iteration driver at the root of the
//! tree.
//!
//! Lifecycle (§4.7): `start -> broadcast_init -> wait for every
//! aggregator's reply -> generate interests -> drive until
//! iteration_count == N_iter -> stop`.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::aggregation::{ConsumerIterationState, IterationTable};
use crate::dedup::DuplicateSuppressionFifo;
use crate::face::{Clock, DataPacket, Face, Interest, Nack, ScheduledCallback, Time};
use crate::flow::{CongestionEvent, FlowConfig, FlowController};
use crate::logsink::LogSink;
use crate::node::NodeContext;
use crate::pipeline::{self, InterestQueue, QueuedInterest};
use crate::retransmit::{OutstandingTable, RetransmissionTimer};
use crate::tree::Tree;
use crate::wire::{InterestKind, ModelData, Name};

/// `parent -> leaves served`, one entry per direct child of the root
/// within a single round (an aggregator and its whole cluster for round 0,
/// or a bare leaf for an overflow round).
type ChildLeaves = Vec<(String, Vec<String>)>;

#[derive(Debug)]
pub struct Consumer {
    ctx: NodeContext,
    tree: Tree,
    producer_count: usize,

    broadcast_pending: HashSet<String>,
    broadcast_sync: bool,

    round_child_to_leaves: Vec<ChildLeaves>,
    flows: HashMap<usize, FlowController>,

    outstanding: OutstandingTable,
    /// Name of an outstanding sub-interest -> which round/child it belongs
    /// to, so a reply can be routed back into the right iteration state.
    pending: HashMap<Name, (usize, String)>,
    dedup: DuplicateSuppressionFifo,
    queue: InterestQueue,
    iterations: IterationTable<ConsumerIterationState>,

    next_seq: u64,
    completed_iterations: u64,
    retx_timer: RetransmissionTimer,

    run_start: Option<Time>,
    interest_bytes: u64,
    data_bytes: u64,
    stopped: bool,
    last_result: Option<Vec<f32>>,
}

impl Consumer {
    pub fn new(ctx: NodeContext, tree: Tree, producer_count: usize) -> Self {
        let round_child_to_leaves: Vec<ChildLeaves> = tree
            .rounds
            .iter()
            .map(|round| {
                round
                    .children_of(&ctx.node_id)
                    .iter()
                    .map(|child| {
                        let served = round.children_of(child);
                        if served.is_empty() {
                            (child.clone(), vec![child.clone()])
                        } else {
                            (child.clone(), served.to_vec())
                        }
                    })
                    .collect()
            })
            .collect();

        let flows = round_child_to_leaves
            .iter()
            .enumerate()
            .map(|(r, children)| {
                let children_count = children.len().max(1);
                (r, FlowController::new(FlowConfig::from_config(&ctx.config, children_count)))
            })
            .collect();

        let retx_tick = ctx.config.retx_tick();
        let queue_capacity = ctx.config.consumer_queue_capacity;

        Self {
            tree,
            producer_count,
            broadcast_pending: HashSet::new(),
            broadcast_sync: false,
            round_child_to_leaves,
            flows,
            outstanding: OutstandingTable::new(),
            pending: HashMap::new(),
            dedup: DuplicateSuppressionFifo::new(),
            queue: InterestQueue::new(Some(queue_capacity)),
            iterations: IterationTable::new(),
            next_seq: 0,
            completed_iterations: 0,
            retx_timer: RetransmissionTimer::new(retx_tick),
            run_start: None,
            interest_bytes: 0,
            data_bytes: 0,
            stopped: false,
            last_result: None,
            ctx,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn completed_iterations(&self) -> u64 {
        self.completed_iterations
    }

    /// The mean (§3 "terminal artifact") of the most recently completed
    /// iteration, overwritten each time a new one finishes.
    pub fn last_result(&self) -> Option<&[f32]> {
        self.last_result.as_deref()
    }

    /// Broadcasts the one-shot initialization round and arms the
    /// retransmission sweep. No steady-state traffic is sent until every
    /// broadcast recipient has replied (§4.5 "Never send before the
    /// initialization round has completed").
    pub fn start(&mut self, face: &mut impl Face, clock: &mut impl Clock) {
        let now = clock.now();
        self.run_start = Some(now);
        self.broadcast_pending = self.tree.broadcast_list.iter().cloned().collect();

        if self.broadcast_pending.is_empty() {
            self.broadcast_sync = true;
        } else {
            for id in &self.tree.broadcast_list {
                let name = Name::sub_interest(id, &[], InterestKind::Initialization, 0);
                self.interest_bytes += name.to_uri().len() as u64;
                face.send_interest(Interest {
                    name,
                    nonce: 0,
                    lifetime: self.ctx.config.interest_lifetime(),
                });
            }
        }

        clock.schedule(self.ctx.config.retx_tick(), ScheduledCallback::RetransmissionSweep);
        clock.schedule(0, ScheduledCallback::SendNext);
    }

    fn on_initialization_reply(&mut self, sender: &str) {
        self.broadcast_pending.remove(sender);
        if self.broadcast_pending.is_empty() {
            self.broadcast_sync = true;
        }
    }

    /// Keeps the interest queue topped up to `queue_capacity`, per-round,
    /// one sub-interest set per unscheduled iteration up to `N_iter`.
    fn fill_queue(&mut self, now: Time) {
        while self.queue.is_below_capacity() && self.next_seq < self.ctx.config.iteration_count {
            self.enqueue_iteration(self.next_seq, now);
            self.next_seq += 1;
        }
    }

    fn enqueue_iteration(&mut self, seq: u64, now: Time) {
        let num_rounds = self.round_child_to_leaves.len();
        let mut outstanding_per_round = vec![HashSet::new(); num_rounds];
        let mut first = true;

        for round_idx in 0..num_rounds {
            let child_to_leaves = &self.round_child_to_leaves[round_idx];
            let leaf_list: Vec<String> = child_to_leaves
                .iter()
                .flat_map(|(_, leaves)| leaves.iter().cloned())
                .collect();

            let Some(subs) = pipeline::split(
                &leaf_list,
                child_to_leaves,
                InterestKind::Data,
                seq,
                &self.dedup,
            ) else {
                debug!(seq, round_idx, "dropping round as retransmission noise");
                continue;
            };

            for (child, name) in subs {
                outstanding_per_round[round_idx].insert(child.clone());
                self.pending.insert(name.clone(), (round_idx, child));
                self.queue.push(QueuedInterest {
                    iteration: seq,
                    first_of_iteration: first,
                    name,
                });
                first = false;
            }
        }

        self.iterations.insert(
            seq,
            ConsumerIterationState::new(self.ctx.parameter_count, now, outstanding_per_round),
        );
    }

    /// One send-scheduler tick (§4.5): round-robins the head of the queue
    /// across per-round flows so a closed window on one round doesn't
    /// starve the others, then re-schedules itself.
    pub fn on_send_slot(&mut self, face: &mut impl Face, clock: &mut impl Clock) {
        if self.stopped {
            return;
        }
        let now = clock.now();
        self.fill_queue(now);

        if !self.broadcast_sync || self.queue.is_empty() {
            let backoff = pipeline::closed_window_backoff(self.ctx.config.retx_tick());
            clock.schedule(backoff, ScheduledCallback::SendNext);
            return;
        }

        let attempts = self.queue.len();
        for _ in 0..attempts {
            let Some(entry) = self.queue.pop() else { break };
            let round = self.pending.get(&entry.name).map(|(r, _)| *r).unwrap_or(0);
            let flow = self
                .flows
                .entry(round)
                .or_insert_with(|| FlowController::new(FlowConfig::from_config(&self.ctx.config, 1)));

            if flow.can_send() {
                self.interest_bytes += entry.name.to_uri().len() as u64;
                flow.note_send();
                self.outstanding.insert(entry.name.clone(), format!("round{round}"), now);
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

    pub fn on_data(&mut self, data: DataPacket, clock: &mut impl Clock, log: &mut impl LogSink) {
        let now = clock.now();
        match data.name.kind() {
            Some(InterestKind::Initialization) => {
                if let Some(sender) = data.name.destination() {
                    let sender = sender.to_owned();
                    self.on_initialization_reply(&sender);
                }
            }
            Some(InterestKind::Data) => {
                self.on_iteration_data(data, now, log);
            }
            None => warn!(name = %data.name, "data with unrecognized name kind, dropping"),
        }
    }

    fn on_iteration_data(&mut self, data: DataPacket, now: Time, log: &mut impl LogSink) {
        let Some((round, child)) = self.pending.remove(&data.name) else {
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
        let flow_key = format!("round{round}");
        let flow = self
            .flows
            .entry(round)
            .or_insert_with(|| FlowController::new(FlowConfig::from_config(&self.ctx.config, 1)));
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

        let Some(seq) = data.name.sequence() else {
            return;
        };
        let Some(state) = self.iterations.get_mut(seq) else {
            debug!(seq, "data for a sequence with no iteration state, dropping as duplicate");
            return;
        };
        let complete = state.accumulate(round, &child, &model);
        if complete {
            let state = self.iterations.remove(seq).expect("just confirmed present");
            let agg_time = now.saturating_sub(state.start_time);
            log.record_aggregation_time(&self.ctx.node_id, now, agg_time);
            self.last_result = Some(state.mean(self.producer_count));
            self.completed_iterations += 1;
            if self.completed_iterations >= self.ctx.config.iteration_count {
                self.stop(now, log);
            }
        }
    }

    /// A forwarder-level nack (§6): logged only, per §7's policy table -
    /// the retransmission timer is what eventually recovers the interest.
    pub fn on_nack(&mut self, nack: Nack) {
        warn!(name = %nack.interest.name, reason = %nack.reason, "nack received");
    }

    /// One retransmission sweep (§4.4): fired by the host simulator on the
    /// scheduled cadence.
    pub fn on_retransmission_sweep(&mut self, clock: &mut impl Clock, log: &mut impl LogSink) {
        if self.stopped {
            return;
        }
        let now = clock.now();

        let Consumer { outstanding, flows, retx_timer, .. } = self;
        let expired = retx_timer.fire(outstanding, now, |flow_key| {
            flows.get(&parse_round(flow_key)).map(FlowController::rto).unwrap_or(0)
        });

        for (name, flow_key) in expired {
            let round = parse_round(&flow_key);
            if let Some(flow) = self.flows.get_mut(&round) {
                flow.note_outstanding_cleared();
                flow.on_congestion_event(CongestionEvent::Timeout, now);
                log.record_window(&self.ctx.node_id, &flow_key, now, flow.cwnd());
            }
            self.dedup.push(name.clone());

            let child = self
                .pending
                .get(&name)
                .map(|(_, c)| c.clone())
                .or_else(|| name.destination().map(str::to_owned))
                .unwrap_or_default();
            self.pending.insert(name.clone(), (round, child));
            self.queue.push(QueuedInterest {
                iteration: name.sequence().unwrap_or_default(),
                first_of_iteration: false,
                name,
            });
        }

        clock.schedule(self.ctx.config.retx_tick(), ScheduledCallback::RetransmissionSweep);
    }

    fn stop(&mut self, now: Time, log: &mut impl LogSink) {
        self.stopped = true;
        log.record_throughput(
            self.interest_bytes,
            self.data_bytes,
            self.producer_count,
            self.run_start.unwrap_or(0),
            now,
        );
    }
}

fn parse_round(flow_key: &str) -> usize {
    flow_key.strip_prefix("round").and_then(|s| s.parse().ok()).unwrap_or(0)
}
