//! Per-flow RTT/RTO estimation, timeout detection and AIMD-style window
//! control (C3). A consumer owns one [`FlowController`] per round, an
//! aggregator one per upstream child.

use crate::config::Config;
use crate::face::{Duration, Time};

/// Tunables threaded in from [`crate::config::Config`].
#[derive(Debug, Clone, Copy)]
pub struct FlowConfig {
    /// RTO multiplier `k` in `rto = k * (srtt + 4*rttvar)`. The source uses
    /// 2 at the consumer and 4 at an aggregator, for extra safety margin
    /// upstream of more fan-in.
    pub rto_k: f64,
    /// EWMA factor for the RTT threshold, in `[0.1, 0.3]`.
    pub ewma_alpha: f64,
    /// Threshold multiplier applied to the EWMA RTT estimate.
    pub threshold_beta: f64,
    /// Window multiplier on a timeout.
    pub alpha_to: f64,
    /// Window multiplier on local congestion (RTT over threshold).
    pub beta_lc: f64,
    /// Window multiplier on remote congestion (non-empty `congested_nodes`).
    pub gamma_rc: f64,
    pub initial_window: f64,
    pub use_cwa: bool,
    /// Number of children on this flow; the RTT threshold only becomes
    /// active once `rtt_samples >= 3 * children`.
    pub children: usize,
}

impl FlowConfig {
    pub fn consumer_default(children: usize) -> Self {
        Self {
            rto_k: 2.0,
            ewma_alpha: 0.3,
            threshold_beta: 1.2,
            alpha_to: 0.5,
            beta_lc: 0.6,
            gamma_rc: 0.7,
            initial_window: 1.0,
            use_cwa: true,
            children,
        }
    }

    pub fn aggregator_default(children: usize) -> Self {
        Self {
            rto_k: 4.0,
            threshold_beta: 1.0,
            ..Self::consumer_default(children)
        }
    }

    /// Builds a consumer-role flow's tunables from the scenario config
    /// (§6): `Window/Alpha/Beta/Gamma/EWMAFactor/ThresholdFactor/UseCwa`
    /// thread straight through, only the RTO multiplier stays a fixed
    /// role default (see DESIGN.md open question (b)).
    pub fn from_config(config: &Config, children: usize) -> Self {
        Self {
            rto_k: 2.0,
            ewma_alpha: config.ewma_alpha,
            threshold_beta: config.threshold_beta,
            alpha_to: config.alpha_to,
            beta_lc: config.beta_lc,
            gamma_rc: config.gamma_rc,
            initial_window: config.initial_window,
            use_cwa: config.use_cwa,
            children,
        }
    }

    /// Same as [`FlowConfig::from_config`], but with the aggregator's
    /// wider RTO multiplier of 4.
    pub fn aggregator_from_config(config: &Config, children: usize) -> Self {
        Self {
            rto_k: 4.0,
            ..Self::from_config(config, children)
        }
    }
}

/// What triggered a window decrease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionEvent {
    Timeout,
    LocalCongestion,
    RemoteCongestion,
}

impl CongestionEvent {
    fn factor(self, cfg: &FlowConfig) -> f64 {
        match self {
            CongestionEvent::Timeout => cfg.alpha_to,
            CongestionEvent::LocalCongestion => cfg.beta_lc,
            CongestionEvent::RemoteCongestion => cfg.gamma_rc,
        }
    }

    /// Timeouts are never CWA-suppressed; only local congestion is.
    fn suppressible(self) -> bool {
        matches!(self, CongestionEvent::LocalCongestion)
    }
}

/// Outcome of feeding a congestion event into the flow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowDecreaseOutcome {
    Applied { new_cwnd: f64 },
    SuppressedByCwa,
}

/// `{ srtt, rttvar, rto, ewma_rtt, rtt_threshold, rtt_samples, cwnd,
/// ssthresh, in_flight, last_decrease_time, init_rto }` from the data model.
#[derive(Debug, Clone)]
pub struct FlowController {
    config: FlowConfig,

    srtt: f64,
    rttvar: f64,
    init_rto: bool,

    ewma_rtt: f64,
    rtt_threshold: f64,
    rtt_samples: u64,

    cwnd: f64,
    ssthresh: f64,
    in_flight: u32,
    last_decrease_time: Option<Time>,
}

impl FlowController {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            cwnd: config.initial_window,
            ssthresh: f64::MAX,
            config,
            srtt: 0.0,
            rttvar: 0.0,
            init_rto: false,
            ewma_rtt: 0.0,
            rtt_threshold: 0.0,
            rtt_samples: 0,
            in_flight: 0,
            last_decrease_time: None,
        }
    }

    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> f64 {
        self.ssthresh
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn rto(&self) -> Duration {
        (self.config.rto_k * (self.srtt + 4.0 * self.rttvar)).max(0.0) as Duration
    }

    /// Is the window open for one more send at the scheduling point?
    pub fn can_send(&self) -> bool {
        (self.in_flight as f64) < self.cwnd
    }

    pub fn note_send(&mut self) {
        self.in_flight += 1;
    }

    pub fn note_outstanding_cleared(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Feed one RTT sample (Karn/Jacobson, §4.3), updating SRTT/RTTVAR/RTO
    /// and the EWMA congestion threshold.
    pub fn on_sample(&mut self, rtt: Duration) {
        let r = rtt as f64;
        if !self.init_rto {
            self.rttvar = r / 2.0;
            self.srtt = r;
            self.init_rto = true;
        } else {
            self.rttvar = 0.75 * self.rttvar + 0.25 * (self.srtt - r).abs();
            self.srtt = 0.875 * self.srtt + 0.125 * r;
        }

        self.ewma_rtt = self.config.ewma_alpha * r + (1.0 - self.config.ewma_alpha) * self.ewma_rtt;
        self.rtt_threshold = self.config.threshold_beta * self.ewma_rtt;
        self.rtt_samples += 1;
    }

    /// Whether enough samples have accumulated for the threshold to govern
    /// local-ECN decisions.
    pub fn threshold_active(&self) -> bool {
        self.rtt_samples >= 3 * self.config.children as u64
    }

    pub fn rtt_threshold(&self) -> Duration {
        self.rtt_threshold as Duration
    }

    /// Whether `rtt` should be flagged as local congestion - `false` while
    /// the threshold is not yet active.
    pub fn is_local_congestion(&self, rtt: Duration) -> bool {
        self.threshold_active() && (rtt as f64) > self.rtt_threshold
    }

    /// Congestion-free AIMD increase (§4.3): slow start below `ssthresh`,
    /// additive increase above it.
    pub fn on_congestion_free_reply(&mut self) {
        if self.cwnd < self.ssthresh {
            self.cwnd += 1.0;
        } else {
            self.cwnd += 1.0 / self.cwnd;
        }
    }

    /// Apply a congestion event's multiplicative decrease, honoring CWA
    /// suppression for local-congestion events (§4.3/§4.4).
    pub fn on_congestion_event(&mut self, event: CongestionEvent, now: Time) -> WindowDecreaseOutcome {
        if event.suppressible() && self.config.use_cwa {
            if let Some(last) = self.last_decrease_time {
                let elapsed = now.saturating_sub(last);
                if elapsed < self.rtt_threshold as Time {
                    return WindowDecreaseOutcome::SuppressedByCwa;
                }
            }
        }

        self.ssthresh = (self.cwnd * event.factor(&self.config)).max(self.config.initial_window);
        self.cwnd = self.ssthresh;
        self.last_decrease_time = Some(now);

        WindowDecreaseOutcome::Applied { new_cwnd: self.cwnd }
    }
}
