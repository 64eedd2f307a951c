//! External collaborators consumed by the core (§6): the forwarder face
//! and the simulator clock/scheduler. Both are capability traits owned by
//! the node, never the other way around - breaking the cyclic
//! ownership the source had between an app and its face.

use bytes::Bytes;

use crate::wire::Name;

/// Simulated time, in microseconds since the run started.
pub type Time = u64;

/// A simulated duration, in microseconds.
pub type Duration = u64;

/// An opaque nonce used for duplicate-interest detection at the forwarder
/// layer; the core never interprets it.
pub type Nonce = u64;

#[derive(Debug, Clone)]
pub struct Interest {
    pub name: Name,
    pub nonce: Nonce,
    pub lifetime: Duration,
}

#[derive(Debug, Clone)]
pub struct DataPacket {
    pub name: Name,
    pub payload: Bytes,
    pub freshness: Duration,
    /// Non-negative congestion mark set by a downstream forwarder queue, if
    /// any (remote ECN signaled at the wire level rather than in-payload).
    pub congestion_mark: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Nack {
    pub interest: Interest,
    pub reason: String,
}

/// Capability interface to the underlying named-data forwarder. Wire
/// encoding, nonce handling and actual packet delivery all live on the
/// other side of this trait.
pub trait Face {
    fn send_interest(&mut self, interest: Interest);
    fn send_data(&mut self, data: DataPacket);
}

/// Capability interface to the discrete-event simulator's clock and event
/// scheduler.
pub trait Clock {
    fn now(&self) -> Time;
    fn schedule(&mut self, delay: Duration, callback: ScheduledCallback) -> EventHandle;
    fn cancel(&mut self, handle: EventHandle);
}

/// An opaque, cancellable scheduled-event handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub u64);

/// What a scheduled event resumes when it fires. The simulator owns the
/// actual dispatch; the core only describes which kind of sweep to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledCallback {
    RetransmissionSweep,
    SendNext,
}
