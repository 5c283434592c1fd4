//! Delivery of external trigger edges to the control loop.
//!
//! The sender side sits wherever the edge is detected (an interrupt handler, a GPIO poller, a
//! test) and never blocks: it bumps a sequence number and wakes the receiver. The receiver
//! consumes one edge per call. If more than one edge was posted since its last call, the loop
//! fell behind the trigger and the skipped edges are reported as
//! [`ShimError::MissedTrigger`] instead of being replayed late.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::ShimError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerEvent {
    /// One trigger edge: advance playback by one iteration.
    Edge,
    /// Leave the playback loop.
    Stop,
}

#[derive(Clone, Copy, Debug)]
struct Posted {
    /// Sequence number of the latest event.
    seq: usize,
    last: TriggerEvent,
    /// Sequence number of the latest `Stop`, if any.
    stop_seq: Option<usize>,
}

/// Posting side. Cheap to clone, every clone posts to the same receivers.
#[derive(Clone)]
pub struct TriggerChan {
    state: Arc<Mutex<Posted>>,
    condvar: Arc<Condvar>,
}

impl Default for TriggerChan {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerChan {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(Posted {
                seq: 0,
                last: TriggerEvent::Stop,
                stop_seq: None,
            })),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// A receiver that reacts to events posted from now on.
    pub fn new_recvr(&self) -> TriggerRecvr {
        let viewed = self.state.lock().seq;
        TriggerRecvr {
            state: self.state.clone(),
            condvar: self.condvar.clone(),
            viewed,
        }
    }

    pub fn send(&self, event: TriggerEvent) {
        let mut posted = self.state.lock();
        posted.seq += 1;
        posted.last = event;
        if event == TriggerEvent::Stop {
            posted.stop_seq = Some(posted.seq);
        }
        self.condvar.notify_all();
    }

    pub fn edge(&self) {
        self.send(TriggerEvent::Edge);
    }

    pub fn stop(&self) {
        self.send(TriggerEvent::Stop);
    }

    /// Number of events posted so far.
    pub fn posted(&self) -> usize {
        self.state.lock().seq
    }
}

pub struct TriggerRecvr {
    state: Arc<Mutex<Posted>>,
    condvar: Arc<Condvar>,
    viewed: usize,
}

impl TriggerRecvr {
    /// Blocks until the next event.
    ///
    /// # Errors
    /// [`ShimError::MissedTrigger`] if edges were posted faster than they were consumed. The
    /// receiver resynchronises to the latest edge, so the next call waits for a fresh one.
    /// A [`TriggerEvent::Stop`] posted since the last call is always delivered, even when
    /// edges were missed or posted after it.
    pub fn recv(&mut self) -> Result<TriggerEvent, ShimError> {
        let mut guard = self.state.lock();
        while guard.seq == self.viewed {
            self.condvar.wait(&mut guard);
        }
        let posted = *guard;
        drop(guard);
        self.take_(posted)
    }

    /// Like [`recv`](TriggerRecvr::recv) but gives up after `timeout`, returning `Ok(None)`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<TriggerEvent>, ShimError> {
        let mut guard = self.state.lock();
        if guard.seq == self.viewed {
            let _ = self.condvar.wait_for(&mut guard, timeout);
            if guard.seq == self.viewed {
                return Ok(None);
            }
        }
        let posted = *guard;
        drop(guard);
        self.take_(posted).map(Some)
    }

    fn take_(&mut self, posted: Posted) -> Result<TriggerEvent, ShimError> {
        let missed = posted.seq - self.viewed - 1;
        let stopped = posted.stop_seq.is_some_and(|seq| seq > self.viewed);
        self.viewed = posted.seq;
        if stopped {
            return Ok(TriggerEvent::Stop);
        }
        if missed > 0 {
            return Err(ShimError::MissedTrigger { missed });
        }
        Ok(posted.last)
    }
}
