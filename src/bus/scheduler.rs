//! Retry and transmit scheduling
//!
//! Two primitives back the protocol engine's timing discipline: a repeating
//! retransmission of a single frame, and a cancellable one-shot timer that
//! posts an event back into the engine's queue. Both are spawned tasks that
//! only ever send on a channel; cancellation is cooperative.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};

use crate::core::{Error, Result};
use crate::protocol::Frame;

/// A frame being retransmitted at a fixed interval until stopped
///
/// The first transmission happens immediately. Dropping the handle stops
/// the retransmission.
pub struct Retransmit {
    handle: Option<JoinHandle<()>>,
}

impl Retransmit {
    /// Starts retransmitting `frame` on `out` every `every`
    pub fn spawn(frame: Frame, every: Duration, out: mpsc::Sender<Frame>) -> Retransmit {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                if out.send(frame.clone()).await.is_err() {
                    break;
                }
            }
        });

        Retransmit {
            handle: Some(handle),
        }
    }

    /// Stops the retransmission; idempotent
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Retransmit {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A cancellable single-shot timer
///
/// Each arming issues a token that travels inside the posted event. The
/// owner calls [`Timeout::acknowledge`] with that token when it consumes
/// the fire event; a token from a cancelled or superseded arming does not
/// match and the event must be discarded. This makes fired-ness explicit
/// in the owner's event order instead of racing against task completion.
///
/// Arming an already-armed handle is an error; callers cancel or
/// acknowledge explicitly before rearming so a stale deadline can never
/// fire alongside a new one.
#[derive(Default)]
pub struct Timeout {
    handle: Option<JoinHandle<()>>,
    epoch: u64,
}

impl Timeout {
    /// Creates an unarmed timer handle
    pub fn new() -> Timeout {
        Timeout {
            handle: None,
            epoch: 0,
        }
    }

    /// Arms the timer to post `event(token)` on `tx` after `after`
    pub fn arm<T, F>(&mut self, after: Duration, tx: mpsc::Sender<T>, event: F) -> Result<()>
    where
        T: Send + 'static,
        F: FnOnce(u64) -> T,
    {
        if self.is_armed() {
            return Err(Error::invalid_state(
                "timer already armed, cancel before rearming",
            ));
        }

        self.epoch = self.epoch.wrapping_add(1);
        let event = event(self.epoch);
        self.handle = Some(tokio::spawn(async move {
            sleep(after).await;
            let _ = tx.send(event).await;
        }));

        Ok(())
    }

    /// Cancels the timer if armed; idempotent
    ///
    /// A fire event already queued when the cancel lands carries a token
    /// [`Timeout::acknowledge`] will reject.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Consumes a fire event, disarming the timer
    ///
    /// Returns false when the token belongs to a cancelled or already
    /// consumed arming; such events are stale and must be dropped.
    pub fn acknowledge(&mut self, token: u64) -> bool {
        if self.handle.is_none() || token != self.epoch {
            return false;
        }
        self.handle = None;
        true
    }

    /// Returns whether an arming is outstanding (not yet cancelled or
    /// acknowledged)
    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for Timeout {
    fn drop(&mut self) {
        self.cancel();
    }
}
