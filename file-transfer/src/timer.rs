//! Retransmission timer.
//!
//! Reliable delivery requires that an unacknowledged segment is re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`PeriodicTimer`] — a cancellable task that runs a callback every
//!   interval until a cancellation predicate becomes true.
//! - [`AckFlag`] — the shared "acknowledged" bit, set by the sender's receive
//!   loop and read by the timer task on every firing.
//! - [`TimerHandle`] — returned by [`PeriodicTimer::spawn`]; used to cancel
//!   the timer and inspect how often it fired.
//! - [`retransmit`] — a periodic timer bound to one segment and destination.
//!
//! The interval is fixed: there is no RTT estimation and no back-off.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::segment::Segment;
use crate::socket::Socket;

// ---------------------------------------------------------------------------
// AckFlag
// ---------------------------------------------------------------------------

/// Shared acknowledged flag for the outstanding segment.
///
/// Writes use `Release` and reads use `Acquire`, so once the timer observes
/// the flag it also observes everything the receive loop did before setting it.
#[derive(Debug, Clone, Default)]
pub struct AckFlag(Arc<AtomicBool>);

impl AckFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// PeriodicTimer
// ---------------------------------------------------------------------------

/// Handle to a running [`PeriodicTimer`] task.
///
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
    fires: Arc<AtomicU32>,
}

impl TimerHandle {
    /// Stop the timer.  No further firings happen after this returns.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// `true` once the task has exited, by cancellation or by observing its
    /// cancellation predicate.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Number of times the callback has run.
    pub fn fire_count(&self) -> u32 {
        self.fires.load(Ordering::Relaxed)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A cancellable, periodically-firing timeout.
pub struct PeriodicTimer;

impl PeriodicTimer {
    /// Spawn a timer that first fires one `interval` after arming and then
    /// every `interval`.
    ///
    /// On each tick `is_done` is consulted first: if it returns `true` the
    /// timer stops itself without firing.  Otherwise `on_fire` runs to
    /// completion and the timer stays armed.  Ticks missed while `on_fire`
    /// was running are not replayed in a burst.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<P, F, Fut>(interval: Duration, is_done: P, mut on_fire: F) -> TimerHandle
    where
        P: Fn() -> bool + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fires = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fires);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if is_done() {
                    break;
                }
                counter.fetch_add(1, Ordering::Relaxed);
                on_fire().await;
            }
        });

        TimerHandle { task, fires }
    }
}

/// Arm a retransmission timer for `segment`.
///
/// Every `interval` the identical segment is re-encoded and sent to `dest`
/// until `acked` is set or the returned handle is cancelled.  Send failures
/// are logged and the timer stays armed.
pub fn retransmit(
    socket: Arc<Socket>,
    segment: Segment,
    dest: SocketAddr,
    interval: Duration,
    acked: AckFlag,
) -> TimerHandle {
    let segment = Arc::new(segment);
    PeriodicTimer::spawn(
        interval,
        move || acked.is_set(),
        move || {
            let socket = Arc::clone(&socket);
            let segment = Arc::clone(&segment);
            async move {
                log::debug!(
                    "[timer] timeout; → DATA seq={} len={} (resend)",
                    segment.seq,
                    segment.payload_len()
                );
                if let Err(e) = socket.send_to(&segment, dest).await {
                    log::warn!("[timer] resend of seq={} failed: {e}", segment.seq);
                }
            }
        },
    )
}
