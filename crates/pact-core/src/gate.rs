//! Gated executor — FIFO admission with timeouts and sub-gates.
//!
//! A gate admits tasks in submission order: a task body starts only
//! after every earlier task on the same gate has completed (or timed
//! out). This is what serializes startup and gives `ready()` its
//! barrier. Each task runs under a timer; on expiry the slot is
//! released and the task's eventual completion is discarded.
//!
//! A [`subgate`](Gate::subgate) is an independent FIFO whose
//! activity still counts toward the parent's readiness, but whose
//! tasks do not contend for the parent's queue — how `gate$`
//! messages obtain isolation from the main serialization queue.
//!
//! # Timeout semantics
//!
//! The task future is spawned, so a timeout does not cancel it. A
//! completion arriving after the timer fired is logged at `trace`
//! level (target `pact::gate`) when late-tracing is enabled, and
//! silently detached otherwise. Either way it has no further
//! observable effect.

use crate::error::GateError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::trace;

struct GateState {
    busy: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
    inflight: usize,
}

struct GateInner {
    label: String,
    default_timeout: Duration,
    trace_late: bool,
    state: Mutex<GateState>,
    idle: watch::Sender<bool>,
    parent: Option<Arc<GateInner>>,
}

impl GateInner {
    fn begin(self: &Arc<Self>) -> FlightGuard {
        let mut node = Some(self.clone());
        while let Some(g) = node {
            {
                let mut st = g.state.lock();
                st.inflight += 1;
            }
            let _ = g.idle.send(false);
            node = g.parent.clone();
        }
        FlightGuard(self.clone())
    }
}

/// Keeps the gate (and its ancestors) marked busy for the life of a
/// task, including its time in the admission queue. Dropping the
/// guard — normal completion, timeout, or caller cancellation —
/// releases the count.
struct FlightGuard(Arc<GateInner>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut node = Some(self.0.clone());
        while let Some(g) = node {
            let clear = {
                let mut st = g.state.lock();
                st.inflight = st.inflight.saturating_sub(1);
                st.inflight == 0
            };
            if clear {
                let _ = g.idle.send(true);
            }
            node = g.parent.clone();
        }
    }
}

/// The FIFO slot: held while a task body runs, handed to the next
/// waiter on drop.
struct GateSlot(Arc<GateInner>);

impl GateSlot {
    async fn acquire(inner: &Arc<GateInner>) -> Self {
        let waiting = {
            let mut st = inner.state.lock();
            if st.busy {
                let (tx, rx) = oneshot::channel();
                st.waiters.push_back(tx);
                Some(rx)
            } else {
                st.busy = true;
                None
            }
        };
        if let Some(rx) = waiting {
            // The sender is dropped only if the gate itself is torn
            // down mid-wait; proceeding is then harmless.
            let _ = rx.await;
        }
        Self(inner.clone())
    }
}

impl Drop for GateSlot {
    fn drop(&mut self) {
        let mut st = self.0.state.lock();
        loop {
            match st.waiters.pop_front() {
                // Hand the slot over; skip waiters that gave up.
                Some(tx) => {
                    if tx.send(()).is_ok() {
                        return;
                    }
                }
                None => {
                    st.busy = false;
                    return;
                }
            }
        }
    }
}

/// FIFO admission queue with per-task timeouts.
///
/// Cheap to clone; clones share the queue.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<GateInner>,
}

impl Gate {
    /// Creates a root gate.
    #[must_use]
    pub fn new(label: impl Into<String>, default_timeout: Duration, trace_late: bool) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(GateInner {
                label: label.into(),
                default_timeout,
                trace_late,
                state: Mutex::new(GateState {
                    busy: false,
                    waiters: VecDeque::new(),
                    inflight: 0,
                }),
                idle,
                parent: None,
            }),
        }
    }

    /// Creates a sub-gate: an independent FIFO whose in-flight tasks
    /// still count toward this gate's readiness.
    #[must_use]
    pub fn subgate(&self, label: impl Into<String>) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(GateInner {
                label: label.into(),
                default_timeout: self.inner.default_timeout,
                trace_late: self.inner.trace_late,
                state: Mutex::new(GateState {
                    busy: false,
                    waiters: VecDeque::new(),
                    inflight: 0,
                }),
                idle,
                parent: Some(self.inner.clone()),
            }),
        }
    }

    /// Gate label, for logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Timeout applied when a task does not supply one.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// `true` when no task is in flight here or in any sub-gate.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.inner.state.lock().inflight == 0
    }

    /// Number of tasks in flight (queued or running), including
    /// sub-gate tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state.lock().inflight
    }

    /// Waits until the gate is clear. Returns immediately when it
    /// already is.
    pub async fn wait_clear(&self) {
        let mut rx = self.inner.idle.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Runs `fut` through the admission queue: waits for every
    /// earlier task, then executes under the timer.
    ///
    /// # Errors
    ///
    /// [`GateError::Timeout`] when the timer expires first (the task
    /// keeps running detached), [`GateError::TaskPanicked`] when the
    /// task panics.
    pub async fn run<T, F>(
        &self,
        description: String,
        timeout: Option<Duration>,
        fut: F,
    ) -> Result<T, GateError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let _flight = self.inner.begin();
        let slot = GateSlot::acquire(&self.inner).await;
        let out = self.execute(description, timeout, fut).await;
        drop(slot);
        out
    }

    /// Runs `fut` under the timer without queueing, for callers that
    /// already hold a slot on this gate (nested dispatches). Still
    /// counts toward readiness.
    pub async fn run_unqueued<T, F>(
        &self,
        description: String,
        timeout: Option<Duration>,
        fut: F,
    ) -> Result<T, GateError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let _flight = self.inner.begin();
        self.execute(description, timeout, fut).await
    }

    async fn execute<T, F>(
        &self,
        description: String,
        timeout: Option<Duration>,
        fut: F,
    ) -> Result<T, GateError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let tm = timeout.unwrap_or(self.inner.default_timeout);
        let mut handle = tokio::spawn(fut);
        match tokio::time::timeout(tm, &mut handle).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_join)) => Err(GateError::TaskPanicked { description }),
            Err(_elapsed) => {
                if self.inner.trace_late {
                    let gate = self.inner.label.clone();
                    let task = description.clone();
                    tokio::spawn(async move {
                        if handle.await.is_ok() {
                            trace!(
                                target: "pact::gate",
                                gate = %gate,
                                task = %task,
                                "late completion after timeout, result discarded"
                            );
                        }
                    });
                }
                // Otherwise the handle is dropped and the task is
                // detached: no active cancellation.
                Err(GateError::Timeout {
                    description,
                    timeout_ms: tm.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    fn gate() -> Gate {
        Gate::new("test", Duration::from_millis(500), true)
    }

    // ── FIFO admission ───────────────────────────────────────

    #[tokio::test]
    async fn tasks_start_in_submission_order() {
        let g = gate();
        let log = Arc::new(AsyncMutex::new(Vec::new()));

        let mut joins = Vec::new();
        for i in 0..5 {
            let g = g.clone();
            let log = log.clone();
            joins.push(tokio::spawn(async move {
                g.run(format!("t{i}"), None, async move {
                    log.lock().await.push(i);
                })
                .await
            }));
            // Give each submission a chance to enqueue before the next.
            tokio::task::yield_now().await;
        }
        for j in joins {
            j.await.expect("join").expect("task should complete");
        }

        assert_eq!(*log.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn second_task_waits_for_first() {
        let g = gate();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut joins = Vec::new();
        for _ in 0..4 {
            let g = g.clone();
            let running = running.clone();
            let max_seen = max_seen.clone();
            joins.push(tokio::spawn(async move {
                g.run("overlap".into(), None, async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for j in joins {
            j.await.expect("join").expect("task should complete");
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    // ── Timeout ──────────────────────────────────────────────

    #[tokio::test]
    async fn timeout_fails_the_slot_and_admits_next() {
        let g = gate();

        let res = g
            .run("stuck".into(), Some(Duration::from_millis(20)), async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .await;
        assert!(matches!(res, Err(GateError::Timeout { .. })));

        // The queue is free again.
        let res = g.run("after".into(), None, async { 7 }).await;
        assert_eq!(res.expect("task after timeout should run"), 7);
    }

    #[tokio::test]
    async fn late_completion_is_discarded() {
        let g = gate();
        let done = Arc::new(AtomicUsize::new(0));
        let done2 = done.clone();

        let res = g
            .run("slow".into(), Some(Duration::from_millis(10)), async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                done2.fetch_add(1, Ordering::SeqCst);
                42
            })
            .await;
        assert!(res.is_err());

        // The task still completes in the background, result unseen.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_task_reports_and_releases() {
        let g = gate();
        let res: Result<(), _> = g
            .run("boom".into(), None, async {
                panic!("handler exploded");
            })
            .await;
        assert!(matches!(res, Err(GateError::TaskPanicked { .. })));

        let res = g.run("after".into(), None, async { 1 }).await;
        assert_eq!(res.expect("gate should recover after panic"), 1);
    }

    // ── Readiness ────────────────────────────────────────────

    #[tokio::test]
    async fn clear_tracking() {
        let g = gate();
        assert!(g.is_clear());

        let g2 = g.clone();
        let handle = tokio::spawn(async move {
            g2.run("work".into(), None, async {
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!g.is_clear());

        g.wait_clear().await;
        assert!(g.is_clear());
        handle.await.expect("join").expect("task should complete");
    }

    #[tokio::test]
    async fn wait_clear_returns_immediately_when_idle() {
        let g = gate();
        tokio::time::timeout(Duration::from_millis(50), g.wait_clear())
            .await
            .expect("wait_clear on an idle gate should not block");
    }

    // ── Sub-gates ────────────────────────────────────────────

    #[tokio::test]
    async fn subgate_does_not_block_parent_queue() {
        let g = gate();
        let sub = g.subgate("iso");

        // Occupy the sub-gate with a slow task.
        let sub2 = sub.clone();
        let slow = tokio::spawn(async move {
            sub2.run("slow".into(), None, async {
                tokio::time::sleep(Duration::from_millis(50)).await;
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        // The parent queue is still free.
        let res = tokio::time::timeout(
            Duration::from_millis(20),
            g.run("parent".into(), None, async { 1 }),
        )
        .await;
        assert_eq!(
            res.expect("parent task should not wait on sub-gate")
                .expect("parent task should complete"),
            1
        );

        slow.await.expect("join").expect("sub task should complete");
    }

    #[tokio::test]
    async fn subgate_activity_counts_toward_parent_readiness() {
        let g = gate();
        let sub = g.subgate("iso");

        let sub2 = sub.clone();
        let handle = tokio::spawn(async move {
            sub2.run("work".into(), None, async {
                tokio::time::sleep(Duration::from_millis(30)).await;
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(!g.is_clear());
        g.wait_clear().await;
        assert!(g.is_clear());
        handle.await.expect("join").expect("sub task should complete");
    }

    #[tokio::test]
    async fn sibling_subgates_run_concurrently() {
        let g = gate();
        let a = g.subgate("a");
        let b = g.subgate("b");
        let overlap = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut joins = Vec::new();
        for sub in [a, b] {
            let overlap = overlap.clone();
            let peak = peak.clone();
            joins.push(tokio::spawn(async move {
                sub.run("w".into(), None, async move {
                    let now = overlap.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    overlap.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for j in joins {
            j.await.expect("join").expect("task should complete");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_unqueued_skips_the_queue() {
        let g = gate();

        // Hold the slot with a queued task, then run an unqueued one.
        let g2 = g.clone();
        let holder = tokio::spawn(async move {
            g2.run("holder".into(), None, async {
                tokio::time::sleep(Duration::from_millis(40)).await;
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let res = tokio::time::timeout(
            Duration::from_millis(20),
            g.run_unqueued("nested".into(), None, async { 9 }),
        )
        .await;
        assert_eq!(
            res.expect("unqueued task should not wait for the slot")
                .expect("unqueued task should complete"),
            9
        );

        holder.await.expect("join").expect("holder should complete");
    }
}
