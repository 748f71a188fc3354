//! A one-shot fan-in latch for independent async sub-operations.
//!
//! A request that depends on several preconditions (an identifier being
//! allocated, a parent record existing, ...) issues all of them at once and
//! lets a [JoinBarrier] decide when the request may proceed. The barrier
//! settles exactly once: either every party submitted, or one of them
//! aborted first. Anything reported after that is ignored.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use diretto_common::JoinBarrier;
//!
//! let completed = Arc::new(AtomicUsize::new(0));
//! let barrier = JoinBarrier::new(
//!     2,
//!     {
//!         let completed = completed.clone();
//!         move || {
//!             completed.fetch_add(1, Ordering::SeqCst);
//!         }
//!     },
//!     || {},
//! );
//!
//! barrier.submit();
//! barrier.submit();
//! barrier.submit();
//!
//! assert_eq!(completed.load(Ordering::SeqCst), 1);
//! ```

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type Continuation = Box<dyn FnOnce() + Send + 'static>;

/// The lifecycle of a [JoinBarrier]. Both transitions out of
/// [BarrierState::Pending] are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    /// Still waiting for parties to report.
    Pending,
    /// Every party submitted; the completion continuation has fired.
    Completed,
    /// A party aborted; an abort continuation has fired.
    Aborted,
}

struct Latch {
    parties: usize,
    submitted: usize,
    state: BarrierState,
    // Both are `Some` for as long as the latch is pending.
    on_complete: Option<Continuation>,
    on_abort: Option<Continuation>,
}

/// A counter plus two continuations.
///
/// `on_complete` fires once `submit` has been called `parties` times without
/// an intervening abort. The first `abort` (or `abort_with`) latches the
/// barrier and fires the default or the supplied abort continuation. Every
/// call after the barrier has settled is a no-op.
///
/// Clones share the same latch, so the barrier can be handed to as many
/// concurrently running sub-operations as needed. Continuations always run
/// outside of the internal lock.
#[derive(Clone)]
pub struct JoinBarrier {
    latch: Arc<Mutex<Latch>>,
}

impl JoinBarrier {
    /// Create a barrier waiting for `parties` submissions.
    ///
    /// A barrier over zero parties has nothing to wait for: it completes
    /// (and runs `on_complete`) immediately.
    pub fn new<C, A>(parties: usize, on_complete: C, on_abort: A) -> Self
    where
        C: FnOnce() + Send + 'static,
        A: FnOnce() + Send + 'static,
    {
        if parties == 0 {
            on_complete();
            return Self {
                latch: Arc::new(Mutex::new(Latch {
                    parties,
                    submitted: 0,
                    state: BarrierState::Completed,
                    on_complete: None,
                    on_abort: None,
                })),
            };
        }

        Self {
            latch: Arc::new(Mutex::new(Latch {
                parties,
                submitted: 0,
                state: BarrierState::Pending,
                on_complete: Some(Box::new(on_complete)),
                on_abort: Some(Box::new(on_abort)),
            })),
        }
    }

    /// Signal that one party finished successfully.
    ///
    /// Returns `true` if this call completed the barrier.
    pub fn submit(&self) -> bool {
        let continuation = {
            let mut latch = self.latch.lock();
            if latch.state != BarrierState::Pending {
                return false;
            }
            latch.submitted += 1;
            if latch.submitted < latch.parties {
                return false;
            }
            latch.state = BarrierState::Completed;
            latch.on_abort = None;
            latch.on_complete.take()
        };

        if let Some(continuation) = continuation {
            continuation();
        }
        true
    }

    /// Abort the barrier, running the default abort continuation.
    ///
    /// Returns `true` if this call was the one that aborted the barrier.
    pub fn abort(&self) -> bool {
        match self.trip() {
            Some(continuation) => {
                continuation();
                true
            }
            None => false,
        }
    }

    /// Abort the barrier, running `custom` in place of the default abort
    /// continuation.
    ///
    /// `custom` is dropped without running if the barrier already settled.
    pub fn abort_with<F>(&self, custom: F) -> bool
    where
        F: FnOnce(),
    {
        match self.trip() {
            Some(default) => {
                drop(default);
                custom();
                true
            }
            None => false,
        }
    }

    /// Latch into [BarrierState::Aborted], handing back the default abort
    /// continuation. `None` means the barrier had already settled.
    fn trip(&self) -> Option<Continuation> {
        let mut latch = self.latch.lock();
        if latch.state != BarrierState::Pending {
            return None;
        }
        latch.state = BarrierState::Aborted;
        latch.on_complete = None;
        latch.on_abort.take()
    }

    /// The current state of the barrier.
    pub fn state(&self) -> BarrierState {
        self.latch.lock().state
    }

    /// The number of parties the barrier waits for.
    pub fn parties(&self) -> usize {
        self.latch.lock().parties
    }

    /// The number of submissions counted so far.
    pub fn submitted(&self) -> usize {
        self.latch.lock().submitted
    }

    /// Create a barrier whose outcome is delivered to an awaitable
    /// [Settlement] instead of to caller-supplied continuations.
    ///
    /// `on_abort` produces the error reported when a party calls
    /// [Joiner::abort]; [Joiner::fail] reports its own error instead.
    pub fn settle<E, F>(parties: usize, on_abort: F) -> (Joiner<E>, Settlement<E>)
    where
        E: Send + 'static,
        F: FnOnce() -> E + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let slot: Slot<E> = Arc::new(Mutex::new(Some(sender)));

        let barrier = {
            let complete = slot.clone();
            let abort = slot.clone();
            JoinBarrier::new(
                parties,
                move || deliver(&complete, Ok(())),
                move || deliver(&abort, Err(on_abort())),
            )
        };

        (Joiner { barrier, slot }, Settlement { receiver })
    }
}

impl Debug for JoinBarrier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let latch = self.latch.lock();
        f.debug_struct("JoinBarrier")
            .field("parties", &latch.parties)
            .field("submitted", &latch.submitted)
            .field("state", &latch.state)
            .finish()
    }
}

/// Reported by a [Settlement] when every [Joiner] was dropped before the
/// barrier settled (for example because a party panicked).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Join barrier was abandoned before it settled")]
pub struct JoinAbandoned;

type Slot<E> = Arc<Mutex<Option<oneshot::Sender<Result<(), E>>>>>;

fn deliver<E>(slot: &Slot<E>, outcome: Result<(), E>) {
    if let Some(sender) = slot.lock().take() {
        // The waiting side may have gone away; the outcome is simply dropped.
        let _ = sender.send(outcome);
    }
}

/// The reporting side of a barrier created with [JoinBarrier::settle].
pub struct Joiner<E> {
    barrier: JoinBarrier,
    slot: Slot<E>,
}

impl<E> Clone for Joiner<E> {
    fn clone(&self) -> Self {
        Self {
            barrier: self.barrier.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<E> Debug for Joiner<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Joiner").field(&self.barrier).finish()
    }
}

impl<E> Joiner<E>
where
    E: Send + 'static,
{
    /// See [JoinBarrier::submit].
    pub fn submit(&self) -> bool {
        self.barrier.submit()
    }

    /// Abort with the error produced by the barrier's default abort handler.
    pub fn abort(&self) -> bool {
        self.barrier.abort()
    }

    /// Abort with a specific error.
    pub fn fail(&self, error: E) -> bool {
        let slot = self.slot.clone();
        self.barrier.abort_with(move || deliver(&slot, Err(error)))
    }

    /// The current state of the underlying barrier.
    pub fn state(&self) -> BarrierState {
        self.barrier.state()
    }

    /// Run `party` as an independent task that reports to this barrier:
    /// success submits, failure aborts with the returned error.
    ///
    /// The task is never cancelled. If the barrier settles first, whatever
    /// the task produces is still handed to the returned [JoinHandle] but has
    /// no further effect on the barrier.
    pub fn spawn<T, F>(&self, party: F) -> JoinHandle<Option<T>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let joiner = self.clone();
        tokio::spawn(async move {
            match party.await {
                Ok(value) => {
                    joiner.submit();
                    Some(value)
                }
                Err(error) => {
                    joiner.fail(error);
                    None
                }
            }
        })
    }
}

/// The waiting side of a barrier created with [JoinBarrier::settle].
#[derive(Debug)]
pub struct Settlement<E> {
    receiver: oneshot::Receiver<Result<(), E>>,
}

impl<E> Settlement<E>
where
    E: From<JoinAbandoned>,
{
    /// Wait for the barrier to settle.
    pub async fn wait(self) -> Result<(), E> {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(JoinAbandoned.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default, Clone)]
    struct Counters {
        completed: Arc<AtomicUsize>,
        aborted: Arc<AtomicUsize>,
    }

    impl Counters {
        fn barrier(&self, parties: usize) -> JoinBarrier {
            let completed = self.completed.clone();
            let aborted = self.aborted.clone();
            JoinBarrier::new(
                parties,
                move || {
                    completed.fetch_add(1, Ordering::SeqCst);
                },
                move || {
                    aborted.fetch_add(1, Ordering::SeqCst);
                },
            )
        }

        fn completed(&self) -> usize {
            self.completed.load(Ordering::SeqCst)
        }

        fn aborted(&self) -> usize {
            self.aborted.load(Ordering::SeqCst)
        }
    }

    #[derive(Debug, PartialEq, Eq)]
    enum TestError {
        Default,
        Custom(&'static str),
        Abandoned,
    }

    impl From<JoinAbandoned> for TestError {
        fn from(_: JoinAbandoned) -> Self {
            TestError::Abandoned
        }
    }

    #[test]
    fn it_completes_after_every_party_submits() {
        let counters = Counters::default();
        let barrier = counters.barrier(3);

        assert!(!barrier.submit());
        assert!(!barrier.submit());
        assert_eq!(counters.completed(), 0);
        assert_eq!(barrier.state(), BarrierState::Pending);

        assert!(barrier.submit());
        assert_eq!(counters.completed(), 1);
        assert_eq!(counters.aborted(), 0);
        assert_eq!(barrier.state(), BarrierState::Completed);
    }

    #[test]
    fn it_ignores_submissions_past_the_party_count() {
        let counters = Counters::default();
        let barrier = counters.barrier(2);

        barrier.submit();
        barrier.submit();
        assert!(!barrier.submit());
        assert!(!barrier.submit());

        assert_eq!(counters.completed(), 1);
        assert_eq!(barrier.submitted(), 2);
    }

    #[test]
    fn it_never_completes_once_aborted() {
        let counters = Counters::default();
        let barrier = counters.barrier(2);

        barrier.submit();
        assert!(barrier.abort());
        assert!(!barrier.submit());
        assert!(!barrier.submit());

        assert_eq!(counters.completed(), 0);
        assert_eq!(counters.aborted(), 1);
        assert_eq!(barrier.state(), BarrierState::Aborted);
    }

    #[test]
    fn it_fires_only_the_first_abort() {
        let counters = Counters::default();
        let barrier = counters.barrier(2);
        let custom = Arc::new(AtomicUsize::new(0));

        assert!(barrier.abort());
        assert!(!barrier.abort());
        assert!(!barrier.abort_with({
            let custom = custom.clone();
            move || {
                custom.fetch_add(1, Ordering::SeqCst);
            }
        }));

        assert_eq!(counters.aborted(), 1);
        assert_eq!(custom.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn it_runs_a_custom_abort_instead_of_the_default() {
        let counters = Counters::default();
        let barrier = counters.barrier(2);
        let custom = Arc::new(AtomicUsize::new(0));

        assert!(barrier.abort_with({
            let custom = custom.clone();
            move || {
                custom.fetch_add(1, Ordering::SeqCst);
            }
        }));
        barrier.abort();

        assert_eq!(custom.load(Ordering::SeqCst), 1);
        assert_eq!(counters.aborted(), 0);
        assert_eq!(counters.completed(), 0);
    }

    #[test]
    fn it_ignores_aborts_after_completion() {
        let counters = Counters::default();
        let barrier = counters.barrier(1);

        barrier.submit();
        assert!(!barrier.abort());

        assert_eq!(counters.completed(), 1);
        assert_eq!(counters.aborted(), 0);
        assert_eq!(barrier.state(), BarrierState::Completed);
    }

    #[test]
    fn it_completes_immediately_without_parties() {
        let counters = Counters::default();
        let barrier = counters.barrier(0);

        assert_eq!(counters.completed(), 1);
        assert!(!barrier.submit());
        assert!(!barrier.abort());
        assert_eq!(counters.completed(), 1);
        assert_eq!(counters.aborted(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn it_completes_once_under_concurrent_submissions() -> anyhow::Result<()> {
        let counters = Counters::default();
        let barrier = counters.barrier(64);

        let mut tasks = Vec::new();
        for _ in 0..128 {
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move { barrier.submit() }));
        }

        let mut completions = 0;
        for task in tasks {
            if task.await? {
                completions += 1;
            }
        }

        assert_eq!(completions, 1);
        assert_eq!(counters.completed(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn it_settles_successfully_when_every_party_submits() -> anyhow::Result<()> {
        let (joiner, settlement) = JoinBarrier::settle::<TestError, _>(2, || TestError::Default);

        let first = joiner.spawn(async { Ok::<_, TestError>("uuid") });
        let second = joiner.spawn(async { Ok::<_, TestError>(()) });
        drop(joiner);

        assert_eq!(settlement.wait().await, Ok(()));
        assert_eq!(first.await?, Some("uuid"));
        assert_eq!(second.await?, Some(()));
        Ok(())
    }

    #[tokio::test]
    async fn it_settles_with_the_first_failure() -> anyhow::Result<()> {
        let (joiner, settlement) = JoinBarrier::settle::<TestError, _>(3, || TestError::Default);

        joiner.submit();
        joiner.fail(TestError::Custom("missing document"));
        joiner.fail(TestError::Custom("backend down"));
        joiner.submit();

        assert_eq!(
            settlement.wait().await,
            Err(TestError::Custom("missing document"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_settles_with_the_default_error_on_abort() -> anyhow::Result<()> {
        let (joiner, settlement) = JoinBarrier::settle::<TestError, _>(2, || TestError::Default);

        joiner.abort();

        assert_eq!(settlement.wait().await, Err(TestError::Default));
        Ok(())
    }

    #[tokio::test]
    async fn it_reports_abandonment_when_every_joiner_is_dropped() -> anyhow::Result<()> {
        let (joiner, settlement) = JoinBarrier::settle::<TestError, _>(2, || TestError::Default);

        joiner.submit();
        drop(joiner);

        assert_eq!(settlement.wait().await, Err(TestError::Abandoned));
        Ok(())
    }

    #[tokio::test]
    async fn it_lets_spawned_parties_finish_after_an_abort() -> anyhow::Result<()> {
        let (joiner, settlement) = JoinBarrier::settle::<TestError, _>(2, || TestError::Default);
        let (release, gate) = oneshot::channel::<()>();

        let slow = joiner.spawn(async move {
            let _ = gate.await;
            Ok::<_, TestError>(42)
        });
        joiner.fail(TestError::Custom("precondition failed"));
        drop(joiner);

        assert_eq!(
            settlement.wait().await,
            Err(TestError::Custom("precondition failed"))
        );

        let _ = release.send(());
        assert_eq!(slow.await?, Some(42));
        Ok(())
    }
}
