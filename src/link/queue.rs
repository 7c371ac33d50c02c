//! Operation queue — one FIFO per connection, one consumer loop.
//!
//! Every read, write and (un)subscribe is boxed into a [`Job`] and pushed
//! into a bounded `embassy-sync` channel.  A single consumer future
//! ([`OperationQueue::run`]) pops jobs in submission order and awaits each
//! to completion before taking the next, so the transport never sees two
//! overlapping calls.
//!
//! ```text
//!  caller A ─┐                        ┌───────────────┐
//!  caller B ─┼─▶ Channel<Job, 32> ───▶│ consumer loop │──▶ Transport
//!  caller C ─┘        (FIFO)          │ (one at once) │
//!       ▲                             └───────┬───────┘
//!       └────────── Signal<Result<T>> ◀───────┘
//! ```
//!
//! [`OperationQueue::reset`] bumps the queue generation, aborts everything
//! waiting in the channel with [`Error::Disconnected`] and abandons the
//! in-flight job, so nothing left over from a dead link can wedge the next
//! session.

use core::cell::Cell;
use core::future::Future;
use core::pin::Pin;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use futures_lite::future;
use log::{debug, warn};

use super::retry::{RetryPolicy, run_with_retry};
use crate::error::{Error, Result};

/// Jobs that may wait behind the one in flight before `enqueue` applies backpressure.
const QUEUE_DEPTH: usize = 32;

type LocalTask = Pin<Box<dyn Future<Output = ()>>>;

/// A queued unit of work plus the way to fail it without running it.
struct Job {
    label: String,
    generation: u64,
    task: LocalTask,
    abort: Box<dyn FnOnce(Error)>,
}

struct QueueInner {
    jobs: Channel<NoopRawMutex, Job, QUEUE_DEPTH>,
    generation: Cell<u64>,
    abandon: Signal<NoopRawMutex, ()>,
    in_flight: Cell<bool>,
    completed: Cell<u64>,
}

/// Cloneable handle to a connection's operation queue.
#[derive(Clone)]
pub struct OperationQueue {
    inner: Rc<QueueInner>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(QueueInner {
                jobs: Channel::new(),
                generation: Cell::new(0),
                abandon: Signal::new(),
                in_flight: Cell::new(false),
                completed: Cell::new(0),
            }),
        }
    }

    /// Queue `op` and await its outcome.
    ///
    /// `op` is not started until every earlier job has settled.
    pub async fn enqueue<T, F, Fut>(&self, label: &str, op: F) -> Result<T>
    where
        T: 'static,
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = Result<T>> + 'static,
    {
        let done: Rc<Signal<NoopRawMutex, Result<T>>> = Rc::new(Signal::new());
        let on_done = Rc::clone(&done);
        let on_abort = Rc::clone(&done);

        let job = Job {
            label: label.to_owned(),
            generation: self.inner.generation.get(),
            task: Box::pin(async move {
                let outcome = op().await;
                on_done.signal(outcome);
            }),
            abort: Box::new(move |e| on_abort.signal(Err(e))),
        };
        self.inner.jobs.send(job).await;
        done.wait().await
    }

    /// Queue `op` under the retry governor.
    ///
    /// The whole retry sequence occupies one queue slot; backoff pauses do
    /// not let later jobs slip in between attempts.
    pub async fn submit<T, F, Fut>(&self, label: &str, policy: RetryPolicy, op: F) -> Result<T>
    where
        T: 'static,
        F: FnMut(u8) -> Fut + 'static,
        Fut: Future<Output = Result<T>> + 'static,
    {
        let retry_label = label.to_owned();
        self.enqueue(label, move || async move {
            run_with_retry(&retry_label, &policy, op).await
        })
        .await
    }

    /// Resolves once everything queued before this call has settled.
    pub async fn drain(&self) -> Result<()> {
        self.enqueue("drain", || async { Ok(()) }).await
    }

    /// Fail every queued job and abandon the one in flight.
    pub fn reset(&self) {
        let inner = &self.inner;
        inner.generation.set(inner.generation.get().wrapping_add(1));

        let mut dropped = 0usize;
        while let Ok(job) = inner.jobs.try_receive() {
            (job.abort)(Error::Disconnected);
            dropped += 1;
        }
        if inner.in_flight.get() {
            inner.abandon.signal(());
        }
        if dropped > 0 {
            debug!("queue: reset dropped {dropped} pending operation(s)");
        }
    }

    /// Jobs waiting plus the one in flight.
    pub fn pending(&self) -> usize {
        self.inner.jobs.len() + usize::from(self.inner.in_flight.get())
    }

    /// Jobs that ran to completion (successfully or not) since creation.
    pub fn completed(&self) -> u64 {
        self.inner.completed.get()
    }

    /// Consumer loop. Drive this for as long as the owning session lives.
    pub async fn run(&self) {
        let inner = &self.inner;
        loop {
            let job = inner.jobs.receive().await;
            if job.generation != inner.generation.get() {
                debug!("queue: discarding stale `{}`", job.label);
                (job.abort)(Error::Disconnected);
                continue;
            }

            let Job {
                label, task, abort, ..
            } = job;
            inner.abandon.reset();
            inner.in_flight.set(true);
            debug!("queue: start `{label}`");

            let finished = future::or(
                async {
                    task.await;
                    true
                },
                async {
                    inner.abandon.wait().await;
                    false
                },
            )
            .await;

            inner.in_flight.set(false);
            if finished {
                inner.completed.set(inner.completed.get() + 1);
            } else {
                warn!("queue: `{label}` abandoned by reset");
                abort(Error::Disconnected);
            }
        }
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────
