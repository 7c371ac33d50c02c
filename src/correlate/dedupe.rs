//! Request deduplication — one in-flight call per semantic key.
//!
//! The first caller for a key becomes the *leader* and runs the factory.
//! Callers arriving while the leader is outstanding become *followers*:
//! they park on the shared flight and receive a clone of the leader's
//! outcome.  The key is cleared as soon as the flight settles, so the next
//! call after settlement starts fresh.
//!
//! ```text
//!  caller 1 ──▶ [no flight] ──▶ leader ──▶ factory() ──┐
//!  caller 2 ──▶ [flight]    ──▶ follower ─────────────┤──▶ same Result<T>
//!  caller 3 ──▶ [flight]    ──▶ follower ─────────────┘
//! ```
//!
//! If the leader's future is dropped before it settles, followers receive
//! [`Error::Cancelled`].

use core::cell::RefCell;
use core::fmt;
use core::future::Future;
use core::hash::Hash;
use core::task::{Poll, Waker};
use std::collections::HashMap;
use std::rc::Rc;

use futures_lite::future;
use log::debug;

use crate::error::{Error, Result};

struct Flight<T> {
    outcome: RefCell<Option<Result<T>>>,
    wakers: RefCell<Vec<Waker>>,
}

impl<T: Clone> Flight<T> {
    fn new() -> Self {
        Self {
            outcome: RefCell::new(None),
            wakers: RefCell::new(Vec::new()),
        }
    }

    async fn wait(&self) -> Result<T> {
        future::poll_fn(|cx| {
            if let Some(outcome) = self.outcome.borrow().as_ref() {
                return Poll::Ready(outcome.clone());
            }
            let mut wakers = self.wakers.borrow_mut();
            if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                wakers.push(cx.waker().clone());
            }
            Poll::Pending
        })
        .await
    }
}

type FlightMap<K, T> = RefCell<HashMap<K, Rc<Flight<T>>>>;

/// Collapses concurrent identical requests. Clone shares the in-flight map.
pub struct Deduplicator<K, T> {
    flights: Rc<FlightMap<K, T>>,
}

impl<K, T> Clone for Deduplicator<K, T> {
    fn clone(&self) -> Self {
        Self {
            flights: Rc::clone(&self.flights),
        }
    }
}

impl<K, T> Default for Deduplicator<K, T> {
    fn default() -> Self {
        Self {
            flights: Rc::new(RefCell::new(HashMap::new())),
        }
    }
}

impl<K, T> Deduplicator<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug,
    T: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight call for `key`, or start one with `factory`.
    pub async fn run<F, Fut>(&self, key: K, factory: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let existing = self.flights.borrow().get(&key).cloned();
        if let Some(flight) = existing {
            debug!("dedupe: joining in-flight {key:?}");
            return flight.wait().await;
        }

        let flight = Rc::new(Flight::new());
        self.flights
            .borrow_mut()
            .insert(key.clone(), Rc::clone(&flight));

        let mut leader = Leader {
            key: Some(key),
            flight,
            flights: &self.flights,
        };
        let outcome = factory().await;
        leader.settle(outcome.clone());
        outcome
    }

    /// Keys with a call currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.flights.borrow().len()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.flights.borrow().contains_key(key)
    }
}

/// Settles the flight exactly once, even if the leader is dropped early.
struct Leader<'a, K: Eq + Hash, T: Clone> {
    key: Option<K>,
    flight: Rc<Flight<T>>,
    flights: &'a FlightMap<K, T>,
}

impl<K: Eq + Hash, T: Clone> Leader<'_, K, T> {
    fn settle(&mut self, outcome: Result<T>) {
        let Some(key) = self.key.take() else {
            return;
        };
        {
            let mut flights = self.flights.borrow_mut();
            if flights
                .get(&key)
                .is_some_and(|current| Rc::ptr_eq(current, &self.flight))
            {
                flights.remove(&key);
            }
        }
        *self.flight.outcome.borrow_mut() = Some(outcome);
        let wakers = core::mem::take(&mut *self.flight.wakers.borrow_mut());
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<K: Eq + Hash, T: Clone> Drop for Leader<'_, K, T> {
    fn drop(&mut self) {
        self.settle(Err(Error::Cancelled));
    }
}

// ── Tests ────────────────────────────────────────────────────
