//! Async utilities for coalescing concurrent work.
//!
//! Provides `SingleFlight`, which collapses concurrent requests for the same
//! piece of work into one in-flight future. Every caller that joins while the
//! flight is running receives a clone of the same output.

use futures::future::BoxFuture;
use futures::future::FutureExt;
use futures::future::Shared;
use std::future::Future;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

struct Flight<T> {
    id: u64,
    waiters: usize,
    future: Shared<BoxFuture<'static, T>>,
}

struct FlightState<T> {
    next_id: u64,
    current: Option<Flight<T>>,
}

/// Single-flight gate for one kind of work.
///
/// At most one future created through [`SingleFlight::run`] is in flight at a
/// time. Callers arriving while it runs await the same future instead of
/// starting another one. Once the flight completes the gate is cleared and the
/// next call starts a fresh flight. A flight abandoned by every waiter before
/// it completes is dropped with them, so a later call never joins a stalled
/// future.
pub struct SingleFlight<T> {
    state: Mutex<FlightState<T>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(FlightState {
                next_id: 0,
                current: None,
            }),
        }
    }
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.lock().current.is_some())
            .finish()
    }
}

impl<T> SingleFlight<T> {
    fn lock(&self) -> MutexGuard<'_, FlightState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make()` unless a flight is already running, in which case join it.
    ///
    /// `make` is only invoked by the caller that starts the flight. Dropping a
    /// caller does not cancel the flight for the others still awaiting it;
    /// dropping the last one does.
    pub async fn run<F, Fut>(&self, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (id, future) = {
            let mut state = self.lock();
            match state.current.as_mut() {
                Some(flight) => {
                    flight.waiters += 1;
                    (flight.id, flight.future.clone())
                }
                None => {
                    let id = state.next_id;
                    state.next_id = state.next_id.wrapping_add(1);
                    let future = make().boxed().shared();
                    state.current = Some(Flight {
                        id,
                        waiters: 1,
                        future: future.clone(),
                    });
                    (id, future)
                }
            }
        };

        let _clear = ClearOnDrop { gate: self, id };
        future.await
    }

    /// Whether a flight is currently registered.
    pub fn in_flight(&self) -> bool {
        self.lock().current.is_some()
    }

    fn leave(&self, id: u64) {
        let mut state = self.lock();
        let Some(flight) = state.current.as_mut().filter(|flight| flight.id == id) else {
            return;
        };
        flight.waiters = flight.waiters.saturating_sub(1);
        if flight.waiters == 0 || flight.future.peek().is_some() {
            state.current = None;
        }
    }
}

/// Releases one waiter's hold on a flight.
///
/// The gate is cleared once the flight has produced its output, or once no
/// waiter is left to drive it.
struct ClearOnDrop<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    gate: &'a SingleFlight<T>,
    id: u64,
}

impl<T> Drop for ClearOnDrop<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.gate.leave(self.id);
    }
}
