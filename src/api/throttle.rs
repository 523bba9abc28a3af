//! In-flight request throttle
//!
//! Counts the requests currently being served, anything above the ceiling is turned away with
//! a `429 Too Many Requests`

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use axum::extract::Request;
use axum::extract::State;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;

use super::Error;

/// Shared counter of in-flight requests
#[derive(Clone, Debug)]
pub struct InFlight {
    current: Arc<AtomicUsize>,
    max: usize,
}

impl InFlight {
    /// Allow at most `max` requests at the same time
    pub fn new(max: usize) -> Self {
        Self {
            current: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    /// Take a slot, released when the guard is dropped
    pub fn try_acquire(&self) -> Option<InFlightGuard> {
        self.current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max).then_some(current + 1)
            })
            .ok()
            .map(|_| InFlightGuard {
                current: Arc::clone(&self.current),
            })
    }

    /// Requests being served right now
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }
}

/// A taken slot
#[derive(Debug)]
pub struct InFlightGuard {
    current: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Middleware turning away requests above the ceiling
pub async fn throttle(State(in_flight): State<InFlight>, request: Request, next: Next) -> Response {
    let Some(_guard) = in_flight.try_acquire() else {
        tracing::warn!(
            current = in_flight.current(),
            max = in_flight.max,
            "Too many requests in flight"
        );

        return Error::too_many_requests("Too many requests").into_response();
    };

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_released_on_drop() {
        let in_flight = InFlight::new(2);

        let first = in_flight.try_acquire();
        let second = in_flight.try_acquire();

        assert!(first.is_some());
        assert!(second.is_some());
        assert!(in_flight.try_acquire().is_none());
        assert_eq!(2, in_flight.current());

        drop(first);

        assert_eq!(1, in_flight.current());
        assert!(in_flight.try_acquire().is_some());
        assert_eq!(1, in_flight.current());
    }

    #[test]
    fn test_counters_are_per_instance() {
        let first = InFlight::new(1);
        let second = InFlight::new(1);

        let _guard = first.try_acquire();

        assert!(first.try_acquire().is_none());
        assert!(second.try_acquire().is_some());
    }
}
