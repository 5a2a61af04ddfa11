//! Coalesce concurrent callers onto one in-progress operation.
//!
//! The slot holds a [`Shared`] future. The first caller installs it; later
//! callers clone it. Any clone can drive it to completion, so a caller that
//! is dropped mid-flight does not strand the others. The slot is cleared
//! from inside the shared future before it yields its output, so once any
//! waiter observes a result the next `run` starts a fresh flight.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use camp_core::CampResult;
use futures::future::{BoxFuture, FutureExt, Shared};

type Flight<T> = Shared<BoxFuture<'static, CampResult<T>>>;

pub struct SingleFlight<T> {
    slot: Arc<Mutex<Option<(u64, Flight<T>)>>>,
    next_id: AtomicU64,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the current flight, or start one from `make` if none is running.
    ///
    /// `make` runs under the slot lock and must only construct the future.
    pub async fn run<F, Fut>(&self, make: F) -> CampResult<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = CampResult<T>> + Send + 'static,
    {
        let flight = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some((_, flight)) => flight.clone(),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let work = make();
                    let slot_ref = Arc::clone(&self.slot);
                    let flight = async move {
                        let out = work.await;
                        let mut slot = slot_ref.lock().unwrap_or_else(PoisonError::into_inner);
                        if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
                            *slot = None;
                        }
                        out
                    }
                    .boxed()
                    .shared();
                    *slot = Some((id, flight.clone()));
                    flight
                }
            }
        };
        flight.await
    }

    pub fn in_flight(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
