//! Single-flight execution.
//!
//! The first caller for a key spawns the work as a detached task; callers that
//! arrive while it runs attach to the same shared future and observe the same
//! outcome. The entry is removed once the flight settles, so the next caller
//! for the key starts fresh.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinError;
use tracing::debug;

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Registry of in-flight operations keyed by `K`
pub struct SingleFlight<K, T, E> {
    inflight: Mutex<HashMap<K, (u64, Flight<T, E>)>>,
    generation: AtomicU64,
}

impl<K, T, E> SingleFlight<K, T, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + From<JoinError> + Send + Sync + 'static,
{
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Run `work` for `key` unless an operation for it is already in flight
    ///
    /// `work` is only invoked when this call starts a new flight. The flight
    /// keeps running to completion even if every caller stops waiting.
    ///
    /// # Errors
    ///
    /// Returns the flight's error, or `E::from(JoinError)` if the task panicked
    pub async fn run<F, Fut>(self: &Arc<Self>, key: K, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match inflight.get(&key) {
                Some((_, flight)) => {
                    debug!(?key, "joining in-flight operation");
                    flight.clone()
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let registry = Arc::clone(self);
                    let task_key = key.clone();
                    let fut = work();
                    let handle = tokio::spawn(async move {
                        let result = fut.await;
                        registry.settle(&task_key, generation);
                        result
                    });
                    let registry = Arc::clone(self);
                    let task_key = key.clone();
                    let flight = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) => {
                                registry.settle(&task_key, generation);
                                Err(E::from(e))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key, (generation, flight.clone()));
                    flight
                }
            }
        };
        flight.await
    }

    /// Number of operations in flight
    #[must_use]
    pub fn len(&self) -> usize {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing is in flight
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn settle(&self, key: &K, generation: u64) {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if inflight.get(key).is_some_and(|(g, _)| *g == generation) {
            inflight.remove(key);
        }
    }
}

impl<K, T, E> Default for SingleFlight<K, T, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + From<JoinError> + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct TestError(String);

    impl From<JoinError> for TestError {
        fn from(err: JoinError) -> Self {
            Self(err.to_string())
        }
    }

    type Registry = SingleFlight<String, u32, TestError>;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flights = Arc::new(Registry::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let callers: Vec<_> = (0..16)
            .map(|_| {
                let flights = Arc::clone(&flights);
                let runs = Arc::clone(&runs);
                tokio::spawn(async move {
                    flights
                        .run("fw.core".to_string(), move || async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(42)
                        })
                        .await
                })
            })
            .collect();

        for caller in callers {
            assert_eq!(caller.await.unwrap(), Ok(42));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn test_errors_are_shared() {
        let flights = Arc::new(Registry::new());
        let slow = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move {
                flights
                    .run("k".to_string(), || async {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Err(TestError("boom".to_string()))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let joined = flights.run("k".to_string(), || async { Ok(1) }).await;

        assert_eq!(joined, Err(TestError("boom".to_string())));
        assert_eq!(slow.await.unwrap(), Err(TestError("boom".to_string())));
    }

    #[tokio::test]
    async fn test_settled_flight_is_not_reused() {
        let flights = Arc::new(Registry::new());
        assert_eq!(flights.run("k".to_string(), || async { Ok(1) }).await, Ok(1));
        assert_eq!(flights.run("k".to_string(), || async { Ok(2) }).await, Ok(2));
    }

    #[tokio::test]
    async fn test_flight_survives_abandoned_caller() {
        let flights = Arc::new(Registry::new());
        let done = Arc::new(AtomicUsize::new(0));
        {
            let done = Arc::clone(&done);
            let abandoned = flights.run("k".to_string(), move || async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            });
            let _ = tokio::time::timeout(Duration::from_millis(1), abandoned).await;
        }

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_work_becomes_error() {
        let flights = Arc::new(Registry::new());
        let result = flights
            .run("k".to_string(), || async {
                let explode = true;
                if explode {
                    panic!("fetch task exploded");
                }
                Ok(0)
            })
            .await;
        assert!(result.is_err());
        assert!(flights.is_empty());
    }
}
