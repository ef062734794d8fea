use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use shared::Result;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

type Outcome<T> = Option<Result<T>>;

/// Handle of one in-progress load; followers subscribe to its channel.
struct Call<T> {
    outcome: watch::Receiver<Outcome<T>>,
}

enum Claim<'a, T> {
    Leader(LeaderGuard<'a, T>),
    Follower(watch::Receiver<Outcome<T>>),
}

/// Removes the call from the registry when the leader finishes or is dropped.
///
/// Dropping the sender without publishing wakes followers with an error,
/// which they treat as "leader gone" and retry.
struct LeaderGuard<'a, T> {
    flight: &'a SingleFlight<T>,
    key: String,
    call: Arc<Call<T>>,
    publisher: watch::Sender<Outcome<T>>,
}

impl<T> LeaderGuard<'_, T> {
    fn publish(&self, outcome: Outcome<T>) {
        self.publisher.send_replace(outcome);
    }
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        self.flight
            .calls
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, &self.call));
    }
}

/// Request coalescing keyed by string
///
/// At most one `load` runs per key at a time; every caller that arrives while
/// it runs receives a clone of the same result, error included. The registry
/// entry is removed as soon as the load completes, so nothing is memoised
/// here and a failed load is retried by the next caller.
pub struct SingleFlight<T> {
    calls: DashMap<String, Arc<Call<T>>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    pub async fn execute<F, Fut>(&self, key: &str, load: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            match self.claim(key) {
                Claim::Leader(guard) => {
                    let outcome = load().await;
                    guard.publish(Some(outcome.clone()));
                    return outcome;
                }
                Claim::Follower(receiver) => {
                    debug!("Joining in-flight load for key '{}'", key);
                    match Self::wait(receiver).await {
                        Some(outcome) => return outcome,
                        None => {
                            warn!("Leader for key '{}' abandoned its load, retrying", key);
                        }
                    }
                }
            }
        }
    }

    /// Number of loads currently running.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }

    fn claim(&self, key: &str) -> Claim<'_, T> {
        match self.calls.entry(key.to_string()) {
            Entry::Occupied(entry) => Claim::Follower(entry.get().outcome.clone()),
            Entry::Vacant(entry) => {
                let (publisher, outcome) = watch::channel(None);
                let call = Arc::new(Call { outcome });
                entry.insert(Arc::clone(&call));
                Claim::Leader(LeaderGuard {
                    flight: self,
                    key: key.to_string(),
                    call,
                    publisher,
                })
            }
        }
    }

    async fn wait(mut receiver: watch::Receiver<Outcome<T>>) -> Outcome<T> {
        match receiver.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        }
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.calls.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_concurrent_calls_share_one_load() {
        let flight = SingleFlight::new();
        let loads = AtomicUsize::new(0);
        let loads = &loads;

        // join_all polls every call once before any can finish
        let calls = (0..1000).map(|_| {
            flight.execute("goods:id::1", move || async move {
                loads.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                Ok(42_i64)
            })
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 1000);
        assert!(results.iter().all(|r| r == &Ok(42)));
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_spawned_tasks_share_one_load() {
        let flight = Arc::new(SingleFlight::new());
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..64 {
            let flight = Arc::clone(&flight);
            let loads = Arc::clone(&loads);
            handles.push(tokio::spawn(async move {
                flight
                    .execute("hot", || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(200)).await;
                        Ok("value".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "value");
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_caller_and_is_not_sticky() {
        let flight: SingleFlight<i64> = SingleFlight::new();
        let loads = AtomicUsize::new(0);
        let loads = &loads;

        let calls = (0..10).map(|_| {
            flight.execute("broken", move || async move {
                loads.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                Err(Error::LoadFailure("store offline".to_string()))
            })
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(
                result,
                Err(Error::LoadFailure("store offline".to_string()))
            );
        }

        // The next caller becomes a fresh leader
        let retried = flight
            .execute("broken", move || async move {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;
        assert_eq!(retried, Ok(7));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sequential_calls_are_not_memoised() {
        let flight = SingleFlight::new();
        let loads = AtomicUsize::new(0);
        let loads = &loads;

        for _ in 0..3 {
            flight
                .execute("k", move || async move {
                    Ok(loads.fetch_add(1, Ordering::SeqCst))
                })
                .await
                .unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let flight = SingleFlight::new();
        let loads = AtomicUsize::new(0);
        let loads = &loads;
        let flight = &flight;

        let calls = (0..5).map(|i| {
            let key = format!("key-{}", i);
            async move {
                flight
                    .execute(&key, move || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(5)).await;
                        Ok(i)
                    })
                    .await
            }
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(loads.load(Ordering::SeqCst), 5);
        assert_eq!(
            results.into_iter().map(|r| r.unwrap()).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
    }

    #[tokio::test]
    async fn test_cancelled_follower_does_not_disturb_leader() {
        let flight = SingleFlight::new();

        let leader = flight.execute("k", || async {
            sleep(Duration::from_millis(50)).await;
            Ok(1)
        });
        let follower = async {
            sleep(Duration::from_millis(5)).await;
            tokio::time::timeout(
                Duration::from_millis(5),
                flight.execute("k", || async { Ok(2) }),
            )
            .await
        };

        let (leader, follower) = tokio::join!(leader, follower);
        assert_eq!(leader, Ok(1));
        assert!(follower.is_err());
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_leader_hands_over_to_follower() {
        let flight = SingleFlight::new();

        let leader = tokio::time::timeout(
            Duration::from_millis(30),
            flight.execute("k", || futures::future::pending::<Result<i32>>()),
        );
        let follower = async {
            sleep(Duration::from_millis(5)).await;
            flight.execute("k", || async { Ok(9) }).await
        };

        let (leader, follower) = tokio::join!(leader, follower);
        assert!(leader.is_err());
        assert_eq!(follower, Ok(9));
        assert_eq!(flight.in_flight(), 0);
    }
}
