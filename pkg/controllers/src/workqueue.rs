//! Bounded work queue drained by a fixed pool of workers.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, warn};

/// Process every distinct key once with `workers` concurrent tasks and wait
/// for all of them. A failing key is logged and does not stop the others.
///
/// Returns the number of keys whose handler failed.
pub async fn run_workers<F, Fut>(
    name: &'static str,
    keys: Vec<String>,
    workers: usize,
    handler: F,
) -> usize
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut seen = HashSet::new();
    let keys: Vec<String> = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();
    if keys.is_empty() {
        return 0;
    }

    let workers = workers.clamp(1, keys.len());
    let (tx, rx) = mpsc::channel::<String>(workers);
    let rx = Arc::new(Mutex::new(rx));
    let handler = Arc::new(handler);

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let rx = rx.clone();
        let handler = handler.clone();
        handles.push(tokio::spawn(async move {
            let mut failures = 0usize;
            loop {
                let next = rx.lock().await.recv().await;
                let Some(key) = next else {
                    break;
                };
                if let Err(e) = handler(key.clone()).await {
                    warn!("{} sync failed for {}: {:#}", name, key, e);
                    failures += 1;
                }
            }
            failures
        }));
    }

    for key in keys {
        if tx.send(key).await.is_err() {
            break;
        }
    }
    drop(tx);

    let mut failures = 0;
    for handle in handles {
        match handle.await {
            Ok(n) => failures += n,
            Err(e) => {
                error!("{} worker panicked: {}", name, e);
                failures += 1;
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_distinct_key_processed_once() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let keys = vec!["a", "b", "a", "c", "b"]
            .into_iter()
            .map(String::from)
            .collect();

        let recorded = seen.clone();
        let failures = run_workers("test", keys, 2, move |key| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().unwrap().push(key);
                Ok(())
            }
        })
        .await;

        assert_eq!(failures, 0);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_keys() {
        let done = Arc::new(AtomicUsize::new(0));
        let keys = (0..10).map(|i| format!("p{}", i)).collect();

        let counter = done.clone();
        let failures = run_workers("test", keys, 3, move |key| {
            let counter = counter.clone();
            async move {
                if key == "p4" {
                    anyhow::bail!("boom");
                }
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(failures, 1);
        assert_eq!(done.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_workers() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let keys = (0..12).map(|i| format!("p{}", i)).collect();

        let (a, p) = (active.clone(), peak.clone());
        run_workers("test", keys, 4, move |_| {
            let (active, peak) = (a.clone(), p.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let failures = run_workers("test", Vec::new(), 4, |_| async { Ok(()) }).await;
        assert_eq!(failures, 0);
    }
}
