//! Bounded worker pool shared by both classification stages.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::{PipelineError, Result};

/// Run `work` over `inputs` with at most `width` tasks in flight.
///
/// Outputs come back in completion order. A task that panics is logged
/// and counted in `failed`; it never cancels its siblings.
pub async fn run_bounded<I, O, F, Fut>(inputs: Vec<I>, width: usize, work: F) -> Result<PoolOutput<O>>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = O> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(width.max(1)));
    let mut tasks = JoinSet::new();

    for input in inputs {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))?;
        let fut = work(input);
        tasks.spawn(async move {
            let _permit = permit;
            fut.await
        });
    }

    let mut output = PoolOutput {
        completed: Vec::new(),
        failed: 0,
    };
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(value) => output.completed.push(value),
            Err(e) => {
                warn!(error = %e, "Worker task failed");
                output.failed += 1;
            }
        }
    }
    Ok(output)
}

/// Results of one pool run.
#[derive(Debug)]
pub struct PoolOutput<O> {
    pub completed: Vec<O>,
    /// Tasks that panicked or were cancelled
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_width_bounds_in_flight_tasks() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let output = run_bounded((0..12).collect(), 3, |n: usize| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                n * 2
            }
        })
        .await
        .unwrap();

        assert_eq!(output.completed.len(), 12);
        assert_eq!(output.failed, 0);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_cancel_siblings() {
        let output = run_bounded(vec![1, 2, 3], 2, |n: u32| async move {
            if n == 2 {
                panic!("boom");
            }
            n
        })
        .await
        .unwrap();

        let mut completed = output.completed;
        completed.sort();
        assert_eq!(completed, vec![1, 3]);
        assert_eq!(output.failed, 1);
    }
}
