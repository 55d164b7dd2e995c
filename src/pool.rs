use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;

/// Default number of simultaneous requests per phase.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Runs `worker` over `items` with at most `concurrency` invocations in flight.
///
/// `min(concurrency, items.len())` runners each claim the next unclaimed index
/// until every index is taken, so the returned vector is in input order no
/// matter which item finished first. The token is checked before every claim.
/// After the first failure no further indices are handed out and the
/// remaining in-flight invocations are dropped, which aborts their requests.
pub async fn run_pool<'a, T, R, F, Fut>(
    items: &'a [T],
    concurrency: usize,
    token: &CancellationToken,
    worker: F,
) -> Result<Vec<R>, anyhow::Error>
where
    F: Fn(&'a T, usize) -> Fut,
    Fut: Future<Output = Result<R, anyhow::Error>>,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let runner_count = concurrency.max(1).min(items.len());
    let next_index = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);

    let next_index = &next_index;
    let failed = &failed;
    let worker = &worker;

    let runners = (0..runner_count).map(|_| async move {
        let mut finished = Vec::new();

        loop {
            if token.is_cancelled() {
                return Err(Cancelled.into());
            }

            if failed.load(Ordering::SeqCst) {
                break;
            }

            let index = next_index.fetch_add(1, Ordering::SeqCst);

            let Some(item) = items.get(index) else {
                break;
            };

            match worker(item, index).await {
                Ok(result) => finished.push((index, result)),
                Err(err) => {
                    failed.store(true, Ordering::SeqCst);
                    return Err(err);
                }
            }
        }

        Ok::<_, anyhow::Error>(finished)
    });

    let finished = futures_util::future::try_join_all(runners).await?;

    let mut slots = std::iter::repeat_with(|| None).take(items.len()).collect::<Vec<Option<R>>>();

    for (index, result) in finished.into_iter().flatten() {
        slots[index] = Some(result);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| slot.with_context(|| format!("worker pool left item {index} unprocessed")))
        .collect()
}
