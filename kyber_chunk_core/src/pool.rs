//! Order-preserving parallel map over independent chunks.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::trace;

/// Resolves a configured worker count; `0` means one worker per CPU.
pub fn effective_workers(configured: usize) -> usize {
    if configured == 0 {
        thread::available_parallelism().map_or(1, NonZeroUsize::get)
    } else {
        configured
    }
}

/// Applies `f` to every item on up to `workers` scoped threads and returns
/// the results in input order. Each worker owns one contiguous batch. On
/// failure the other workers stop at their next item and the error with the
/// lowest index among the items that ran is returned.
pub fn map_ordered<T, U, E, F>(items: &[T], workers: usize, f: F) -> Result<Vec<U>, E>
where
    T: Sync,
    U: Send,
    E: Send,
    F: Fn(usize, &T) -> Result<U, E> + Sync,
{
    let workers = workers.max(1).min(items.len());
    if workers <= 1 {
        return items
            .iter()
            .enumerate()
            .map(|(index, item)| f(index, item))
            .collect();
    }

    let batch = items.len().div_ceil(workers);
    let abort = AtomicBool::new(false);
    let outcomes: Vec<Result<Vec<U>, E>> = thread::scope(|scope| {
        let handles: Vec<_> = items
            .chunks(batch)
            .enumerate()
            .map(|(batch_index, slice)| {
                let f = &f;
                let abort = &abort;
                scope.spawn(move || {
                    let offset = batch_index * batch;
                    trace!("worker {batch_index} takes chunks {offset}..{}", offset + slice.len());
                    let mut out = Vec::with_capacity(slice.len());
                    for (position, item) in slice.iter().enumerate() {
                        if abort.load(Ordering::Relaxed) {
                            break;
                        }
                        match f(offset + position, item) {
                            Ok(value) => out.push(value),
                            Err(err) => {
                                abort.store(true, Ordering::Relaxed);
                                return Err(err);
                            }
                        }
                    }
                    Ok(out)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(outcome) => outcome,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });

    // Batches are contiguous and joined in order.
    let mut results = Vec::with_capacity(items.len());
    let mut first_error = None;
    for outcome in outcomes {
        match outcome {
            Ok(values) => results.extend(values),
            Err(err) => {
                first_error = Some(err);
                break;
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(results),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_input_order() {
        let items: Vec<u32> = (0..97).collect();
        for workers in [1, 2, 3, 8, 200] {
            let out: Result<Vec<u32>, ()> = map_ordered(&items, workers, |index, item| {
                assert_eq!(index as u32, *item);
                Ok(item * 2)
            });
            assert_eq!(out.unwrap(), items.iter().map(|i| i * 2).collect::<Vec<_>>());
        }
    }

    #[test]
    fn parallel_failure_discards_partial_output() {
        let items: Vec<usize> = (0..64).collect();
        let out: Result<Vec<usize>, usize> = map_ordered(&items, 4, |index, _| {
            if index == 20 { Err(index) } else { Ok(index) }
        });
        assert_eq!(out.unwrap_err(), 20);
    }

    #[test]
    fn serial_path_stops_at_first_error() {
        let items = [1, 2, 3];
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let out: Result<Vec<i32>, &str> = map_ordered(&items, 1, |_, item| {
            calls.fetch_add(1, Ordering::SeqCst);
            if *item == 2 { Err("boom") } else { Ok(*item) }
        });
        assert_eq!(out.unwrap_err(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let items: [u8; 0] = [];
        let out: Result<Vec<u8>, ()> = map_ordered(&items, 4, |_, item| Ok(*item));
        assert!(out.unwrap().is_empty());
    }

    #[test]
    fn zero_means_available_parallelism() {
        assert!(effective_workers(0) >= 1);
        assert_eq!(effective_workers(3), 3);
    }
}
