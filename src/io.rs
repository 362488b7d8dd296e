//! Parallel I/O Orchestrator
//!
//! Scatter-gather of per-disk operations. Each operation runs on its own
//! scoped worker thread; every worker is joined before the call returns, on
//! success, failure and panic alike. Workers only write their own result
//! slot.
//!
//! ```text
//!   items[0..N] ──spawn──▶ worker 0 … worker N-1
//!                               │ join all
//!                               ▼
//!                     Vec<Result<R>>  ──▶ write_all / read_all / delete_all
//! ```

use tracing::debug;

use crate::error::{Error, Result};

/// Hard ceiling on workers per call
pub const MAX_FANOUT: usize = 32;

/// Aggregate failure of a parallel write
#[derive(Debug)]
pub struct WriteFailure {
    /// Number of operations that failed
    pub failed: usize,
    /// Number of operations attempted
    pub total: usize,
    /// `(item index, error)` per failure
    pub errors: Vec<(usize, Error)>,
}

impl WriteFailure {
    /// Collapse into one error; bad requests stay InvalidArgument
    pub fn into_error(mut self) -> Error {
        if let Some(pos) = self
            .errors
            .iter()
            .position(|(_, e)| matches!(e, Error::InvalidArgument(_)))
        {
            return self.errors.swap_remove(pos).1;
        }
        Error::Quorum {
            available: self.total - self.failed,
            required: self.total,
        }
    }
}

/// Gathered chunks of a parallel read; holes are `None`
#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub chunks: Vec<Option<Vec<u8>>>,
    pub succeeded: usize,
    pub errors: Vec<(usize, Error)>,
}

/// Per-target results of a parallel delete
#[derive(Debug, Default)]
pub struct DeleteOutcome {
    pub deleted: usize,
    /// Targets that had nothing to delete
    pub missing: usize,
    pub errors: Vec<(usize, Error)>,
}

/// Bounded scoped-thread fan-out
#[derive(Debug, Clone, Copy)]
pub struct ParallelIo {
    max_fanout: usize,
}

impl Default for ParallelIo {
    fn default() -> Self {
        Self {
            max_fanout: MAX_FANOUT,
        }
    }
}

impl ParallelIo {
    pub fn new(max_fanout: usize) -> Self {
        Self {
            max_fanout: max_fanout.clamp(1, MAX_FANOUT),
        }
    }

    pub fn max_fanout(&self) -> usize {
        self.max_fanout
    }

    /// Run `op` once per item concurrently and collect results in item order
    pub fn fan_out<T, R, F>(&self, items: &[T], op: F) -> Result<Vec<Result<R>>>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> Result<R> + Sync,
    {
        if items.len() > self.max_fanout {
            return Err(Error::InvalidArgument(format!(
                "fan-out of {} exceeds limit {}",
                items.len(),
                self.max_fanout
            )));
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let op = &op;
        crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = items
                .iter()
                .enumerate()
                .map(|(i, item)| scope.spawn(move |_| op(i, item)))
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(i, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(Error::Internal(format!("I/O worker {} panicked", i)))
                    })
                })
                .collect::<Vec<_>>()
        })
        .map_err(|_| Error::Internal("I/O scope panicked".to_string()))
    }

    /// All-or-nothing parallel write
    pub fn write_all<T, F>(&self, items: &[T], op: F) -> std::result::Result<(), WriteFailure>
    where
        T: Sync,
        F: Fn(usize, &T) -> Result<()> + Sync,
    {
        let total = items.len();
        let results = self.fan_out(items, op).map_err(|e| WriteFailure {
            failed: total,
            total,
            errors: vec![(0, e)],
        })?;

        let errors: Vec<(usize, Error)> = results
            .into_iter()
            .enumerate()
            .filter_map(|(i, r)| r.err().map(|e| (i, e)))
            .collect();

        debug!(total, failed = errors.len(), "Parallel write finished");
        if errors.is_empty() {
            Ok(())
        } else {
            Err(WriteFailure {
                failed: errors.len(),
                total,
                errors,
            })
        }
    }

    /// Parallel read that never fails on unavailable targets
    pub fn read_all<T, F>(&self, items: &[T], op: F) -> Result<ReadOutcome>
    where
        T: Sync,
        F: Fn(usize, &T) -> Result<Vec<u8>> + Sync,
    {
        let results = self.fan_out(items, op)?;
        let mut outcome = ReadOutcome {
            chunks: Vec::with_capacity(results.len()),
            ..Default::default()
        };
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(bytes) => {
                    outcome.succeeded += 1;
                    outcome.chunks.push(Some(bytes));
                }
                Err(e) => {
                    outcome.chunks.push(None);
                    outcome.errors.push((i, e));
                }
            }
        }
        debug!(
            total = outcome.chunks.len(),
            succeeded = outcome.succeeded,
            "Parallel read finished"
        );
        Ok(outcome)
    }

    /// Best-effort parallel delete
    pub fn delete_all<T, F>(&self, items: &[T], op: F) -> Result<DeleteOutcome>
    where
        T: Sync,
        F: Fn(usize, &T) -> Result<()> + Sync,
    {
        let results = self.fan_out(items, op)?;
        let mut outcome = DeleteOutcome::default();
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(()) => outcome.deleted += 1,
                Err(e) if e.is_not_found() => outcome.missing += 1,
                Err(e) => outcome.errors.push((i, e)),
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fan_out_preserves_order() {
        let io = ParallelIo::default();
        let items: Vec<usize> = (0..16).collect();
        let results = io.fan_out(&items, |i, x| Ok(i * 100 + x)).unwrap();
        let values: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..16).map(|i| i * 101).collect::<Vec<_>>());
    }

    #[test]
    fn test_fan_out_limit() {
        let io = ParallelIo::new(4);
        let items = vec![0u8; 5];
        assert!(matches!(
            io.fan_out(&items, |_, _| Ok(())),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(ParallelIo::new(1000).max_fanout(), MAX_FANOUT);
    }

    #[test]
    fn test_write_all_runs_every_op() {
        let io = ParallelIo::default();
        let ran = AtomicUsize::new(0);
        let items: Vec<usize> = (0..6).collect();

        let failure = io
            .write_all(&items, |i, _| {
                ran.fetch_add(1, Ordering::SeqCst);
                if i == 2 || i == 4 {
                    Err(Error::NotFound(format!("disk {}", i)))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();

        assert_eq!(ran.load(Ordering::SeqCst), 6);
        assert_eq!(failure.failed, 2);
        assert_eq!(
            failure.errors.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![2, 4]
        );
        assert!(matches!(
            failure.into_error(),
            Error::Quorum {
                available: 4,
                required: 6
            }
        ));
    }

    #[test]
    fn test_panicking_worker_is_a_failure() {
        let io = ParallelIo::default();
        let items: Vec<usize> = (0..3).collect();
        let failure = io
            .write_all(&items, |i, _| {
                if i == 1 {
                    panic!("disk exploded");
                }
                Ok(())
            })
            .unwrap_err();
        assert_eq!(failure.failed, 1);
        assert!(matches!(failure.errors[0], (1, Error::Internal(_))));
    }

    #[test]
    fn test_read_all_leaves_holes() {
        let io = ParallelIo::default();
        let items: Vec<usize> = (0..5).collect();
        let outcome = io
            .read_all(&items, |i, _| {
                if i % 2 == 0 {
                    Ok(vec![i as u8])
                } else {
                    Err(Error::NotFound("gone".into()))
                }
            })
            .unwrap();
        assert_eq!(outcome.succeeded, 3);
        assert_eq!(outcome.chunks[1], None);
        assert_eq!(outcome.chunks[4], Some(vec![4]));
    }

    #[test]
    fn test_delete_all_classifies() {
        let io = ParallelIo::default();
        let items: Vec<usize> = (0..3).collect();
        let outcome = io
            .delete_all(&items, |i, _| match i {
                0 => Ok(()),
                1 => Err(Error::NotFound("none".into())),
                _ => Err(Error::Io(std::io::Error::other("disk offline"))),
            })
            .unwrap();
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.missing, 1);
        assert_eq!(outcome.errors.len(), 1);
    }
}
