//! Batch/stream coordination.
//!
//! Input is pulled lazily: a batch is collected only when the previous one
//! has been executed and handed to the consumer. Each batch is applied inside
//! a savepoint. A failing batch is rolled back whole and ends the cursor;
//! batches executed before it stay applied.

use std::cell::Cell;
use std::marker::PhantomData;

use tracing::{debug, warn};

use crate::config::validate_batch_size;
use crate::error::Result;
use crate::exec::{Session, StatementExecutor};
use crate::value::Record;

/// Splits an iterator into `batch_size`-long vectors; the last may be shorter.
pub fn partition<I: IntoIterator>(input: I, batch_size: usize) -> Result<Batches<I::IntoIter>> {
    validate_batch_size(batch_size)?;
    Ok(Batches {
        source: input.into_iter(),
        size: batch_size,
    })
}

/// Lazy fixed-size partitioning of an input sequence.
#[derive(Debug)]
pub struct Batches<I> {
    source: I,
    size: usize,
}

impl<I> Batches<I> {
    pub fn batch_size(&self) -> usize {
        self.size
    }
}

impl<I: Iterator> Iterator for Batches<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<_> = self.source.by_ref().take(self.size).collect();
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

/// Write applied to each record of a batch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BatchOp {
    /// One multi-row `INSERT` per batch.
    Insert,
    /// One record `UPDATE` per record.
    Update,
    /// One record `DELETE` per record.
    Delete,
}

/// Result of one executed batch.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchOutcome {
    /// Zero-based batch position.
    pub index: usize,
    /// The batch's records after the write (generated keys and versions
    /// filled in).
    pub records: Vec<Record>,
    pub affected: u64,
}

/// Totals of a drained cursor.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BatchSummary {
    pub batches: usize,
    pub affected: u64,
}

/// Single-consumer, forward-only cursor executing one batch per step.
///
/// The cursor borrows its session mutably and is `!Sync`. Dropping it before
/// exhaustion stops pulling input; nothing further is executed.
pub struct BatchCursor<'s, E, I> {
    session: &'s mut Session<E>,
    op: BatchOp,
    batches: Batches<I>,
    index: usize,
    done: bool,
    failed: Option<Vec<Record>>,
    _unsync: PhantomData<Cell<()>>,
}

impl<'s, E, I> BatchCursor<'s, E, I> {
    pub(crate) fn new(session: &'s mut Session<E>, op: BatchOp, batches: Batches<I>) -> Self {
        Self {
            session,
            op,
            batches,
            index: 0,
            done: false,
            failed: None,
            _unsync: PhantomData,
        }
    }

    /// Batches executed so far, including a failed one.
    pub fn executed(&self) -> usize {
        self.index
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Records of the batch that failed, as they were handed in.
    pub fn take_failed(&mut self) -> Option<Vec<Record>> {
        self.failed.take()
    }

    /// Stops the cursor without pulling further input.
    pub fn close(mut self) -> usize {
        self.done = true;
        debug!(op = ?self.op, batches = self.index, "batch.cursor.closed");
        self.index
    }
}

impl<E, I> BatchCursor<'_, E, I>
where
    E: StatementExecutor,
    I: Iterator<Item = Record>,
{
    /// Executes every remaining batch, stopping at the first failure.
    pub fn drain(mut self) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        for outcome in self.by_ref() {
            let outcome = outcome?;
            summary.batches += 1;
            summary.affected += outcome.affected;
        }
        Ok(summary)
    }
}

impl<E, I> Iterator for BatchCursor<'_, E, I>
where
    E: StatementExecutor,
    I: Iterator<Item = Record>,
{
    type Item = Result<BatchOutcome>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(batch) = self.batches.next() else {
            self.done = true;
            debug!(op = ?self.op, batches = self.index, "batch.cursor.exhausted");
            return None;
        };
        let index = self.index;
        self.index += 1;
        let rows = batch.len();
        match self.session.apply_batch(self.op, batch) {
            Ok((records, affected)) => {
                debug!(op = ?self.op, index, rows, affected, "batch.flush");
                Some(Ok(BatchOutcome {
                    index,
                    records,
                    affected,
                }))
            }
            Err((err, records)) => {
                self.done = true;
                self.failed = Some(records);
                warn!(op = ?self.op, index, rows, error = %err, "batch.flush.failed");
                Some(Err(err))
            }
        }
    }
}

impl<E, I> Drop for BatchCursor<'_, E, I> {
    fn drop(&mut self) {
        if !self.done {
            debug!(op = ?self.op, batches = self.index, "batch.cursor.abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_lazily_with_short_tail() {
        let pulled = Cell::new(0);
        let source = (0..5).inspect(|_| pulled.set(pulled.get() + 1));
        let mut batches = partition(source, 2).expect("positive size");
        assert_eq!(batches.next(), Some(vec![0, 1]));
        assert_eq!(pulled.get(), 2);
        assert_eq!(batches.next(), Some(vec![2, 3]));
        assert_eq!(batches.next(), Some(vec![4]));
        assert_eq!(batches.next(), None);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = partition(Vec::<i32>::new(), 0).unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }
}
