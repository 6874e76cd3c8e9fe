//! Operator tooling: read out and clear the error log.

use anyhow::{Context, Result};
use tracing::debug;

use crate::store::{Store, TxOutcome, Verdict, Write, transaction};

/// Returns every entry of the error log and clears it.
///
/// Read and delete happen under a watch, so an entry appended by a running
/// follower between the two is never deleted unseen: the commit is rejected
/// and the read is repeated.
pub fn drain_errors<S: Store + ?Sized>(store: &mut S, errors: &str) -> Result<Vec<String>> {
    loop {
        let outcome = transaction(store, errors, |store| {
            let entries = store
                .read_range(errors, 0, -1)
                .with_context(|| format!("failed to read {errors}"))?;
            Ok(Verdict::Commit(vec![Write::delete(errors)], entries))
        })?;

        match outcome {
            TxOutcome::Committed(entries) | TxOutcome::Aborted(entries) => return Ok(entries),
            TxOutcome::Conflict => {
                debug!(key = errors, "error log changed while draining, retrying")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn drain_returns_entries_in_order_and_empties_log() -> Result<()> {
        let mut store = MemoryStore::new();
        for value in ["e1", "e2", "e3"] {
            store.push_tail("errors", value)?;
        }
        let drained = drain_errors(&mut store, "errors")?;
        assert_eq!(drained, vec!["e1", "e2", "e3"]);
        assert_eq!(store.length("errors")?, 0);
        assert!(drain_errors(&mut store, "errors")?.is_empty());
        Ok(())
    }
}
