//! Transaction Management
//!
//! A transaction is a staging boundary around a block of inserts and
//! property writes. Every write made while a transaction is open is
//! journaled as (fact, property, prior history length). Closing the
//! outermost boundary successfully clears the journal. Failing it (an error
//! from the block, a rule violation, or a panic) replays the journal
//! backwards, truncating each history to its prior length, and cuts the
//! fact sequence back to the size it had when the boundary opened.
//!
//! Transactions on one store are serialized: a reentrant lock is held from
//! the outermost `begin` to its commit or rollback, so nested blocks on the
//! same thread pass through. Readers and writers outside any transaction are
//! not blocked and may observe, or be rolled back with, in-flight changes.

use crate::error::Result;
use crate::fact::{Change, Fact, FactCell, FactListener};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a closed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Boundary is open
    Active,
    /// Changes stand
    Committed,
    /// Changes were undone
    Aborted,
}

/// Counters over the life of a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStats {
    pub committed: u64,
    pub rolled_back: u64,
    /// Nesting depth right now, 0 outside any transaction
    pub depth: usize,
}

#[derive(Default)]
struct Journal {
    depth: usize,
    base_len: usize,
    writes: Vec<(Arc<FactCell>, Change)>,
}

/// Transaction manager - tracks nesting and journals writes
pub struct TransactionManager {
    serial: ReentrantMutex<()>,
    journal: Mutex<Journal>,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl TransactionManager {
    pub fn new() -> Self {
        TransactionManager {
            serial: ReentrantMutex::new(()),
            journal: Mutex::new(Journal::default()),
            committed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
        }
    }

    pub fn depth(&self) -> usize {
        self.journal.lock().depth
    }

    pub fn in_transaction(&self) -> bool {
        self.depth() > 0
    }

    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            depth: self.depth(),
        }
    }

    /// Open a boundary over `facts`. The returned guard rolls back on drop
    /// unless committed.
    pub fn begin<'a>(&'a self, facts: &'a RwLock<Vec<Fact>>) -> TransactionGuard<'a> {
        let serial = self.serial.lock();
        let outermost = {
            let mut journal = self.journal.lock();
            if journal.depth == 0 {
                journal.base_len = facts.read().len();
                journal.writes.clear();
            }
            journal.depth += 1;
            journal.depth == 1
        };
        if outermost {
            debug!(base_len = facts.read().len(), "Transaction started");
        }
        TransactionGuard {
            manager: self,
            facts,
            outermost,
            state: TransactionState::Active,
            _serial: serial,
        }
    }

    fn close(&self, facts: &RwLock<Vec<Fact>>, outermost: bool, commit: bool) {
        let mut journal = self.journal.lock();
        journal.depth = journal.depth.saturating_sub(1);
        if !outermost {
            return;
        }
        let writes = std::mem::take(&mut journal.writes);
        if commit {
            self.committed.fetch_add(1, Ordering::Relaxed);
            debug!(writes = writes.len(), "Transaction committed");
            return;
        }
        for (cell, change) in writes.iter().rev() {
            cell.revert(change);
        }
        let mut facts = facts.write();
        let dropped = facts.len().saturating_sub(journal.base_len);
        facts.truncate(journal.base_len);
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
        warn!(
            writes = writes.len(),
            dropped_facts = dropped,
            "Transaction rolled back"
        );
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Journals writes while a boundary is open
impl FactListener for TransactionManager {
    fn on_write(&self, fact: &Fact, change: &Change) -> Result<()> {
        let mut journal = self.journal.lock();
        if journal.depth > 0 {
            journal.writes.push((Arc::clone(fact.cell()), change.clone()));
        }
        Ok(())
    }
}

/// An open boundary. Dropping it without [`commit`](Self::commit) aborts,
/// which also covers unwinding out of a panicking block.
pub struct TransactionGuard<'a> {
    manager: &'a TransactionManager,
    facts: &'a RwLock<Vec<Fact>>,
    outermost: bool,
    state: TransactionState,
    _serial: ReentrantMutexGuard<'a, ()>,
}

impl<'a> TransactionGuard<'a> {
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }

    pub fn commit(mut self) -> TransactionState {
        self.manager.close(self.facts, self.outermost, true);
        self.state = TransactionState::Committed;
        self.state
    }

    pub fn rollback(mut self) -> TransactionState {
        self.abort();
        self.state
    }

    fn abort(&mut self) {
        if self.state == TransactionState::Active {
            self.manager.close(self.facts, self.outermost, false);
            self.state = TransactionState::Aborted;
        }
    }
}

impl<'a> Drop for TransactionGuard<'a> {
    fn drop(&mut self) {
        self.abort();
    }
}
