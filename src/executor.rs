//! Runs the queues a [`crate::planner::Planner`] produced.
//!
//! Each queue gets its own worker thread; within a worker, transactions run
//! sequentially and call `Table` methods directly, bypassing the `Query`
//! façade's `false`-on-error convention. No worker observes a write from
//! another worker until [`Executor::execute`] returns - workers never touch
//! the same primary key, so this is safe without record-level locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::table::Table;
use crate::transaction::{QueryOutcome, Transaction};

/// Tables a set of transactions may address, resolved by name.
pub type TableRegistry = HashMap<String, Arc<Table>>;

/// Per-transaction result: whether it committed, and the outcome of each
/// query that ran before it stopped (either because every query succeeded,
/// or because one failed and the transaction aborted).
#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub committed: bool,
    pub outcomes: Vec<QueryOutcome>,
}

pub struct Executor {
    num_threads: usize,
}

impl Executor {
    pub fn new(num_threads: usize) -> Self {
        Executor { num_threads: num_threads.max(1) }
    }

    /// Runs every queue in `groups` on its own thread against `tables`,
    /// joins all of them, and returns one [`TransactionResult`] list per
    /// queue in the same order `groups` was given, plus the number of
    /// transactions that committed overall.
    pub fn execute(&self, tables: Arc<TableRegistry>, groups: Vec<Vec<Transaction>>) -> (Vec<Vec<TransactionResult>>, usize) {
        let committed_total = AtomicUsize::new(0);
        let results: Vec<Mutex<Vec<TransactionResult>>> = groups.iter().map(|_| Mutex::new(Vec::new())).collect();

        thread::scope(|scope| {
            for (index, group) in groups.into_iter().enumerate() {
                let tables = &tables;
                let committed_total = &committed_total;
                let slot = &results[index];
                scope.spawn(move || {
                    let mut local_results = Vec::with_capacity(group.len());
                    let mut local_committed = 0usize;
                    for mut txn in group {
                        let (outcomes, committed) = txn.run(|name| tables.get(name).cloned());
                        if committed {
                            local_committed += 1;
                        }
                        local_results.push(TransactionResult { committed, outcomes });
                    }
                    committed_total.fetch_add(local_committed, Ordering::SeqCst);
                    *slot.lock().unwrap() = local_results;
                });
            }
        });

        let ordered = results.into_iter().map(|cell| cell.into_inner().unwrap()).collect();
        (ordered, committed_total.load(Ordering::SeqCst))
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Planner;

    fn registry() -> Arc<TableRegistry> {
        let mut map = HashMap::new();
        map.insert("grades".to_string(), Arc::new(Table::new("grades", 2, 0)));
        Arc::new(map)
    }

    #[test]
    fn executor_commits_disjoint_inserts_in_parallel() {
        let tables = registry();
        let mut transactions = Vec::new();
        for key in 0..50 {
            let mut txn = Transaction::new();
            txn.add_insert("grades", vec![key, key * 10]);
            transactions.push(txn);
        }

        let planner = Planner::new(4);
        let groups = planner.plan(transactions);

        let executor = Executor::new(4);
        let (_, committed) = executor.execute(tables.clone(), groups);
        assert_eq!(committed, 50);

        let table = tables.get("grades").unwrap();
        for key in 0..50 {
            assert_eq!(table.select(key, 0, &[1, 1]).unwrap()[0], vec![key, key * 10]);
        }
    }

    #[test]
    fn executor_reports_per_transaction_outcomes_in_group_order() {
        let tables = registry();
        let mut first = Transaction::new();
        first.add_insert("grades", vec![1, 100]);
        let mut second = Transaction::new();
        second.add_select("grades", 1, 0, vec![1, 1]);

        let executor = Executor::new(1);
        let (groups, committed) = executor.execute(tables, vec![vec![first, second]]);
        assert_eq!(committed, 2);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
        assert!(groups[0][0].committed);
        assert_eq!(groups[0][1].outcomes[0].rows.as_ref().unwrap()[0], vec![1, 100]);
    }
}
