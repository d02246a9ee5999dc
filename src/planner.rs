//! Deterministic partitioning of transactions into conflict-free groups.
//!
//! The planner is what lets [`crate::executor`] run workers in parallel
//! without record-level locks: it assigns each transaction to a partition by
//! `key mod num_threads`, then merges any partitions a single transaction
//! spans (or that a range query like `Sum`/`SumVersion` could touch) with a
//! union-find, so that two transactions landing in the same output queue are
//! the only ones ever allowed to share a primary key.

use std::collections::HashMap;

use crate::transaction::Transaction;

/// Union-find over `0..num_threads` partition labels.
struct DisjointPartitions {
    parent: Vec<usize>,
}

impl DisjointPartitions {
    fn new(num_threads: usize) -> Self {
        DisjointPartitions { parent: (0..num_threads.max(1)).collect() }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }

    fn union_all(&mut self) {
        for p in 1..self.parent.len() {
            self.union(0, p);
        }
    }
}

/// Partitions touched by one query's key range.
///
/// A point query touches exactly one partition. A range query (`Sum`,
/// `SumVersion`) touches `key mod num_threads` for every key in
/// `[start, end]`; once the range spans `num_threads` or more consecutive
/// keys it necessarily covers every partition, since the residues repeat
/// with period `num_threads`, so there is no need to enumerate further.
fn partitions_touched(start: i64, end: i64, num_threads: usize) -> Vec<usize> {
    let num_threads = num_threads.max(1);
    if end < start {
        return Vec::new();
    }
    let span = (end - start + 1) as u128;
    if span >= num_threads as u128 {
        return (0..num_threads).collect();
    }
    let mut seen = Vec::new();
    let mut key = start;
    while key <= end {
        let partition = key.rem_euclid(num_threads as i64) as usize;
        if !seen.contains(&partition) {
            seen.push(partition);
        }
        key += 1;
    }
    seen
}

/// Partitions transactions into `num_threads` conflict-free output queues.
pub struct Planner {
    num_threads: usize,
}

impl Planner {
    pub fn new(num_threads: usize) -> Self {
        Planner { num_threads: num_threads.max(1) }
    }

    /// Assigns every transaction to a partition, merging partitions that any
    /// single transaction spans, then groups transactions by their final
    /// partition root. The returned queues preserve each transaction's
    /// relative input order within a queue and number at most
    /// `num_threads`, though a workload with no multi-key spans can produce
    /// exactly `num_threads` queues with zero cross-queue key overlap.
    pub fn plan(&self, transactions: Vec<Transaction>) -> Vec<Vec<Transaction>> {
        let mut partitions = DisjointPartitions::new(self.num_threads);
        let mut touched_by_txn: Vec<Vec<usize>> = Vec::with_capacity(transactions.len());

        for txn in &transactions {
            let mut touched = Vec::new();
            for query in &txn.queries {
                match query.key_range() {
                    Some((start, end)) => {
                        for p in partitions_touched(start, end, self.num_threads) {
                            if !touched.contains(&p) {
                                touched.push(p);
                            }
                        }
                    }
                    None => {
                        // Insert queries have no pre-existing key to
                        // partition on; they run wherever the rest of the
                        // transaction lands, or partition 0 if the
                        // transaction is inserts only.
                    }
                }
            }
            if touched.is_empty() {
                touched.push(0);
            }
            if touched.len() >= self.num_threads {
                partitions.union_all();
            } else {
                let first = touched[0];
                for &p in &touched[1..] {
                    partitions.union(first, p);
                }
            }
            touched_by_txn.push(touched);
        }

        let mut groups: HashMap<usize, Vec<Transaction>> = HashMap::new();
        for (txn, touched) in transactions.into_iter().zip(touched_by_txn.into_iter()) {
            let root = partitions.find(touched[0]);
            groups.entry(root).or_default().push(txn);
        }

        groups.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_only_txn(key: i64) -> Transaction {
        let mut txn = Transaction::new();
        txn.add_select("t", key, 0, vec![1]);
        txn
    }

    #[test]
    fn disjoint_single_key_transactions_spread_across_queues() {
        let planner = Planner::new(8);
        let transactions: Vec<Transaction> = (0..100).map(key_only_txn).collect();
        let groups = planner.plan(transactions);

        assert_eq!(groups.len(), 8);

        let mut seen = std::collections::HashSet::new();
        for group in &groups {
            for txn in group {
                for query in &txn.queries {
                    if let Some((start, _)) = query.key_range() {
                        assert!(seen.insert(start), "key {start} appeared in more than one queue");
                    }
                }
            }
        }
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn transaction_spanning_two_keys_merges_their_partitions() {
        let planner = Planner::new(4);
        let mut spanning = Transaction::new();
        spanning.add_select("t", 0, 0, vec![1]);
        spanning.add_update("t", 1, vec![Some(9)]);

        let groups = planner.plan(vec![spanning, key_only_txn(0), key_only_txn(1)]);

        let group_with_zero = groups.iter().find(|g| {
            g.iter().any(|t| t.queries.iter().any(|q| q.key_range() == Some((0, 0))))
        }).unwrap();
        let touches_one = group_with_zero.iter().any(|t| {
            t.queries.iter().any(|q| q.key_range() == Some((1, 1)))
        });
        assert!(touches_one, "transaction touching keys 0 and 1 must force both into one queue");
    }

    #[test]
    fn range_query_spanning_every_partition_serializes_with_all_of_them() {
        let planner = Planner::new(4);
        let mut sum_txn = Transaction::new();
        sum_txn.add_sum("t", 0, 9, 1);

        let groups = planner.plan(vec![sum_txn, key_only_txn(0), key_only_txn(1), key_only_txn(2), key_only_txn(3)]);
        assert_eq!(groups.len(), 1, "a range covering every residue must merge all partitions into one queue");
    }

    #[test]
    fn narrow_range_query_only_merges_the_partitions_it_actually_spans() {
        let planner = Planner::new(8);
        let mut sum_txn = Transaction::new();
        sum_txn.add_sum("t", 0, 1, 1);

        let groups = planner.plan(vec![sum_txn, key_only_txn(0), key_only_txn(1), key_only_txn(5)]);
        // The sum spans keys 0 and 1, forcing those two partitions together;
        // the transaction touching key 5 stays in its own, untouched queue.
        assert_eq!(groups.len(), 2, "a 2-key range should merge only the 2 partitions it spans");
    }
}
