//! End-to-end scenarios against the public `Query`/`Table` surface:
//! insert/select round-trips, cumulative version chains, page-range
//! capacity, secondary-index parity, and ranged sums.

use std::sync::Arc;

use lstore_engine::constants::PAGE_RANGE_CAPACITY;
use lstore_engine::index::IndexKind;
use lstore_engine::planner::Planner;
use lstore_engine::query::Query;
use lstore_engine::table::{IndexMode, Table};
use lstore_engine::transaction::Transaction;

fn three_column_table() -> Query {
    Query::new(Arc::new(Table::new("grades", 3, 0)))
}

#[test]
fn s1_insert_select_round_trip() {
    let query = three_column_table();
    assert!(query.insert(&[1, 2, 3]));
    assert!(query.insert(&[4, 5, 6]));
    assert!(query.insert(&[7, 8, 9]));

    assert_eq!(query.select(4, 0, &[1, 1, 1]).unwrap(), vec![vec![4, 5, 6]]);
}

#[test]
fn s2_update_chain_select_version() {
    let query = three_column_table();
    query.insert(&[1, 2, 3]);
    query.update(1, &[None, Some(5), None]);
    query.update(1, &[None, Some(7), Some(2)]);
    query.update(1, &[Some(9), None, None]);

    assert_eq!(query.select(9, 0, &[1, 1, 1]).unwrap(), vec![vec![9, 7, 2]]);
    assert_eq!(query.select_version(9, 0, &[1, 1, 1], 1).unwrap(), vec![vec![1, 7, 2]]);
    assert_eq!(query.select_version(9, 0, &[1, 1, 1], 2).unwrap(), vec![vec![1, 5, 3]]);
    assert_eq!(query.select_version(9, 0, &[1, 1, 1], 3).unwrap(), vec![vec![1, 2, 3]]);
}

#[test]
fn s3_range_capacity_spills_into_a_second_range() {
    let table = Table::new("wide", 3, 0);
    for key in 0..(PAGE_RANGE_CAPACITY as i64) {
        table.insert_record(&[key, 0, 0]).unwrap();
    }
    // 8192nd insert fills range 0; the 8193rd must land in a freshly grown
    // range 1, which the table handles transparently.
    table.insert_record(&[PAGE_RANGE_CAPACITY as i64, 0, 0]).unwrap();
    assert_eq!(table.select(PAGE_RANGE_CAPACITY as i64, 0, &[1, 0, 0]).unwrap(), vec![vec![PAGE_RANGE_CAPACITY as i64]]);
}

#[test]
fn s4_secondary_search_matches_brute_force() {
    let table = Table::new("grades", 3, 0);
    table.create_index(2);

    for key in 0..8 {
        let shared = if key < 5 { 8 } else { 1 };
        table.insert_record(&[key, key * 10, shared]).unwrap();
    }

    let mut via_index = table.select(8, 2, &[1, 0, 0]).unwrap().into_iter().map(|r| r[0]).collect::<Vec<_>>();
    let mut via_scan = table.brute_force_search(2, 8).unwrap();
    via_index.sort();
    via_scan.sort();
    assert_eq!(via_index, via_scan);
    assert_eq!(via_index.len(), 5);
}

#[test]
fn s5_sum_over_primary_key_range() {
    let query = three_column_table();
    for key in 1..=10i64 {
        query.insert(&[key, key * 10, 0]);
    }
    assert_eq!(query.sum_version(3, 7, 1, 0).unwrap(), 250);
}

#[test]
fn s6_planner_partitions_without_cross_queue_key_overlap() {
    let mut transactions = Vec::new();
    for key in 0..100i64 {
        let mut txn = Transaction::new();
        txn.add_update("grades", key, vec![None, Some(1), None]);
        transactions.push(txn);
    }

    let planner = Planner::new(8);
    let groups = planner.plan(transactions);
    assert_eq!(groups.len(), 8);

    let mut seen = std::collections::HashSet::new();
    for group in &groups {
        for txn in group {
            for q in &txn.queries {
                if let Some((key, _)) = q.key_range() {
                    assert!(seen.insert(key), "key {key} split across more than one queue");
                }
            }
        }
    }
    assert_eq!(seen.len(), 100);
}

#[test]
fn cycle_closure_holds_after_repeated_updates() {
    let table = Table::new("grades", 2, 0);
    table.insert_record(&[1, 0]).unwrap();
    for i in 1..=5 {
        table.update_record(1, &[None, Some(i)]).unwrap();
    }
    // select reads by following exactly one indirection hop regardless of
    // chain length, proving the chain still terminates at the base record.
    assert_eq!(table.select(1, 0, &[1, 1]).unwrap(), vec![vec![1, 5]]);
}

#[test]
fn idempotent_inherit_update_still_appends_a_zero_mask_tail() {
    let table = Table::new("grades", 2, 0);
    table.insert_record(&[1, 42]).unwrap();
    table.update_record(1, &[None, None]).unwrap();
    assert_eq!(table.select(1, 0, &[1, 1]).unwrap(), vec![vec![1, 42]]);
}

#[test]
fn threaded_index_mode_is_interchangeable_with_serial() {
    let table = Table::with_index_options("grades", 2, 0, IndexKind::Arrays, IndexMode::Threaded);
    table.insert_record(&[1, 10]).unwrap();
    table.insert_record(&[2, 20]).unwrap();
    table.wait_for_async_responses();
    assert_eq!(table.select(1, 0, &[1, 1]).unwrap(), vec![vec![1, 10]]);
}
