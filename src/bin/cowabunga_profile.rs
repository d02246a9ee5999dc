use rand::prelude::*;

use lstore_engine::table::Table;

use std::collections::HashSet;

fn main() {
    env_logger::init();
    let tbl = Table::new("prof_tbl", 8, 0);

    let mut prim_keys: HashSet<i64> = HashSet::new();
    let mut rng = rand::thread_rng();

    for i in 0..250_000 {
        match rng.gen_range(0..3) {
            0 => {
                let row: Vec<i64> = (0..8).map(|_| rng.gen_range(1..=100)).collect();
                if prim_keys.insert(row[0]) {
                    let _ = tbl.insert_record(&row);
                }
            }

            1 => {
                if let Some(&key) = prim_keys.iter().choose(&mut rng) {
                    let row: Vec<Option<i64>> = (0..8).map(|_| Some(rng.gen_range(1..=100))).collect();
                    let _ = tbl.update_record(key, &row);
                }
            }

            2 => {
                let projection: Vec<u8> = (0..8).map(|_| rng.gen_range(0..=1)).collect();
                let _ = tbl.select(rng.gen_range(0..100), 0, &projection);
            }

            _ => unreachable!(),
        }

        if i % 10_000 == 0 {
            println!("{i}/250k");
        }
    }

    println!("done, {} distinct keys inserted", prim_keys.len());
}
