//! FP-Tree construction and FP-Growth mining throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fpstream_core::{Constraints, FrequentItemset, ItemId, ItemIdList, SupportCount};
use fpstream_runtime::{FpGrowth, FpTree, PatternSink};
use rustc_hash::FxHashMap;

/// Deterministic transaction generator: a few heavy items plus a long tail.
fn synthetic_transactions(count: usize) -> Vec<ItemIdList> {
    let mut state: u64 = 0x5DEECE66D;
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 33) as u32
    };

    (0..count)
        .map(|_| {
            let len = 2 + (next() % 6) as usize;
            let mut transaction: ItemIdList = Vec::with_capacity(len);
            for slot in 0..len {
                // Low slots draw from a small hot set, later ones from the tail.
                let id = if slot < 2 {
                    1 + next() % 8
                } else {
                    9 + next() % 120
                };
                let id = ItemId(id);
                if !transaction.contains(&id) {
                    transaction.push(id);
                }
            }
            transaction.sort_unstable();
            transaction
        })
        .collect()
}

fn item_supports(transactions: &[ItemIdList]) -> FxHashMap<ItemId, SupportCount> {
    let mut supports = FxHashMap::default();
    for transaction in transactions {
        for &item in transaction {
            *supports.entry(item).or_insert(0) += 1;
        }
    }
    supports
}

struct CountingSink(u64);

impl PatternSink for CountingSink {
    fn frequent_itemset(&mut self, itemset: &FrequentItemset, _matches: bool) {
        self.0 += itemset.support;
    }
}

fn bench_fpgrowth(c: &mut Criterion) {
    let transactions = synthetic_transactions(10_000);
    let supports = item_supports(&transactions);
    let min_support = 50;

    c.bench_function("fptree_build_10k", |b| {
        b.iter(|| {
            let (tree, _) =
                FpTree::from_transactions(black_box(&transactions), min_support, &supports);
            black_box(tree.num_items())
        })
    });

    let (tree, _) = FpTree::from_transactions(&transactions, min_support, &supports);
    let constraints = Constraints::new();
    c.bench_function("fpgrowth_mine_10k", |b| {
        b.iter(|| {
            let growth = FpGrowth::new(min_support, &constraints, &constraints);
            let mut sink = CountingSink(0);
            growth.mine(black_box(&tree), &mut sink);
            black_box(sink.0)
        })
    });
}

criterion_group!(benches, bench_fpgrowth);
criterion_main!(benches);
