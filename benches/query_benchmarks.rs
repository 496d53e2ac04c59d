//! Performance Benchmarks for Factbase
//!
//! Measures insert throughput, transaction overhead and query passes.

use factbase_core::*;
use rand::Rng;
use std::time::{Duration, Instant};

/// Benchmark result
#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    pub name: String,
    pub operations: usize,
    pub duration: Duration,
    pub ops_per_sec: f64,
    pub avg_latency_ms: f64,
}

impl BenchmarkResult {
    pub fn new(name: &str, operations: usize, duration: Duration) -> Self {
        let secs = duration.as_secs_f64();
        let ops_per_sec = operations as f64 / secs;
        let avg_latency_ms = (secs * 1000.0) / operations as f64;

        BenchmarkResult {
            name: name.to_string(),
            operations,
            duration,
            ops_per_sec,
            avg_latency_ms,
        }
    }

    pub fn print(&self) {
        println!("=== {} ===", self.name);
        println!("  Operations:    {}", self.operations);
        println!("  Duration:      {:?}", self.duration);
        println!("  Throughput:    {:.2} ops/sec", self.ops_per_sec);
        println!("  Avg Latency:   {:.3} ms", self.avg_latency_ms);
        println!();
    }
}

fn populate(fb: &FactStore, count: usize) {
    let mut rng = rand::thread_rng();
    for i in 0..count {
        let f = fb.insert().unwrap();
        f.set("id", i).unwrap();
        f.set("cost", rng.gen_range(1..=100)).unwrap();
        f.set("city", format!("city{}", i % 10)).unwrap();
    }
}

/// Benchmark: inserts outside any transaction
pub fn bench_insert_no_transaction(count: usize) -> BenchmarkResult {
    let fb = FactStore::new();
    let start = Instant::now();
    populate(&fb, count);
    BenchmarkResult::new("INSERT (no transaction)", count, start.elapsed())
}

/// Benchmark: the same inserts inside one transaction
pub fn bench_insert_batched_transaction(count: usize) -> BenchmarkResult {
    let fb = FactStore::new();
    let start = Instant::now();
    fb.txn(|fbt| {
        populate(fbt, count);
        Ok(())
    })
    .unwrap();
    BenchmarkResult::new("INSERT (one transaction)", count, start.elapsed())
}

/// Benchmark: a transaction per insert
pub fn bench_transaction_overhead(count: usize) -> BenchmarkResult {
    let fb = FactStore::new();
    let start = Instant::now();
    for i in 0..count {
        fb.txn(|fbt| fbt.insert()?.set("id", i)).unwrap();
    }
    BenchmarkResult::new("Transaction per insert", count, start.elapsed())
}

/// Benchmark: rollback of a large transaction
pub fn bench_rollback(count: usize) -> BenchmarkResult {
    let fb = FactStore::new();
    let start = Instant::now();
    let _ = fb.txn(|fbt| -> Result<()> {
        populate(fbt, count);
        Err(FactbaseError::InvalidProperty("rollback".to_string()))
    });
    BenchmarkResult::new(&format!("Rollback ({} facts)", count), 1, start.elapsed())
}

/// Benchmark: filter passes over a populated store
pub fn bench_filter(size: usize, passes: usize) -> BenchmarkResult {
    let fb = FactStore::new();
    populate(&fb, size);
    let q = fb
        .query("(and (gt cost 50) (or (eq city 'city1') (matches city '^city[23]$')))")
        .unwrap();
    let start = Instant::now();
    for _ in 0..passes {
        q.to_vec().unwrap();
    }
    BenchmarkResult::new(&format!("Filter pass ({} facts)", size), passes, start.elapsed())
}

/// Benchmark: aggregate self-reference, evaluated once per pass
pub fn bench_aggregation(size: usize) -> BenchmarkResult {
    let fb = FactStore::new();
    populate(&fb, size);
    let q = fb.query("(eq cost (agg (exists cost) (max cost)))").unwrap();
    let start = Instant::now();
    let found = q.to_vec().unwrap();
    assert!(!found.is_empty());
    BenchmarkResult::new(&format!("Aggregate pass ({} facts)", size), 1, start.elapsed())
}

/// Benchmark: parameterized passes
pub fn bench_parameters(size: usize) -> BenchmarkResult {
    let fb = FactStore::new();
    populate(&fb, size);
    let q = fb.query("(and (eq city $c) (gt cost $min))").unwrap();
    let start = Instant::now();
    for i in 0..10 {
        let params = Params::new()
            .with("c", format!("city{}", i))
            .with("min", 10 * i);
        q.each(&params).unwrap();
    }
    BenchmarkResult::new(&format!("Parameterized pass ({} facts)", size), 10, start.elapsed())
}

/// Benchmark: snapshot export and import
pub fn bench_snapshot(size: usize) -> BenchmarkResult {
    let fb = FactStore::new();
    populate(&fb, size);
    let start = Instant::now();
    let bytes = fb.export().unwrap();
    let copy = FactStore::from_bytes(&bytes).unwrap();
    assert_eq!(copy.size(), size);
    BenchmarkResult::new(&format!("Export + import ({} facts)", size), 1, start.elapsed())
}

/// Run all benchmarks
pub fn run_all_benchmarks() {
    println!("\n━━━ Factbase Performance Benchmarks ━━━\n");

    println!("━━━ INSERT Performance ━━━\n");
    bench_insert_no_transaction(10_000).print();
    bench_insert_batched_transaction(10_000).print();

    println!("━━━ Transaction Overhead ━━━\n");
    bench_transaction_overhead(1_000).print();
    bench_rollback(10_000).print();

    println!("━━━ Query Performance ━━━\n");
    bench_filter(10_000, 10).print();
    bench_aggregation(1_000).print();
    bench_aggregation(10_000).print();
    bench_parameters(10_000).print();

    println!("━━━ Snapshot Performance ━━━\n");
    bench_snapshot(10_000).print();
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();
    run_all_benchmarks();
}
