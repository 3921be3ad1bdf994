#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]
//! Benchmarks for the per-tick work: history append/render and process ranking.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use memsweep::history::{render_glyphs, HistoryBuffer};
use memsweep::types::{ProcessEntry, ProcessRanking};
use std::hint::black_box;

fn history_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("history");

    for bound in [60, 600, 3600] {
        let mut history = HistoryBuffer::new(bound).expect("bound is non-zero");
        for i in 0..bound {
            history.append((i * 37 % 101) as f64);
        }

        group.bench_with_input(BenchmarkId::new("append", bound), &bound, |b, _| {
            b.iter(|| history.append(black_box(63.5)));
        });

        let snapshot = history.snapshot();
        group.bench_with_input(BenchmarkId::new("render", bound), &snapshot, |b, values| {
            b.iter(|| render_glyphs(black_box(values)));
        });
    }

    group.finish();
}

fn ranking_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("ranking");

    for count in [100u32, 1_000, 10_000] {
        // Duplicate sizes exercise the pid tie-break.
        let entries: Vec<ProcessEntry> = (0..count)
            .map(|pid| ProcessEntry::new(pid, format!("proc-{pid}"), u64::from(pid % 500) * 4096))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(count), &entries, |b, entries| {
            b.iter(|| ProcessRanking::from_entries(black_box(entries.clone()), 5));
        });
    }

    group.finish();
}

criterion_group!(benches, history_benchmark, ranking_benchmark);
criterion_main!(benches);
