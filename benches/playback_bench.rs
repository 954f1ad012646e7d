use criterion::{black_box, criterion_group, criterion_main, Criterion};

use snipsync::data::{windows_from_records, SnippetRecord};
use snipsync::playback::end_check;
use snipsync::RetryPolicy;

// The poller runs end_check every tick of every playing window.
fn bench_end_check(c: &mut Criterion) {
    c.bench_function("end_check", |b| {
        b.iter(|| {
            let mut reached = 0;
            for i in 0..1000 {
                let pos = i as f64 * 0.02;
                if !matches!(
                    end_check(black_box(pos), black_box(19.9), 0.15),
                    snipsync::playback::EndCheck::Pending
                ) {
                    reached += 1;
                }
            }
            reached
        })
    });
}

fn bench_retry_delays(c: &mut Criterion) {
    let policy = RetryPolicy::default();
    c.bench_function("retry_delay_for", |b| {
        b.iter(|| (1..=64).map(|n| policy.delay_for(black_box(n))).sum::<std::time::Duration>())
    });
}

fn bench_windows_from_records(c: &mut Criterion) {
    let records: Vec<SnippetRecord> = (0..500u32)
        .rev()
        .map(|i| {
            SnippetRecord::new(
                &format!("s{}", i),
                &format!("video{}", i % 37),
                (i % 50) as f64,
                (i % 50) as f64 + 12.5,
                i,
            )
        })
        .collect();
    c.bench_function("windows_from_records_500", |b| {
        b.iter(|| windows_from_records(black_box(records.clone())).len())
    });
}

criterion_group!(
    benches,
    bench_end_check,
    bench_retry_delays,
    bench_windows_from_records
);
criterion_main!(benches);
