use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use hgcs_core::{ClassAd, Expr, JobStatus, ManualClock, attr};
use hgcs_infra::agents::{Agent, CleanupDelayer, LogRetriever, XJobCleaner};
use hgcs_infra::queue::InMemoryQueue;
use std::sync::Arc;
use std::time::Duration;

const NOW: i64 = 1_700_000_000;

fn job_ad(cluster: i64) -> ClassAd {
    let status = match cluster % 4 {
        0 => JobStatus::Idle,
        1 => JobStatus::Running,
        2 => JobStatus::Completed,
        _ => JobStatus::Removed,
    };
    ClassAd::new()
        .with(attr::CLUSTER_ID, Expr::Int(cluster))
        .with(attr::PROC_ID, Expr::Int(0))
        .with(attr::JOB_STATUS, status.expr())
        .with(attr::ENTERED_CURRENT_STATUS, Expr::Int(NOW - cluster * 60))
        .with(attr::LEAVE_JOB_IN_QUEUE, Expr::Bool(false))
}

fn populated_queue(jobs: i64) -> InMemoryQueue {
    let queue = InMemoryQueue::new(Arc::new(ManualClock::at_unix(NOW)));
    for cluster in 0..jobs {
        queue.insert(job_ad(cluster)).unwrap();
    }
    queue
}

/// Evaluating agent filters against job ads.
fn bench_filter_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_evaluation");
    let ads: Vec<ClassAd> = (0..1_000).map(job_ad).collect();
    group.throughput(Throughput::Elements(ads.len() as u64));

    let filters = [
        ("log_retriever", LogRetriever::constraint()),
        ("cleanup_delayer", CleanupDelayer::constraint()),
        ("xjob_cleaner", XJobCleaner::constraint(Duration::from_secs(86_400))),
    ];
    for (name, filter) in &filters {
        group.bench_with_input(BenchmarkId::from_parameter(name), filter, |b, filter| {
            b.iter(|| ads.iter().filter(|ad| filter.matches(black_box(ad), NOW)).count());
        });
    }
    group.finish();
}

/// Rendering filters to ClassAd text, done once per query.
fn bench_filter_rendering(c: &mut Criterion) {
    let filter = CleanupDelayer::constraint();
    c.bench_function("filter_rendering", |b| b.iter(|| black_box(&filter).to_string()));
}

/// One CleanupDelayer cycle (query plus one batched edit) over queues of growing size.
fn bench_cleanup_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("cleanup_cycle");
    for jobs in [100i64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(jobs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &jobs, |b, &jobs| {
            b.iter_batched(
                || populated_queue(jobs),
                |queue| {
                    let mut agent = CleanupDelayer::new(Duration::from_secs(7_200), None);
                    agent.run_cycle(&queue).unwrap()
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_filter_evaluation,
    bench_filter_rendering,
    bench_cleanup_cycle
);
criterion_main!(benches);
