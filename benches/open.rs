use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dbconn::{ConnectionFactory, ConnectionInfo};
use dbconn_core::driver::MockDialectProvider;
use dbconn_sqlite::SqliteDialect;

fn criterion_benchmark(c: &mut Criterion) {
    let mock_factory = ConnectionFactory::new("mock://", MockDialectProvider::with_default("mock"));
    mock_factory.register_connection("reporting", "mock://reports", MockDialectProvider::with_default("mock")).unwrap();
    let info = ConnectionInfo::for_connection_string("mock://explicit");
    let sqlite_factory = ConnectionFactory::new(":memory:", SqliteDialect::provider());

    let mut group = c.benchmark_group("Open");
    group.bench_function("default", |b| b.iter(|| black_box(mock_factory.open().unwrap())));
    group.bench_function("named", |b| b.iter(|| black_box(mock_factory.open_named("reporting").unwrap())));
    group.bench_function("connection string", |b| b.iter(|| black_box(mock_factory.open_info(Some(&info)).unwrap())));
    group.bench_function("sqlite in-memory", |b| b.iter(|| black_box(sqlite_factory.open().unwrap())));
    group.finish();
}

// Criterion main function to run the benchmarks
criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
