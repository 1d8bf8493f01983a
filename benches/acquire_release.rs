use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use esox_ftppool::{
    AccessOptions, Environment, FtpConfig, FtpConnectionManager, FtpProvider, FtpSettings, MemoryServer,
    PoolConfiguration, ResourcePool, TokioDelay,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn settings(max_total: usize) -> FtpSettings {
    FtpSettings::new(AccessOptions::new("memory", "bench"), FtpConfig::new(""))
        .with_pool(PoolConfiguration::new().with_max_total(max_total))
}

/// Benchmark checkout and return of a warm connection
fn bench_acquire_release(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let server = MemoryServer::new();
    let manager = FtpConnectionManager::new(server.connector(), &settings(1), &Environment::default());
    let pool = ResourcePool::new(manager, PoolConfiguration::new().with_max_total(1)).unwrap();

    c.bench_function("acquire_release", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let conn = pool.acquire().await.unwrap();
                black_box(conn.id());
                pool.release(conn).await.unwrap();
            })
        });
    });
}

/// Benchmark uploads through the service for different payload sizes
fn bench_put(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let server = MemoryServer::new();
    let provider = runtime
        .block_on(async {
            FtpProvider::init(settings(2), server.connector(), &Environment::default(), Arc::new(TokioDelay))
        })
        .unwrap();
    let ftp = provider.service();

    let mut group = c.benchmark_group("put");
    for size_kb in [1usize, 64, 1024].iter() {
        let payload = vec![0xABu8; size_kb * 1024];
        group.throughput(Throughput::Bytes((size_kb * 1024) as u64));

        group.bench_with_input(BenchmarkId::new("put", size_kb), size_kb, |b, _| {
            b.iter(|| {
                runtime.block_on(async {
                    ftp.put("/bench/payload.bin", payload.clone()).await.unwrap();
                })
            });
        });
    }
    group.finish();

    runtime.block_on(provider.shutdown());
}

criterion_group!(benches, bench_acquire_release, bench_put);
criterion_main!(benches);
