//! Basic usage examples for the FTP pool

use esox_ftppool::{
    AccessOptions, Environment, FtpConfig, FtpProvider, FtpSettings, MemoryServer, PoolConfiguration, RetryPolicy,
    TokioDelay,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    println!("=== esox_ftppool - Basic Examples ===\n");

    // Example 1: Round trip
    round_trip().await;

    // Example 2: Bounded concurrency
    bounded_concurrency().await;

    // Example 3: Retries
    retries().await;

    // Example 4: Metrics and health
    metrics_and_health().await;
}

fn settings(base: &str) -> FtpSettings {
    FtpSettings::new(AccessOptions::new("memory", "demo"), FtpConfig::new(base))
}

async fn round_trip() {
    println!("1. Round Trip:");
    let server = MemoryServer::new();
    let provider = FtpProvider::from_env(settings("/inbox"), server.connector()).unwrap();
    let ftp = provider.service();

    ftp.put("/notes/today.txt", "buy milk").await.unwrap();
    let data = ftp.get("/notes/today.txt").await.unwrap();
    println!("   Read back: {}", String::from_utf8_lossy(&data));

    ftp.delete_file("/notes/today.txt").await.unwrap();
    ftp.delete_file("/notes/today.txt").await.unwrap();
    println!("   Entries after delete: {:?}\n", ftp.list("/notes").await.unwrap());

    provider.shutdown().await;
}

async fn bounded_concurrency() {
    println!("2. Bounded Concurrency:");
    let server = MemoryServer::new().with_latency(Duration::from_millis(5));
    let config = PoolConfiguration::new()
        .with_max_total(2)
        .with_max_waiting_acquirers(10);
    let provider = FtpProvider::from_env(settings("").with_pool(config), server.connector()).unwrap();
    let ftp = provider.service();

    let mut handles = vec![];
    for i in 0..8 {
        let ftp = ftp.clone();
        handles.push(tokio::spawn(async move {
            ftp.put(&format!("/file-{i}.txt"), format!("payload {i}")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stats = server.stats();
    println!("   Connections opened: {}", stats.connects);
    println!("   Peak concurrent commands: {}\n", stats.peak_in_flight);

    provider.shutdown().await;
}

async fn retries() {
    println!("3. Retries:");
    let server = MemoryServer::new();
    let config = FtpConfig::new("").with_retry(RetryPolicy::new(2, Duration::from_millis(20)));
    let settings = FtpSettings::new(AccessOptions::new("memory", "demo"), config);
    let provider = FtpProvider::init(settings, server.connector(), &Environment::default(), Arc::new(TokioDelay)).unwrap();

    server.fail_next_connects(2);
    match provider.service().put("/flaky.txt", "eventually").await {
        Ok(()) => println!("   Stored after {} failed connects", server.stats().failed_connects),
        Err(e) => println!("   Error: {e}"),
    }

    server.fail_next_operations(10);
    if let Err(e) = provider.service().list("/").await {
        println!("   Gave up: {} ({:?} attempts)\n", e, e.attempts());
    }

    provider.shutdown().await;
}

async fn metrics_and_health() {
    println!("4. Metrics and Health:");
    let server = MemoryServer::new();
    let provider = FtpProvider::from_env(settings(""), server.connector()).unwrap();
    let ftp = provider.service();

    ftp.put("/a.txt", "a").await.unwrap();
    ftp.get("/a.txt").await.unwrap();

    let health = provider.health_status();
    println!("   Health: {}", if health.is_healthy { "Healthy" } else { "Unhealthy" });
    println!("   Utilization: {:.1}%", health.utilization * 100.0);

    let metrics = provider.metrics().export();
    println!("\n   Metrics:");
    for (key, value) in metrics {
        println!("     {}: {}", key, value);
    }

    provider.shutdown().await;
}
