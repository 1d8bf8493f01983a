// esox_ftppool - pooled, retrying FTP service
// Quick demo against the in-memory endpoint
//
// Run examples with: cargo run --example basic
// Set RUST_LOG=debug to see pool and transfer logs

use esox_ftppool::{
    AccessOptions, FtpConfig, FtpProvider, FtpSettings, MemoryServer, PoolConfiguration, RetryPolicy,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== esox_ftppool ===");
    println!("Run: cargo run --example basic");
    println!();

    let server = MemoryServer::new();
    let settings = FtpSettings::new(
        AccessOptions::new("memory", "demo"),
        FtpConfig::new("/demo").with_retry(RetryPolicy::new(2, Duration::from_millis(50))),
    )
    .with_pool(PoolConfiguration::new().with_max_total(2));

    let provider = match FtpProvider::from_env(settings, server.connector()) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("Could not start the FTP provider: {e}");
            return;
        }
    };
    let ftp = provider.service();

    println!("Quick Demo:");
    match ftp.put("/greeting.txt", "hello from the pool").await {
        Ok(()) => println!("  Stored /demo/greeting.txt"),
        Err(e) => println!("  Error: {e}"),
    }
    match ftp.get("/greeting.txt").await {
        Ok(data) => println!("  Read back {} bytes", data.len()),
        Err(e) => println!("  Error: {e}"),
    }
    match ftp.list("/").await {
        Ok(names) => println!("  Listing: {names:?}"),
        Err(e) => println!("  Error: {e}"),
    }

    let health = provider.health_status();
    println!("  Idle connections: {}", health.idle_connections);

    provider.shutdown().await;
}
