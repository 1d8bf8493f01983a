use esox_ftppool::{
    AccessOptions, Environment, ErrorKind, FtpConfig, FtpProvider, FtpSettings, MemoryConnector, MemoryServer,
    PoolConfiguration, RetryPolicy, TokioDelay,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn provider_with(server: &MemoryServer, settings: FtpSettings) -> FtpProvider<MemoryConnector> {
    FtpProvider::init(settings, server.connector(), &Environment::default(), Arc::new(TokioDelay)).unwrap()
}

fn settings(base: &str) -> FtpSettings {
    FtpSettings::new(AccessOptions::new("localhost", "user"), FtpConfig::new(base))
        .with_pool(PoolConfiguration::new().with_max_total(2).with_max_waiting_acquirers(10))
}

#[tokio::test]
async fn test_put_get_round_trip() {
    let server = MemoryServer::new();
    let provider = provider_with(&server, settings("/ftp"));
    let ftp = provider.service();

    ftp.put("/docs/readme.md", String::from("# Hello\n")).await.unwrap();
    let data = ftp.get("/docs/readme.md").await.unwrap();
    assert_eq!(data.as_ref(), b"# Hello\n");
    assert!(server.file("/ftp/docs/readme.md").is_some());

    provider.shutdown().await;
}

#[tokio::test]
async fn test_list_contains_every_put() {
    let server = MemoryServer::new();
    let provider = provider_with(&server, settings("/ftp"));
    let ftp = provider.service();

    for i in 0..5 {
        ftp.put(&format!("/batch/item-{i}.txt"), format!("item {i}")).await.unwrap();
    }

    let mut names = ftp.list("/batch").await.unwrap();
    names.sort();
    let expected: Vec<String> = (0..5).map(|i| format!("item-{i}.txt")).collect();
    assert_eq!(names, expected);

    provider.shutdown().await;
}

#[tokio::test]
async fn test_delete_with_and_without_ignore_missing() {
    let server = MemoryServer::new();
    server.insert_file("/ftp/old.log", "stale");
    let provider = provider_with(&server, settings("/ftp"));
    let ftp = provider.service();

    ftp.delete("/old.log", false).await.unwrap();
    assert!(server.file("/ftp/old.log").is_none());

    ftp.delete_file("/old.log").await.unwrap();

    let err = ftp.delete("/old.log", false).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Delete);
    assert_eq!(err.host(), "localhost");
    assert_eq!(err.path(), Some("/ftp/old.log"));

    provider.shutdown().await;
}

#[tokio::test]
async fn test_single_connection_serializes_calls() {
    let server = MemoryServer::new().with_latency(Duration::from_millis(30));
    server.insert_file("/ftp/a.txt", "a");
    let settings = settings("/ftp").with_pool(PoolConfiguration::new().with_max_total(1));
    let provider = provider_with(&server, settings);
    let ftp = provider.service();

    let started = Instant::now();
    let (first, second) = tokio::join!(ftp.list("/"), ftp.list("/"));
    first.unwrap();
    second.unwrap();

    let stats = server.stats();
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.peak_in_flight, 1);
    // Connect plus two listings, one after the other.
    assert!(started.elapsed() >= Duration::from_millis(90));

    provider.shutdown().await;
}

#[tokio::test]
async fn test_connect_failures_recovered_by_retry() {
    let server = MemoryServer::new();
    let config = FtpConfig::new("").with_retry(RetryPolicy::new(2, Duration::from_millis(20)));
    let settings = FtpSettings::new(AccessOptions::new("localhost", "user"), config);
    let provider = provider_with(&server, settings);

    server.fail_next_connects(2);
    provider.service().put("/retry.txt", "ok").await.unwrap();

    assert_eq!(server.stats().failed_connects, 2);
    assert_eq!(server.file("/retry.txt").unwrap().as_ref(), b"ok");

    provider.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_retries_are_tagged() {
    let server = MemoryServer::new();
    let config = FtpConfig::new("/ftp").with_retry(RetryPolicy::new(1, Duration::from_millis(5)));
    let settings = FtpSettings::new(AccessOptions::new("localhost", "user"), config);
    let provider = provider_with(&server, settings);

    server.fail_next_operations(5);
    let err = provider.service().list("/").await.err().unwrap();

    assert_eq!(err.kind(), ErrorKind::List);
    assert_eq!(err.kind().code(), "E_FTP_LIST");
    assert_eq!(err.inner().unwrap().kind(), ErrorKind::Exhausted);
    assert_eq!(err.attempts(), Some(2));
    assert_eq!(server.stats().failed_operations, 2);
    // Both connections were thrown away.
    assert_eq!(server.stats().closes, 2);

    provider.shutdown().await;
}

#[tokio::test]
async fn test_environment_password_is_used() {
    let server = MemoryServer::new().with_password("s3cret");
    let settings = FtpSettings::new(AccessOptions::new("localhost", "user").with_password("wrong"), FtpConfig::new(""));
    let env = Environment::from_pairs([("FTP_PASSWORD", "s3cret")]);
    let provider =
        FtpProvider::init(settings, server.connector(), &env, Arc::new(TokioDelay)).unwrap();

    provider.service().put("/secure.txt", "ok").await.unwrap();
    assert_eq!(server.stats().connects, 1);

    provider.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_work() {
    let server = MemoryServer::new().with_latency(Duration::from_millis(40));
    let provider = provider_with(&server, settings(""));
    let ftp = provider.service();

    let upload = tokio::spawn(async move { ftp.put("/late.txt", "late").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    provider.shutdown().await;
    upload.await.unwrap().unwrap();

    assert!(server.file("/late.txt").is_some());
    assert_eq!(server.stats().active_sessions, 0);

    provider.shutdown().await;
    assert_eq!(server.stats().closes, 1);
}

#[tokio::test]
async fn test_shutdown_during_connect_issues_no_connection() {
    let server = MemoryServer::new().with_latency(Duration::from_millis(40));
    let provider = provider_with(&server, settings(""));
    let ftp = provider.service();

    let upload = tokio::spawn(async move { ftp.put("/early.txt", "early").await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    provider.shutdown().await;
    let stats = server.stats();
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.active_sessions, 0);
    assert_eq!(stats.closes, 1);

    let err = upload.await.unwrap().err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Put);
    assert!(server.file("/early.txt").is_none());
}
