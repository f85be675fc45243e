//! Integration tests for the beanstalkd client against a scripted server.

mod support;

use std::time::Duration;

use pretty_assertions::assert_eq;
use smtpw_queue::{BeanstalkConnector, Connector, JobId, Queue, QueueError};
use support::mock_server::{MockBeanstalkd, reply};

#[tokio::test]
async fn test_subscribe_sequence() {
    let server = MockBeanstalkd::start(vec![
        reply("USING email\r\n"),
        reply("WATCHING 2\r\n"),
        reply("WATCHING 1\r\n"),
    ])
    .await;

    let mut queue = BeanstalkConnector::new(server.addr())
        .connect()
        .await
        .expect("connect");
    queue.subscribe("email").await.expect("subscribe");

    assert_eq!(
        server.lines().await,
        vec!["use email", "watch email", "ignore default"]
    );
}

#[tokio::test]
async fn test_reserve_and_delete() {
    let server = MockBeanstalkd::start(vec![
        reply("RESERVED 42 11\r\n{\"To\":[\"x\"]}\r\n"),
        reply("DELETED\r\n"),
    ])
    .await;

    let mut queue = BeanstalkConnector::new(server.addr())
        .connect()
        .await
        .expect("connect");

    let job = queue
        .reserve(Duration::from_secs(900))
        .await
        .expect("reserve");
    assert_eq!(job.id, JobId(42));
    assert_eq!(job.body, b"{\"To\":[\"x\"]}");

    queue.delete(job.id).await.expect("delete");

    assert_eq!(
        server.lines().await,
        vec!["reserve-with-timeout 900", "delete 42"]
    );
}

#[tokio::test]
async fn test_reserve_timeout_and_not_found() {
    let server = MockBeanstalkd::start(vec![
        reply("TIMED_OUT\r\n"),
        reply("NOT_FOUND\r\n"),
        reply("BURIED\r\n"),
        reply("RELEASED\r\n"),
    ])
    .await;

    let mut queue = BeanstalkConnector::new(server.addr())
        .connect()
        .await
        .expect("connect");

    let err = queue.reserve(Duration::from_secs(1)).await.unwrap_err();
    assert!(err.is_timeout());

    let err = queue.delete(JobId(7)).await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(JobId(7))));

    queue.bury(JobId(8), 1).await.expect("bury");
    queue
        .release(JobId(9), 1024, Duration::from_secs(20))
        .await
        .expect("release");

    assert_eq!(
        server.lines().await,
        vec![
            "reserve-with-timeout 1",
            "delete 7",
            "bury 8 1",
            "release 9 1024 20"
        ]
    );
}

#[tokio::test]
async fn test_reserve_deadline_soon() {
    let server = MockBeanstalkd::start(vec![reply("DEADLINE_SOON\r\n")]).await;

    let mut queue = BeanstalkConnector::new(server.addr())
        .connect()
        .await
        .expect("connect");

    let err = queue.reserve(Duration::from_secs(900)).await.unwrap_err();
    assert!(err.is_deadline_soon());
    assert!(!err.is_timeout());
    assert!(!err.is_disconnect());
}

#[tokio::test]
async fn test_put_sends_body() {
    let server = MockBeanstalkd::start(vec![reply("INSERTED 3\r\n")]).await;

    let mut queue = BeanstalkConnector::new(server.addr())
        .connect()
        .await
        .expect("connect");

    let id = queue
        .put(b"hello", 1024, Duration::ZERO, Duration::from_secs(120))
        .await
        .expect("put");
    assert_eq!(id, JobId(3));

    let received = server.received().await;
    assert_eq!(received[0].line, "put 1024 0 120 5");
    assert_eq!(received[0].body.as_deref(), Some(&b"hello"[..]));
}

#[tokio::test]
async fn test_stats_job() {
    let yaml = "---\nid: 5\ntube: email\nstate: reserved\npri: 1024\nreserves: 3\n";
    let server = MockBeanstalkd::start(vec![reply(&format!(
        "OK {}\r\n{yaml}\r\n",
        yaml.len()
    ))])
    .await;

    let mut queue = BeanstalkConnector::new(server.addr())
        .connect()
        .await
        .expect("connect");

    let stats = queue.stats_job(JobId(5)).await.expect("stats-job");
    assert_eq!(stats.id, 5);
    assert_eq!(stats.tube, "email");
    assert_eq!(stats.reserves, 3);
}

#[tokio::test]
async fn test_server_error_reply() {
    let server = MockBeanstalkd::start(vec![reply("OUT_OF_MEMORY\r\n")]).await;

    let mut queue = BeanstalkConnector::new(server.addr())
        .connect()
        .await
        .expect("connect");

    let err = queue.kick(5).await.unwrap_err();
    assert!(matches!(err, QueueError::Server(ref reply) if reply == "OUT_OF_MEMORY"));
    assert!(!err.is_disconnect());
}

#[tokio::test]
async fn test_closed_connection_is_disconnect() {
    let server = MockBeanstalkd::start(vec![]).await;

    let mut queue = BeanstalkConnector::new(server.addr())
        .connect()
        .await
        .expect("connect");

    let err = queue.reserve(Duration::from_secs(1)).await.unwrap_err();
    assert!(err.is_disconnect(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_invalid_tube_never_reaches_server() {
    let server = MockBeanstalkd::start(vec![reply("USING x\r\n")]).await;

    let mut queue = BeanstalkConnector::new(server.addr())
        .connect()
        .await
        .expect("connect");

    let err = queue.use_tube("email\r\nkick 100").await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTube(_)));
    assert!(server.lines().await.is_empty());
}
