//! Shared helpers for worker tests
#![allow(dead_code)] // Test utility module - not all helpers used in every test

pub mod smtp_server;

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use smtpw_common::{TenantConfig, TenantRegistry};
use smtpw_delivery::{
    ComposedMessage, Composer, EmailJob, Mailer, SendError, Worker, WorkerBuilder, WorkerConfig,
};
use smtpw_queue::{JobId, MemoryConnector};

pub const TUBE: &str = "email";

/// A message handed to the mailer
#[derive(Debug, Clone)]
pub struct Sent {
    pub relay: String,
    pub message: ComposedMessage,
}

/// Mailer that records every message and answers with scripted failures
#[derive(Debug, Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<Sent>>>,
    failures: Arc<Mutex<VecDeque<SendError>>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next send with `error`.
    pub fn fail_next(&self, error: SendError) {
        self.failures.lock().push_back(error);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(
        &self,
        tenant: &TenantConfig,
        message: &ComposedMessage,
    ) -> Result<(), SendError> {
        self.sent.lock().push(Sent {
            relay: tenant.host.clone(),
            message: message.clone(),
        });

        self.failures.lock().pop_front().map_or(Ok(()), Err)
    }
}

pub fn registry() -> Arc<TenantRegistry> {
    let mut registry = TenantRegistry::new();
    registry.insert(
        "noreply",
        TenantConfig {
            host: "smtp.example.com".to_string(),
            from: "noreply@example.com".to_string(),
            display: "Example".to_string(),
            ..TenantConfig::default()
        },
    );
    Arc::new(registry)
}

/// Worker settings without pauses, so failing ticks return immediately.
pub fn config() -> WorkerConfig {
    WorkerConfig {
        error_wait_secs: 0,
        deadline_wait_secs: 0,
        retry_wait_secs: 0,
        ..WorkerConfig::default()
    }
}

pub async fn worker(
    connector: &MemoryConnector,
    mailer: &RecordingMailer,
    config: WorkerConfig,
) -> Worker<MemoryConnector, RecordingMailer> {
    builder(connector, mailer)
        .with_config(config)
        .connect()
        .await
        .expect("worker connects")
}

pub fn email(from: &str) -> EmailJob {
    EmailJob {
        from: from.to_string(),
        to: vec!["a@b.com".to_string()],
        subject: "Hi".to_string(),
        text: "hello".to_string(),
        ..EmailJob::default()
    }
}

pub fn push(connector: &MemoryConnector, job: &EmailJob) -> JobId {
    connector.push(TUBE, job.encode().expect("job encodes"))
}

pub fn builder(
    connector: &MemoryConnector,
    mailer: &RecordingMailer,
) -> WorkerBuilder<MemoryConnector, RecordingMailer> {
    Worker::builder(
        connector.clone(),
        mailer.clone(),
        Composer::new(registry(), "worker-1"),
    )
    .with_config(config())
    .with_tube(TUBE)
}
