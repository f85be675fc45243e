//! `SmtpMailer` against a scripted relay: what goes over the wire and how
//! relay replies are classified.

mod support;

use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use smtpw_common::{TenantConfig, TenantRegistry};
use smtpw_delivery::{ComposedMessage, Composer, Disposition, Mailer, SendError, SmtpMailer};
use support::{
    email,
    smtp_server::{MockSmtpServer, SmtpCommand},
};

fn tenant(port: u16) -> TenantConfig {
    TenantConfig {
        host: "127.0.0.1".to_string(),
        port,
        from: "noreply@example.com".to_string(),
        display: "Example".to_string(),
        ..TenantConfig::default()
    }
}

fn message(tenant: &TenantConfig) -> ComposedMessage {
    let mut registry = TenantRegistry::new();
    registry.insert("noreply", tenant.clone());

    Composer::new(Arc::new(registry), "worker-1")
        .compose(&email("noreply"))
        .expect("job composes")
        .message
}

async fn send(port: u16) -> Result<(), SendError> {
    let tenant = tenant(port);
    let mailer = SmtpMailer::new("worker-1", Duration::from_secs(5));
    mailer.send(&tenant, &message(&tenant)).await
}

#[tokio::test]
async fn test_relays_message() {
    let server = MockSmtpServer::start().await;

    send(server.addr().port()).await.unwrap();

    let commands = server.commands();
    assert_eq!(commands[0], SmtpCommand::Ehlo("worker-1".to_string()));
    assert!(commands.iter().any(
        |command| matches!(command, SmtpCommand::MailFrom(from) if from.starts_with("FROM:<noreply@example.com>"))
    ));
    assert!(commands.iter().any(
        |command| matches!(command, SmtpCommand::RcptTo(to) if to.starts_with("TO:<a@b.com>"))
    ));
    assert_eq!(commands.last(), Some(&SmtpCommand::Quit));

    let content = server.content().unwrap();
    assert!(content.contains("X-Mailer: smtpw"));
    assert!(content.contains("Subject: Hi"));
}

#[tokio::test]
async fn test_recipient_syntax_rejection_is_permanent() {
    let server =
        MockSmtpServer::with_rcpt_reply(501, "5.1.3 Bad recipient address syntax").await;

    let result = send(server.addr().port()).await;

    let error = result.as_ref().unwrap_err();
    assert!(error.is_recipient_syntax());
    assert!(matches!(error, SendError::Rejected { code: 501, .. }));
    assert_eq!(Disposition::of_send(&result), Disposition::Permanent);
    assert!(!server.commands().contains(&SmtpCommand::Data));
}

#[tokio::test]
async fn test_temporary_rejection_is_transient() {
    let server = MockSmtpServer::with_rcpt_reply(451, "4.3.0 Try again later").await;

    let result = send(server.addr().port()).await;

    let error = result.as_ref().unwrap_err();
    assert!(matches!(error, SendError::Rejected { code: 451, .. }));
    assert!(!error.is_recipient_syntax());
    assert_eq!(Disposition::of_send(&result), Disposition::Transient);
}

#[tokio::test]
async fn test_mailbox_unavailable_is_transient() {
    let server = MockSmtpServer::with_rcpt_reply(550, "5.1.1 User unknown").await;

    let result = send(server.addr().port()).await;

    assert!(matches!(
        result,
        Err(SendError::Rejected { code: 550, .. })
    ));
    assert_eq!(Disposition::of_send(&result), Disposition::Transient);
}

#[tokio::test]
async fn test_unreachable_relay_is_transient() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let result = send(port).await;

    assert!(matches!(result, Err(SendError::Transport(_))));
    assert_eq!(Disposition::of_send(&result), Disposition::Transient);
}
