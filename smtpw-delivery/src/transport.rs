//! SMTP hand-off

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
        extension::ClientId,
    },
};
use smtpw_common::{TenantConfig, outgoing};

use crate::{compose::ComposedMessage, error::SendError};

/// Something that can deliver a composed message for a tenant
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Hand the message to the tenant's relay.
    ///
    /// Returns once the relay accepted the message or failed.
    async fn send(&self, tenant: &TenantConfig, message: &ComposedMessage)
    -> Result<(), SendError>;
}

/// Relays through each tenant's SMTP server with lettre
///
/// A fresh connection is opened per message; the worker sends one message at
/// a time and tenants rarely share a relay.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    hostname: String,
    timeout: Duration,
}

impl SmtpMailer {
    /// `hostname` is announced in EHLO for tenants without an override.
    pub fn new(hostname: impl Into<String>, timeout: Duration) -> Self {
        Self {
            hostname: hostname.into(),
            timeout,
        }
    }

    fn transport(
        &self,
        tenant: &TenantConfig,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, SendError> {
        let parameters = TlsParameters::builder(tenant.host.clone())
            .dangerous_accept_invalid_certs(tenant.insecure)
            .build()
            .map_err(|e| SendError::Tls(e.to_string()))?;

        let tls = if tenant.implicit_tls() {
            Tls::Wrapper(parameters)
        } else {
            Tls::Opportunistic(parameters)
        };

        let hello = tenant
            .hostname_override()
            .unwrap_or(&self.hostname)
            .to_string();

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&tenant.host)
            .port(tenant.port)
            .tls(tls)
            .hello_name(ClientId::Domain(hello))
            .timeout(Some(self.timeout));

        if tenant.authenticates() {
            builder = builder.credentials(Credentials::new(
                tenant.user.clone(),
                tenant.pass.clone(),
            ));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(
        &self,
        tenant: &TenantConfig,
        message: &ComposedMessage,
    ) -> Result<(), SendError> {
        let transport = self.transport(tenant)?;

        outgoing!(
            level = DEBUG,
            "Relaying {} via {}:{} (tls={}, auth={})",
            message.message_id,
            tenant.host,
            tenant.port,
            if tenant.implicit_tls() { "wrapper" } else { "starttls" },
            tenant.authenticates()
        );

        let response = transport.send(message.message().clone()).await?;

        outgoing!(
            level = DEBUG,
            "Relay accepted {}: {} {}",
            message.message_id,
            response.code(),
            response.message().collect::<Vec<_>>().join(" ")
        );

        Ok(())
    }
}
