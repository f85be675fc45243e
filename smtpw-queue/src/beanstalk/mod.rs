//! beanstalkd protocol client
//!
//! Implements the subset of the beanstalkd text protocol the worker and its
//! operator tooling use: `use`, `watch`, `ignore`, `put`,
//! `reserve-with-timeout`, `delete`, `bury`, `release`, `stats-job`, `kick`
//! and `quit`.

mod client;
mod reply;

use async_trait::async_trait;

pub use client::BeanstalkClient;
pub use reply::Reply;

use crate::{Connector, Result};

/// Default beanstalkd port.
pub const DEFAULT_PORT: u16 = 11300;

/// Dials a beanstalkd server; every call opens a fresh connection
#[derive(Debug, Clone)]
pub struct BeanstalkConnector {
    address: String,
}

impl BeanstalkConnector {
    /// `address` is `host:port`; a bare host gets the default port.
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let address = if address.contains(':') {
            address
        } else {
            format!("{address}:{DEFAULT_PORT}")
        };

        Self { address }
    }
}

#[async_trait]
impl Connector for BeanstalkConnector {
    type Queue = BeanstalkClient;

    async fn connect(&self) -> Result<Self::Queue> {
        BeanstalkClient::connect(&self.address).await
    }

    fn endpoint(&self) -> String {
        self.address.clone()
    }
}
