//! HTTP ingress which validates events and publishes them onto the broker

use crate::harness::{Heart, Module};
use crate::library::communication::{ConnectionManager, SharedConnection};
use crate::library::{BoxedError, EmptyResult};
use crate::module::connect_with_backoff;
use async_trait::async_trait;
use jatsl::{schedule, JobScheduler};
use std::sync::Arc;
use tracing::info;

mod error;
mod options;
mod server;

pub use error::{ErrorResponse, PublishError};
pub use options::Options;
pub use server::{routes, PublishContext, ServerJob};

/// Module implementation
pub struct Publisher {
    options: Options,
    connection: Option<Arc<SharedConnection>>,
}

impl Publisher {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self {
            options,
            connection: None,
        }
    }
}

#[async_trait]
impl Module for Publisher {
    async fn pre_startup(&mut self) -> EmptyResult {
        let manager = ConnectionManager::new(self.options.broker.client());
        let target = self.options.broker.target(&self.options.queueing.id);
        let handle =
            connect_with_backoff(&manager, &target, self.options.broker.connect_attempts).await?;

        self.connection = Some(SharedConnection::new(manager, target, Some(handle)));

        Ok(())
    }

    async fn run(&mut self, scheduler: &JobScheduler) -> Result<Option<Heart>, BoxedError> {
        let connection = self
            .connection
            .clone()
            .ok_or("broker connection has not been established")?;

        let context = PublishContext::new(
            connection,
            self.options.max_request_size,
            crate::library::tracing::is_enabled(),
        );
        let server_job = ServerJob::new(self.options.port, context);

        info!(port = self.options.port, "Starting event ingestion");
        schedule!(scheduler, { server_job });

        Ok(Some(Heart::without_heart_stone()))
    }
}
