//! Various options usable by modules
//!
//! The structs in this module allow other modules to flatten them into
//! their own options struct. This allows for a unified yet non-cluttered
//! option set.

use crate::library::communication::implementation::redis::RedisBrokerClient;
use crate::library::communication::{BrokerClient, BrokerTarget};
use std::sync::Arc;
use structopt::StructOpt;

/// Options for connecting to the streaming broker
#[derive(Debug, StructOpt)]
pub struct BrokerOptions {
    /// Broker server URL
    #[structopt(
        short = "b",
        long = "broker-url",
        env = "BROKER_URL",
        global = true,
        default_value = "redis://eventbus-broker/",
        value_name = "url"
    )]
    pub url: String,

    /// Identifier of the broker cluster, prefixes all subjects
    #[structopt(long, env, global = true, default_value = "eventbus")]
    pub cluster_id: String,

    /// Approximate number of events retained per subject
    #[structopt(long, env, global = true, default_value = "100000")]
    pub retention_limit: usize,

    /// Number of attempts to establish the initial broker connection before giving up
    #[structopt(long, env, global = true, default_value = "10")]
    pub connect_attempts: u32,
}

impl BrokerOptions {
    /// Broker client matching the configured URL
    pub fn client(&self) -> Arc<dyn BrokerClient> {
        Arc::new(RedisBrokerClient::new(self.retention_limit))
    }

    /// Connection coordinates for a client with the given identity
    pub fn target(&self, client_id: &str) -> BrokerTarget {
        BrokerTarget::new(&self.cluster_id, client_id, &self.url)
    }
}

/// Options relevant for message queueing
#[derive(Debug, StructOpt)]
pub struct QueueingOptions {
    /// Unique and stable identifier for this instance.
    /// It is used as the broker client identity and to
    /// resume consumption after a crash or deliberate restart,
    /// thus it may not change across executions!
    #[structopt(env)]
    pub id: String,
}
