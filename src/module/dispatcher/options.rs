use crate::library::helpers::parse_seconds;
use crate::module::options::{BrokerOptions, QueueingOptions};
use std::time::Duration;
use structopt::StructOpt;

/// Options for the dispatcher module
#[derive(Debug, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub queueing: QueueingOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub transport: TransportOptions,

    /// Port of the health endpoints
    #[structopt(long, env, default_value = "8081")]
    pub port: u16,

    /// Duration in seconds after which unacknowledged events are delivered again
    #[structopt(long, env, default_value = "30", parse(try_from_str = parse_seconds))]
    pub ack_wait: Duration,

    /// Interval in seconds in which subscriptions without an active consumer are bound again
    #[structopt(long, env, default_value = "30", parse(try_from_str = parse_seconds))]
    pub rebind_interval: Duration,

    /// Number of subscription changes that may be queued before callers are blocked
    #[structopt(long, env, default_value = "1000")]
    pub action_queue_size: usize,

    /// Only start subscriptions once their `events-activated` condition is true
    #[structopt(long, env)]
    pub activation_gated: bool,

    /// Restrict the subscription watch to a single namespace
    #[structopt(long, env)]
    pub watch_namespace: Option<String>,
}

/// Options of the HTTP client used to push events
#[derive(Debug, StructOpt)]
pub struct TransportOptions {
    /// Maximum number of idle connections kept per webhook host
    #[structopt(long, env, default_value = "100")]
    pub max_idle_connections: usize,

    /// Duration in seconds after which idle connections are closed
    #[structopt(long, env, default_value = "90", parse(try_from_str = parse_seconds))]
    pub idle_connection_timeout: Duration,

    /// Accept invalid TLS certificates of webhook endpoints
    #[structopt(long, env)]
    pub insecure_skip_verify: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_idle_connections: 100,
            idle_connection_timeout: Duration::from_secs(90),
            insecure_skip_verify: false,
        }
    }
}
