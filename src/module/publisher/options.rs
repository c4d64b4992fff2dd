use crate::module::options::{BrokerOptions, QueueingOptions};
use structopt::StructOpt;

/// Options for the publisher module
#[derive(Debug, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub queueing: QueueingOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    /// Port on which events are accepted
    #[structopt(long, env, default_value = "8080")]
    pub port: u16,

    /// Maximum size of a request body in bytes.
    /// Larger requests are rejected before being read.
    #[structopt(long, env, default_value = "65536")]
    pub max_request_size: u64,
}
