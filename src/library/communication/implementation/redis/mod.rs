//! Trait implementations using [Redis Streams](https://redis.io/topics/streams-intro)
//!
//! Every subject maps to one stream, namespaced by the cluster identifier. Durable queue subscriptions
//! are consumer groups on that stream: the group name is the durable name and each process joins
//! with its client identifier as the consumer name. Entries which have not been acknowledged within
//! the ack-wait duration are claimed again from the pending entries list and redelivered.

const STREAM_PAYLOAD_KEY: &str = "payload";
const STREAM_ID_NEW: &str = "*";
const STREAM_ID_TAIL: &str = "$";
const STREAM_ID_ADDITIONS: &str = ">";
const ERROR_CODE_GROUP_EXISTS: &str = "BUSYGROUP";

mod client;
mod message;
mod subscription;

pub use client::*;

use crate::library::communication::BrokerError;
use redis::RedisError;
use std::time::Duration;

impl From<RedisError> for BrokerError {
    fn from(error: RedisError) -> Self {
        BrokerError::Backend(Box::new(error))
    }
}

/// Key of the stream that backs a subject
pub fn stream_key(cluster_id: &str, subject: &str) -> String {
    format!("{}:{}", cluster_id, subject)
}

/// Whether the error indicates that the connection is no longer usable
fn is_connection_error(error: &RedisError) -> bool {
    error.is_connection_dropped()
        || error.is_io_error()
        || error.is_connection_refusal()
        || error.is_timeout()
}

/// Selects the pending entries which have been idle for at least the ack-wait duration
fn stale_entries<'a>(
    pending: impl IntoIterator<Item = (&'a str, usize)>,
    ack_wait: Duration,
) -> Vec<String> {
    let threshold = ack_wait.as_millis();

    pending
        .into_iter()
        .filter(|(_, idle)| *idle as u128 >= threshold)
        .map(|(id, _)| id.to_owned())
        .collect()
}
