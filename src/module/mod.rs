//! Runnable modules containing each bundling multiple jobs and providing a unified configuration

pub mod options;

pub mod dispatcher;
pub mod publisher;

#[cfg(test)]
mod end_to_end;

use crate::library::backoff::Backoff;
use crate::library::communication::{
    BrokerError, BrokerTarget, ConnectionHandle, ConnectionManager,
};
use tokio::time::sleep;
use tracing::{info, warn};

/// Establishes a broker connection, retrying with an exponential backoff until the attempts are used up
pub(crate) async fn connect_with_backoff(
    manager: &ConnectionManager,
    target: &BrokerTarget,
    attempts: u32,
) -> Result<ConnectionHandle, BrokerError> {
    let mut backoff = Backoff::with_limit(attempts.saturating_sub(1));

    loop {
        match manager.connect_to(target).await {
            Ok(handle) => return Ok(handle),
            Err(error) => match backoff.next() {
                Some(delay) => {
                    warn!(%error, ?delay, "Failed to connect to broker, retrying");
                    sleep(delay).await;
                }
                None => {
                    info!("Giving up on connecting to broker");
                    return Err(error);
                }
            },
        }
    }
}
