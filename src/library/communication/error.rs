use crate::library::BoxedError;
use thiserror::Error;

/// Errors returned by broker operations
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Operation was attempted without an established connection
    #[error("no broker connection has been established")]
    NotConnected,
    /// Connection has been closed before or during the operation
    #[error("broker connection has already been closed")]
    ConnectionClosed,
    /// Broker client panicked while executing the operation
    #[error("broker client panicked during {operation}: {message}")]
    Panicked {
        /// Name of the operation that was executed
        operation: &'static str,
        /// Message extracted from the panic payload
        message: String,
    },
    /// Subscription has been closed or unsubscribed already
    #[error("subscription is no longer active")]
    SubscriptionClosed,
    /// Broker returned an entry without a payload
    #[error("message is missing its payload")]
    MissingPayload,
    /// Broker backend reported an error
    #[error("broker backend failure")]
    Backend(#[source] BoxedError),
}
