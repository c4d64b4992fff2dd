//! Constants shared between modules

/// Name of the condition which signals that the event source of a subscription is reachable
pub const CONDITION_EVENTS_ACTIVATED: &str = "events-activated";

/// Envelope extension under which the serialized trace context travels
pub const EXTENSION_TRACE_CONTEXT: &str = "trace-context";

/// Request headers from which the event source is read when the body does not carry one
pub mod source_headers {
    /// Source environment
    pub const ENVIRONMENT: &str = "Source-Environment";
    /// Source namespace
    pub const NAMESPACE: &str = "Source-Namespace";
    /// Source type
    pub const TYPE: &str = "Source-Type";
}

/// Headers attached to outgoing webhook requests
pub mod push_headers {
    /// Name of the subscription the delivery belongs to
    pub const SUBSCRIPTION: &str = "X-Eventbus-Subscription";
    /// Broker subject the event has been received on
    pub const TOPIC: &str = "X-Eventbus-Topic";

    /// Environment of the event source
    pub const SOURCE_ENVIRONMENT: &str = "X-Event-Source-Environment";
    /// Namespace of the event source
    pub const SOURCE_NAMESPACE: &str = "X-Event-Source-Namespace";
    /// Type of the event source
    pub const SOURCE_TYPE: &str = "X-Event-Source-Type";
    /// Event type
    pub const EVENT_TYPE: &str = "X-Event-Type";
    /// Event type version
    pub const EVENT_TYPE_VERSION: &str = "X-Event-Type-Version";
    /// Event identifier
    pub const EVENT_ID: &str = "X-Event-Id";
    /// Event time
    pub const EVENT_TIME: &str = "X-Event-Time";
}
