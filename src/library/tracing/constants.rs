//! Service names and attribute keys

#[allow(missing_docs)]
pub mod service {
    pub const NAMESPACE: &str = "Eventbus";

    pub const PUBLISHER: &str = "Publisher";
    pub const DISPATCHER: &str = "Dispatcher";
}

#[allow(missing_docs)]
pub mod trace {
    use opentelemetry::Key;

    pub const SUBSCRIPTION_NAME: Key = Key::from_static_str("eventbus.subscription.name");
    pub const SUBSCRIPTION_NAMESPACE: Key =
        Key::from_static_str("eventbus.subscription.namespace");

    pub const EVENT_SOURCE_ENVIRONMENT: Key =
        Key::from_static_str("eventbus.event.source.environment");
    pub const EVENT_SOURCE_NAMESPACE: Key = Key::from_static_str("eventbus.event.source.namespace");
    pub const EVENT_SOURCE_TYPE: Key = Key::from_static_str("eventbus.event.source.type");
    pub const EVENT_TYPE: Key = Key::from_static_str("eventbus.event.type");
    pub const EVENT_TYPE_VERSION: Key = Key::from_static_str("eventbus.event.type.version");
    pub const EVENT_ID: Key = Key::from_static_str("eventbus.event.id");
}
