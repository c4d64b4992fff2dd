#![allow(missing_docs)]

use super::{EventSource, Subject};
use crate::constants::CONDITION_EVENTS_ACTIVATED;
use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MAX_INFLIGHT: usize = 400;
const DEFAULT_PUSH_REQUEST_TIMEOUT_MS: u64 = 1000;

fn default_max_inflight() -> usize {
    DEFAULT_MAX_INFLIGHT
}

fn default_push_request_timeout_ms() -> u64 {
    DEFAULT_PUSH_REQUEST_TIMEOUT_MS
}

/// Declaration of a webhook that receives all events with matching coordinates
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "eventing.kyma-project.io",
    version = "v1alpha1",
    kind = "Subscription",
    namespaced,
    status = "SubscriptionStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    pub endpoint: String,
    #[serde(default)]
    pub include_subscription_name_header: bool,
    #[serde(default)]
    pub include_topic_header: bool,
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    #[serde(default = "default_push_request_timeout_ms")]
    pub push_request_timeout_ms: u64,
    pub event_type: String,
    pub event_type_version: String,
    pub source: EventSource,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SubscriptionStatus {
    #[serde(default)]
    pub conditions: Vec<SubscriptionCondition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct SubscriptionCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[serde(other)]
    Unknown,
}

impl Subscription {
    /// Unique identifier assigned by the API server, doubles as the durable consumer name
    pub fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Identity of the resource within the local object cache
    pub fn cache_key(&self) -> String {
        format!("{}/{}", self.namespace(), self.name())
    }

    /// Whether the `events-activated` condition is present and `True`
    pub fn events_activated(&self) -> bool {
        self.status
            .as_ref()
            .map(|status| {
                status.conditions.iter().any(|condition| {
                    condition.condition_type == CONDITION_EVENTS_ACTIVATED
                        && condition.status == ConditionStatus::True
                })
            })
            .unwrap_or(false)
    }

    /// Broker subject carrying the events this subscription is interested in
    pub fn subject(&self) -> Subject {
        Subject::encode(
            &self.spec.source,
            &self.spec.event_type,
            &self.spec.event_type_version,
        )
    }

    pub fn push_request_timeout(&self) -> Duration {
        Duration::from_millis(self.spec.push_request_timeout_ms)
    }
}

#[cfg(test)]
pub(crate) fn subscription(uid: &str, endpoint: &str) -> Subscription {
    let mut subscription = Subscription::new(
        &format!("subscription-{}", uid),
        SubscriptionSpec {
            endpoint: endpoint.to_owned(),
            include_subscription_name_header: false,
            include_topic_header: false,
            max_inflight: DEFAULT_MAX_INFLIGHT,
            push_request_timeout_ms: DEFAULT_PUSH_REQUEST_TIMEOUT_MS,
            event_type: "order.created".into(),
            event_type_version: "v1".into(),
            source: EventSource {
                environment: "test".into(),
                namespace: "local.kyma.commerce".into(),
                source_type: "ec".into(),
            },
        },
    );

    subscription.metadata.uid = Some(uid.to_owned());
    subscription.metadata.namespace = Some("default".into());
    subscription
}

#[cfg(test)]
pub(crate) fn with_activation(mut subscription: Subscription, status: ConditionStatus) -> Subscription {
    subscription.status = Some(SubscriptionStatus {
        conditions: vec![SubscriptionCondition {
            condition_type: CONDITION_EVENTS_ACTIVATED.into(),
            status,
        }],
    });
    subscription
}
