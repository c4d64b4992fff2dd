//! Translation of subscription resource changes into supervisor actions

use super::supervisor::{SupervisorError, SupervisorHandle};
use crate::domain::Subscription;
use kube_runtime::watcher::Event;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Change of a single subscription resource
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Resource has been seen for the first time
    Added(Subscription),
    /// Known resource has changed
    Updated {
        /// Last state seen before the change
        old: Subscription,
        /// Current state
        new: Subscription,
    },
    /// Resource has been removed
    Deleted(Subscription),
}

/// Local copy of all watched resources, used to derive notifications from watch events
#[derive(Debug, Default)]
pub struct SubscriptionCache {
    objects: HashMap<String, Subscription>,
}

impl SubscriptionCache {
    /// Incorporates a watch event and returns the resulting notifications
    pub fn apply(&mut self, event: Event<Subscription>) -> Vec<Notification> {
        match event {
            Event::Applied(subscription) => self.upsert(subscription),
            Event::Deleted(subscription) => {
                self.objects.remove(&subscription.cache_key());
                vec![Notification::Deleted(subscription)]
            }
            Event::Restarted(subscriptions) => {
                let present: HashSet<String> =
                    subscriptions.iter().map(Subscription::cache_key).collect();

                let vanished: Vec<String> = self
                    .objects
                    .keys()
                    .filter(|key| !present.contains(*key))
                    .cloned()
                    .collect();

                let mut notifications: Vec<Notification> = vanished
                    .into_iter()
                    .filter_map(|key| self.objects.remove(&key))
                    .map(Notification::Deleted)
                    .collect();

                for subscription in subscriptions {
                    notifications.extend(self.upsert(subscription));
                }

                notifications
            }
        }
    }

    fn upsert(&mut self, subscription: Subscription) -> Vec<Notification> {
        match self
            .objects
            .insert(subscription.cache_key(), subscription.clone())
        {
            None => vec![Notification::Added(subscription)],
            // A resource recreated under the same name is a different subscription
            Some(old) if old.uid() != subscription.uid() => vec![
                Notification::Deleted(old),
                Notification::Added(subscription),
            ],
            Some(old) => vec![Notification::Updated {
                old,
                new: subscription,
            }],
        }
    }
}

/// Forwards notifications to the supervisor
#[derive(Clone)]
pub struct SubscriptionController {
    supervisor: SupervisorHandle,
    activation_gated: bool,
}

impl SubscriptionController {
    /// Creates a new instance. In activation gated mode added subscriptions are only started once
    /// their `events-activated` condition is true.
    pub fn new(supervisor: SupervisorHandle, activation_gated: bool) -> Self {
        Self {
            supervisor,
            activation_gated,
        }
    }

    /// Submits the action matching a notification
    pub async fn notify(&self, notification: Notification) -> Result<(), SupervisorError> {
        match notification {
            Notification::Added(subscription) => {
                if !self.activation_gated || subscription.events_activated() {
                    debug!(name = %subscription.cache_key(), "Subscription added");
                    self.supervisor
                        .start_subscription_request(subscription)
                        .await?;
                } else {
                    debug!(name = %subscription.cache_key(), "Subscription added but not activated");
                }
            }
            Notification::Updated { old, new } => {
                match (old.events_activated(), new.events_activated()) {
                    (true, false) => {
                        debug!(name = %old.cache_key(), "Subscription deactivated");
                        self.supervisor.stop_subscription_request(old).await?;
                    }
                    (false, true) => {
                        debug!(name = %new.cache_key(), "Subscription activated");
                        self.supervisor.start_subscription_request(new).await?;
                    }
                    _ => trace!(name = %new.cache_key(), "Ignoring subscription update"),
                }
            }
            Notification::Deleted(subscription) => {
                debug!(name = %subscription.cache_key(), "Subscription deleted");
                self.supervisor
                    .stop_subscription_request(subscription)
                    .await?;
            }
        }

        Ok(())
    }
}
