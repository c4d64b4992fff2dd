//! Fixtures shared by the dispatcher tests

use super::handler::MessageHandlerFactory;
use super::supervisor::{Supervisor, SupervisorConfig, SupervisorHandle};
use crate::domain::Subscription;
use crate::library::communication::implementation::mock::MockBroker;
use crate::library::communication::{BrokerTarget, ConnectionManager, MessageHandler};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;

/// Handler factory whose handlers drop every message without acknowledging it
pub struct DiscardingFactory;

impl MessageHandlerFactory for DiscardingFactory {
    fn create(&self, _subscription: &Subscription) -> MessageHandler {
        Arc::new(|_message| async {}.boxed())
    }
}

/// Spawns a supervisor connected to the mock broker which does not rebind on its own
pub async fn supervisor(broker: &MockBroker) -> SupervisorHandle {
    let manager = ConnectionManager::new(broker.client());
    let target = BrokerTarget::new("cluster", "dispatcher", "mock://");
    let connection = manager.connect_to(&target).await.unwrap();

    Supervisor::spawn(
        manager,
        target,
        Some(connection),
        Arc::new(DiscardingFactory),
        SupervisorConfig {
            ack_wait: Duration::from_secs(30),
            rebind_interval: Duration::from_secs(30),
            action_queue_size: 16,
        },
    )
    .0
}
