use super::super::super::{
    BrokerError, BrokerMessage, BrokerSession, MessageHandler, QueueSubscribeRequest,
    QueueSubscription,
};
use super::{MockBroker, MockOperation};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct MockSessionState {
    id: usize,
    closed: AtomicBool,
    pub(super) broken: AtomicBool,
}

impl MockSessionState {
    pub(super) fn new(id: usize) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            broken: AtomicBool::new(false),
        }
    }

    fn is_usable(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.broken.load(Ordering::SeqCst)
    }
}

pub struct MockSession {
    broker: MockBroker,
    state: Arc<MockSessionState>,
}

impl MockSession {
    pub(super) fn new(broker: MockBroker, state: Arc<MockSessionState>) -> Self {
        Self { broker, state }
    }
}

#[async_trait]
impl BrokerSession for MockSession {
    fn is_connected(&self) -> bool {
        if self.broker.should_panic(MockOperation::IsConnected) {
            panic!("injected connection check panic");
        }

        self.state.is_usable()
    }

    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if self.broker.should_panic(MockOperation::Publish) {
            panic!("injected publish panic");
        }

        if self.state.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        } else if self.state.broken.load(Ordering::SeqCst) {
            return Err(BrokerError::Backend("connection lost".into()));
        }

        self.broker.store(subject, payload);
        Ok(())
    }

    async fn queue_subscribe(
        &self,
        request: QueueSubscribeRequest,
        handler: MessageHandler,
    ) -> Result<Box<dyn QueueSubscription>, BrokerError> {
        if self.broker.should_panic(MockOperation::Subscribe) {
            panic!("injected subscribe panic");
        }

        if !self.state.is_usable() {
            return Err(BrokerError::ConnectionClosed);
        }

        if self.broker.take_subscribe_failure() {
            return Err(BrokerError::Backend("subscription rejected".into()));
        }

        let subscription = Arc::new(MockSubscriptionState {
            session: self.state.id,
            durable: request.durable_name.clone(),
            active: AtomicBool::new(true),
        });

        self.broker.register(
            &request.durable_name,
            &request.subject,
            request.ack_wait,
            request.max_inflight,
            handler,
            subscription.clone(),
        );

        Ok(Box::new(MockSubscription {
            broker: self.broker.clone(),
            state: subscription,
        }))
    }

    async fn remove_durable(&self, _subject: &str, durable_name: &str) -> Result<(), BrokerError> {
        if !self.state.is_usable() {
            return Err(BrokerError::ConnectionClosed);
        }

        self.broker.remove_group(durable_name);
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.broker.should_panic(MockOperation::Close) {
            panic!("injected close panic");
        }

        if self.state.closed.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        }

        self.broker.close_session_subscriptions(self.state.id);
        Ok(())
    }
}

pub struct MockSubscriptionState {
    pub(super) session: usize,
    pub(super) durable: String,
    pub(super) active: AtomicBool,
}

struct MockSubscription {
    broker: MockBroker,
    state: Arc<MockSubscriptionState>,
}

#[async_trait]
impl QueueSubscription for MockSubscription {
    fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }

    async fn unsubscribe(&self) -> Result<(), BrokerError> {
        self.broker.deactivate(&self.state, true);
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.state.active.load(Ordering::SeqCst) {
            return Err(BrokerError::SubscriptionClosed);
        }

        self.broker.deactivate(&self.state, false);
        Ok(())
    }
}

pub struct MockMessage {
    broker: MockBroker,
    durable: String,
    id: u64,
    subject: String,
    payload: Vec<u8>,
}

impl MockMessage {
    pub(super) fn new(
        broker: MockBroker,
        durable: String,
        id: u64,
        subject: String,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            broker,
            durable,
            id,
            subject,
            payload,
        }
    }
}

#[async_trait]
impl BrokerMessage for MockMessage {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn acknowledge(&mut self) -> Result<(), BrokerError> {
        if self.broker.should_panic(MockOperation::Acknowledge) {
            panic!("injected acknowledge panic");
        }

        self.broker.acknowledge(&self.durable, self.id)
    }
}
