//! In-memory broker used by tests
//!
//! Messages are delivered straight from the publishing call to every group subscribed to the subject.
//! Unacknowledged messages are delivered again once the ack-wait duration of their group has elapsed.

#![allow(missing_docs)]

mod session;

use super::super::{BrokerClient, BrokerError, BrokerSession, BrokerTarget, MessageHandler};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use session::{MockMessage, MockSession, MockSubscriptionState};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

/// Operations into which a panic can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Connect,
    Close,
    Publish,
    IsConnected,
    Subscribe,
    Acknowledge,
}

pub(super) struct MockGroup {
    subject: String,
    ack_wait: Duration,
    semaphore: Arc<Semaphore>,
    handler: Option<MessageHandler>,
    subscriptions: Vec<Arc<MockSubscriptionState>>,
    pending: BTreeMap<u64, Vec<u8>>,
    deliveries: usize,
    acknowledgements: usize,
}

impl MockGroup {
    fn is_active(&self) -> bool {
        self.subscriptions
            .iter()
            .any(|s| s.active.load(Ordering::SeqCst))
    }

    fn refresh_handler(&mut self) {
        if !self.is_active() {
            self.handler = None;
        }
    }
}

#[derive(Default)]
pub(super) struct MockState {
    next_session: usize,
    next_message: u64,
    connects: usize,
    failing_connects: usize,
    failing_subscribes: usize,
    connect_delay: Option<Duration>,
    panics: HashSet<MockOperation>,
    sessions: HashMap<usize, Arc<session::MockSessionState>>,
    published: Vec<(String, Vec<u8>)>,
    groups: HashMap<String, MockGroup>,
}

/// Broker double which records everything that happens to it
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<MockState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> Arc<dyn BrokerClient> {
        Arc::new(self.clone())
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Panics on every subsequent call of the given operation
    pub fn panic_on(&self, operation: MockOperation) {
        self.lock().panics.insert(operation);
    }

    pub(super) fn should_panic(&self, operation: MockOperation) -> bool {
        self.lock().panics.contains(&operation)
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.lock().failing_connects = count;
    }

    pub fn fail_next_subscribes(&self, count: usize) {
        self.lock().failing_subscribes = count;
    }

    pub fn delay_connects(&self, delay: Duration) {
        self.lock().connect_delay = Some(delay);
    }

    /// Number of connection attempts, including failed ones
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Breaks every session established so far along with their subscriptions
    pub fn disconnect(&self) {
        let mut state = self.lock();

        for session in state.sessions.values() {
            session.broken.store(true, Ordering::SeqCst);
        }

        for group in state.groups.values_mut() {
            for subscription in &group.subscriptions {
                subscription.active.store(false, Ordering::SeqCst);
            }
            group.refresh_handler();
        }
    }

    pub fn published(&self, subject: &str) -> Vec<Vec<u8>> {
        self.lock()
            .published
            .iter()
            .filter(|(s, _)| s == subject)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn deliveries(&self, durable: &str) -> usize {
        self.lock()
            .groups
            .get(durable)
            .map(|g| g.deliveries)
            .unwrap_or_default()
    }

    pub fn acknowledgements(&self, durable: &str) -> usize {
        self.lock()
            .groups
            .get(durable)
            .map(|g| g.acknowledgements)
            .unwrap_or_default()
    }

    pub fn pending(&self, durable: &str) -> usize {
        self.lock()
            .groups
            .get(durable)
            .map(|g| g.pending.len())
            .unwrap_or_default()
    }

    pub fn active_subscriptions(&self, durable: &str) -> usize {
        self.lock()
            .groups
            .get(durable)
            .map(|g| {
                g.subscriptions
                    .iter()
                    .filter(|s| s.active.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or_default()
    }

    pub fn has_durable(&self, durable: &str) -> bool {
        self.lock().groups.contains_key(durable)
    }

    pub(super) fn store(&self, subject: &str, payload: &[u8]) {
        let mut state = self.lock();
        state.published.push((subject.to_owned(), payload.to_vec()));

        let mut targets = Vec::new();
        let id = state.next_message;
        state.next_message += 1;

        for (durable, group) in state.groups.iter_mut() {
            if group.subject == subject {
                group.pending.insert(id, payload.to_vec());
                targets.push(durable.clone());
            }
        }

        drop(state);

        for durable in targets {
            self.dispatch(durable, id, Duration::default());
        }
    }

    pub(super) fn register(
        &self,
        durable: &str,
        subject: &str,
        ack_wait: Duration,
        max_inflight: usize,
        handler: MessageHandler,
        subscription: Arc<MockSubscriptionState>,
    ) {
        let mut state = self.lock();
        let group = state
            .groups
            .entry(durable.to_owned())
            .or_insert_with(|| MockGroup {
                subject: subject.to_owned(),
                ack_wait,
                semaphore: Arc::new(Semaphore::new(max_inflight.max(1))),
                handler: None,
                subscriptions: Vec::new(),
                pending: BTreeMap::new(),
                deliveries: 0,
                acknowledgements: 0,
            });

        group.handler = Some(handler);
        group.subscriptions.push(subscription);

        let pending: Vec<u64> = group.pending.keys().copied().collect();
        drop(state);

        for id in pending {
            self.dispatch(durable.to_owned(), id, Duration::default());
        }
    }

    pub(super) fn deactivate(&self, subscription: &MockSubscriptionState, remove_durable: bool) {
        subscription.active.store(false, Ordering::SeqCst);

        let mut state = self.lock();
        if remove_durable {
            state.groups.remove(&subscription.durable);
        } else if let Some(group) = state.groups.get_mut(&subscription.durable) {
            group.refresh_handler();
        }
    }

    pub(super) fn remove_group(&self, durable: &str) {
        if let Some(group) = self.lock().groups.remove(durable) {
            for subscription in &group.subscriptions {
                subscription.active.store(false, Ordering::SeqCst);
            }
        }
    }

    pub(super) fn acknowledge(&self, durable: &str, id: u64) -> Result<(), BrokerError> {
        let mut state = self.lock();
        let group = state
            .groups
            .get_mut(durable)
            .ok_or(BrokerError::SubscriptionClosed)?;

        group.acknowledgements += 1;
        group.pending.remove(&id);

        Ok(())
    }

    fn dispatch(&self, durable: String, id: u64, delay: Duration) {
        tokio::spawn(self.clone().deliver(durable, id, delay));
    }

    fn deliver(self, durable: String, id: u64, delay: Duration) -> BoxFuture<'static, ()> {
        async move {
            sleep(delay).await;

            let (handler, semaphore, subject, payload, ack_wait) = {
                let state = self.lock();
                let group = match state.groups.get(&durable) {
                    Some(group) => group,
                    None => return,
                };

                match (group.handler.clone(), group.pending.get(&id)) {
                    (Some(handler), Some(payload)) => (
                        handler,
                        group.semaphore.clone(),
                        group.subject.clone(),
                        payload.clone(),
                        group.ack_wait,
                    ),
                    _ => return,
                }
            };

            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            if let Some(group) = self.lock().groups.get_mut(&durable) {
                group.deliveries += 1;
            }

            let message = MockMessage::new(self.clone(), durable.clone(), id, subject, payload);
            handler(Box::new(message)).await;
            drop(permit);

            let still_pending = self
                .lock()
                .groups
                .get(&durable)
                .map(|g| g.pending.contains_key(&id))
                .unwrap_or(false);

            if still_pending {
                self.dispatch(durable, id, ack_wait);
            }
        }
        .boxed()
    }

    pub(super) fn new_session(&self) -> Arc<session::MockSessionState> {
        let mut state = self.lock();
        let id = state.next_session;
        state.next_session += 1;

        let session = Arc::new(session::MockSessionState::new(id));
        state.sessions.insert(id, session.clone());
        session
    }

    pub(super) fn take_subscribe_failure(&self) -> bool {
        let mut state = self.lock();
        if state.failing_subscribes > 0 {
            state.failing_subscribes -= 1;
            true
        } else {
            false
        }
    }

    pub(super) fn close_session_subscriptions(&self, session: usize) {
        let mut state = self.lock();
        for group in state.groups.values_mut() {
            for subscription in &group.subscriptions {
                if subscription.session == session {
                    subscription.active.store(false, Ordering::SeqCst);
                }
            }
            group.refresh_handler();
        }
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn connect(&self, _target: &BrokerTarget) -> Result<Arc<dyn BrokerSession>, BrokerError> {
        let (delay, fail) = {
            let mut state = self.lock();
            state.connects += 1;

            let fail = state.failing_connects > 0;
            if fail {
                state.failing_connects -= 1;
            }

            (state.connect_delay, fail)
        };

        if self.should_panic(MockOperation::Connect) {
            panic!("injected connect panic");
        }

        if let Some(delay) = delay {
            sleep(delay).await;
        }

        if fail {
            return Err(BrokerError::Backend("connection refused".into()));
        }

        Ok(Arc::new(MockSession::new(self.clone(), self.new_session())))
    }
}
