//! Test doubles shared by the agent's unit tests

use crate::channel::ControlChannel;
use crate::dispatcher::Handler;
use anyhow::Result;
use async_trait::async_trait;
use beacon_transport::{MessageCallback, Transport, TransportError, TransportFactory, TransportRegistry};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Shared record of everything the mock transports did
#[derive(Default)]
struct MockState {
    connects: AtomicUsize,
    teardowns: AtomicUsize,
    sent: Mutex<Vec<String>>,
    callback: Mutex<Option<MessageCallback>>,
}

/// Factory producing in-memory transports
pub struct MockFactory {
    name: String,
    available: AtomicBool,
    fail_sends: bool,
    state: Arc<MockState>,
}

impl MockFactory {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            available: AtomicBool::new(true),
            fail_sends: false,
            state: Arc::new(MockState::default()),
        })
    }

    pub fn failing_sends(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            available: AtomicBool::new(true),
            fail_sends: true,
            state: Arc::new(MockState::default()),
        })
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.state.teardowns.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn sent_operations(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|frame| serde_json::from_str::<Value>(frame).ok())
            .filter_map(|value| value.get("operation").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Deliver a frame as if the controller had sent it
    pub fn push_inbound(&self, frame: &str) {
        let callback = self.state.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(frame.to_string());
        }
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(TransportError::Connection(format!("{} unavailable", self.name)));
        }
        Ok(Box::new(MockTransport {
            name: self.name.clone(),
            fail_sends: self.fail_sends,
            closed: false,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockTransport {
    name: String,
    fail_sends: bool,
    closed: bool,
    state: Arc<MockState>,
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_message(&mut self, callback: MessageCallback) -> Result<(), TransportError> {
        *self.state.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.fail_sends {
            return Err(TransportError::NotReady { attempts: 5 });
        }
        self.state.sent.lock().unwrap().push(frame);
        Ok(())
    }

    fn teardown(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.teardowns.fetch_add(1, Ordering::SeqCst);
            *self.state.callback.lock().unwrap() = None;
        }
    }
}

pub type CallLog = Arc<Mutex<Vec<(String, Value)>>>;

/// Handler that records every payload it sees
pub struct RecordingHandler {
    label: String,
    log: CallLog,
}

impl RecordingHandler {
    pub fn log() -> CallLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn new(label: &str, log: &CallLog) -> Arc<Self> {
        Arc::new(Self { label: label.to_string(), log: Arc::clone(log) })
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn handle(&self, data: Value, _channel: Arc<ControlChannel>) -> Result<()> {
        self.log.lock().unwrap().push((self.label.clone(), data));
        Ok(())
    }
}

/// Channel with no transport candidates
pub fn idle_channel() -> (Arc<ControlChannel>, mpsc::UnboundedReceiver<String>) {
    channel_with(&[])
}

/// Channel whose registry holds the given mock candidates
pub fn channel_with(candidates: &[(i32, Arc<MockFactory>)]) -> (Arc<ControlChannel>, mpsc::UnboundedReceiver<String>) {
    let mut registry = TransportRegistry::new();
    for (priority, factory) in candidates {
        registry.register_factory(*priority, factory.clone());
    }
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ControlChannel::new(registry, tx)), rx)
}
