//! A scripted in-memory transport for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::channel::mpsc;
use futures::future::{self, BoxFuture};
use futures::{Stream, StreamExt};
use futures_timer::Delay;
use geolocator_platform_interface::{EventStream, PlatformException, Transport, TransportResult};
use serde_json::{Value, json};

/// How the fake answers a method call.
#[derive(Debug, Clone)]
pub enum Reply {
    Value(Value),
    Error(PlatformException),
    After(Duration, Box<Reply>),
    Never,
}

impl Reply {
    pub fn error(code: &str, message: &str) -> Self {
        Self::Error(PlatformException::new(code, message))
    }

    pub fn after(millis: u64, reply: Self) -> Self {
        Self::After(Duration::from_millis(millis), Box::new(reply))
    }
}

/// A recorded method call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub channel: String,
    pub method: String,
    pub arguments: Option<Value>,
}

#[derive(Debug, Default)]
struct Channel {
    sender: Option<mpsc::UnboundedSender<TransportResult>>,
    arguments: Vec<Option<Value>>,
    live: Arc<AtomicUsize>,
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<Call>>,
    channels: Mutex<HashMap<String, Channel>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, method: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert(method.to_owned(), reply);
    }

    pub fn reply_value(&self, method: &str, value: Value) {
        self.reply(method, Reply::Value(value));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn emit(&self, channel: &str, value: Value) {
        self.send(channel, Ok(value));
    }

    pub fn fail(&self, channel: &str, code: &str, message: &str) {
        self.send(channel, Err(PlatformException::new(code, message)));
    }

    /// Ends the current subscription from the native side.
    pub fn close(&self, channel: &str) {
        if let Some(state) = self.channels.lock().unwrap().get_mut(channel) {
            state.sender = None;
        }
    }

    /// Number of subscriptions ever opened on `channel`.
    pub fn opened(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .unwrap()
            .get(channel)
            .map_or(0, |state| state.arguments.len())
    }

    /// Number of subscriptions on `channel` that have not been dropped.
    pub fn live(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .unwrap()
            .get(channel)
            .map_or(0, |state| state.live.load(Ordering::SeqCst))
    }

    pub fn subscribe_arguments(&self, channel: &str) -> Vec<Option<Value>> {
        self.channels
            .lock()
            .unwrap()
            .get(channel)
            .map(|state| state.arguments.clone())
            .unwrap_or_default()
    }

    fn send(&self, channel: &str, event: TransportResult) {
        let channels = self.channels.lock().unwrap();
        let sender = channels
            .get(channel)
            .and_then(|state| state.sender.as_ref())
            .unwrap_or_else(|| panic!("no open subscription on {channel}"));
        sender.unbounded_send(event).unwrap();
    }
}

async fn resolve(mut reply: Reply) -> TransportResult {
    loop {
        match reply {
            Reply::Value(value) => return Ok(value),
            Reply::Error(exception) => return Err(exception),
            Reply::After(wait, next) => {
                Delay::new(wait).await;
                reply = *next;
            }
            Reply::Never => return future::pending().await,
        }
    }
}

impl Transport for FakeTransport {
    fn invoke(
        &self,
        channel: &str,
        method: &str,
        arguments: Option<Value>,
    ) -> BoxFuture<'static, TransportResult> {
        self.calls.lock().unwrap().push(Call {
            channel: channel.to_owned(),
            method: method.to_owned(),
            arguments,
        });
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(method)
            .cloned()
            .unwrap_or_else(|| Reply::error("UNSCRIPTED", method));
        Box::pin(resolve(reply))
    }

    fn subscribe(&self, channel: &str, arguments: Option<Value>) -> EventStream {
        let (sender, receiver) = mpsc::unbounded();
        let mut channels = self.channels.lock().unwrap();
        let state = channels.entry(channel.to_owned()).or_default();
        state.sender = Some(sender);
        state.arguments.push(arguments);
        state.live.fetch_add(1, Ordering::SeqCst);
        Box::pin(LiveSubscription {
            receiver,
            live: Arc::clone(&state.live),
        })
    }
}

struct LiveSubscription {
    receiver: mpsc::UnboundedReceiver<TransportResult>,
    live: Arc<AtomicUsize>,
}

impl Stream for LiveSubscription {
    type Item = TransportResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn position_json(latitude: f64, longitude: f64, timestamp: u64) -> Value {
    json!({
        "latitude": latitude,
        "longitude": longitude,
        "timestamp": timestamp,
        "accuracy": 5.0,
        "altitude": 10.0,
        "heading": 0.0,
        "speed": 0.0,
        "speed_accuracy": 0.0,
        "is_mocked": false,
    })
}
