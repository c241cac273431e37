//! Reference-counted sharing of one native event subscription.
//!
//! Opening a platform subscription switches on physical sensors, so every
//! event kind keeps at most one open at a time and fans its events out to
//! however many listeners are attached:
//!
//! ```text
//! listener A ─┐
//! listener B ─┼──► SharedStream ──► Transport::subscribe (one per active period)
//! listener C ─┘
//! ```
//!
//! No task is spawned. Whichever listener is polled pumps one event out of
//! the subscription into every listener's single-slot queue. The next event
//! is only pulled once every listener has taken the previous one, so at most
//! one event is ever in flight. The subscription and the deadline timer are
//! polled with a waker that wakes all listeners, so progress never depends
//! on one particular listener being polled.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use async_channel::{Receiver, Sender, TryRecvError};
use futures::task::{self, ArcWake};
use futures::{FutureExt, Stream, StreamExt};
use futures_timer::Delay;
use log::{debug, warn};
use serde_json::Value;

use crate::error::{GeolocatorError, GeolocatorResult};
use crate::transport::{EventStream, Transport};

/// Decodes one event payload into the stream's item type.
pub(crate) type Decoder<T> = fn(Value) -> GeolocatorResult<T>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Caches the live [`SharedStream`] of one event kind.
///
/// While a stream is live every request gets that same stream back. Once it
/// finishes (last listener gone, failure, timeout or completion) the next
/// request builds a fresh one.
pub(crate) struct Multiplexer<T> {
    channel: &'static str,
    decode: Decoder<T>,
    current: Mutex<Option<SharedStream<T>>>,
}

impl<T> fmt::Debug for Multiplexer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("channel", &self.channel)
            .field("current", &*lock(&self.current))
            .finish()
    }
}

impl<T> Multiplexer<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) const fn new(channel: &'static str, decode: Decoder<T>) -> Self {
        Self {
            channel,
            decode,
            current: Mutex::new(None),
        }
    }

    /// Returns the live stream, or creates one that will subscribe with
    /// `arguments` when its first listener attaches.
    pub(crate) fn stream(
        &self,
        transport: &Arc<dyn Transport>,
        arguments: Option<Value>,
        time_limit: Option<Duration>,
    ) -> SharedStream<T> {
        let mut current = lock(&self.current);
        if let Some(live) = current.as_ref().filter(|stream| !stream.is_finished()) {
            return live.clone();
        }

        let stream = SharedStream::new(Source {
            transport: Arc::clone(transport),
            channel: self.channel,
            arguments,
            time_limit,
            decode: self.decode,
        });
        *current = Some(stream.clone());
        stream
    }
}

struct Source<T> {
    transport: Arc<dyn Transport>,
    channel: &'static str,
    arguments: Option<Value>,
    time_limit: Option<Duration>,
    decode: Decoder<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Handed out, nobody listening yet.
    Pending,
    /// Subscription open.
    Active,
    /// Torn down for good.
    Finished,
}

/// Re-armed after every delivered event.
struct Deadline {
    limit: Duration,
    timer: Delay,
}

impl Deadline {
    fn arm(limit: Duration) -> Self {
        Self {
            limit,
            timer: Delay::new(limit),
        }
    }

    fn rearm(&mut self) {
        self.timer.reset(self.limit);
    }
}

enum End {
    Failed(GeolocatorError),
    Completed,
}

struct HubState<T> {
    phase: Phase,
    subscription: Option<EventStream>,
    deadline: Option<Deadline>,
    listeners: HashMap<u64, Sender<GeolocatorResult<T>>>,
    next_id: u64,
    /// A pump was skipped because some listener still held an event.
    stalled: bool,
}

impl<T> HubState<T> {
    fn has_undelivered(&self) -> bool {
        self.listeners.values().any(|sender| !sender.is_empty())
    }

    fn finish(&mut self, channel: &str) {
        self.phase = Phase::Finished;
        self.subscription = None;
        self.deadline = None;
        // Dropping the senders lets each listener drain its queue and then end.
        self.listeners.clear();
        debug!("closed subscription on {channel}");
    }
}

impl<T: Clone> HubState<T> {
    fn broadcast(&self, event: &GeolocatorResult<T>) {
        for sender in self.listeners.values() {
            // Pumping waits for every queue to drain, so each slot is free.
            let _ = sender.try_send(event.clone());
        }
    }
}

#[derive(Default)]
struct ListenerWakers {
    wakers: Mutex<HashMap<u64, Waker>>,
}

impl ListenerWakers {
    fn register(&self, id: u64, waker: &Waker) {
        let mut wakers = lock(&self.wakers);
        match wakers.get(&id) {
            Some(existing) if existing.will_wake(waker) => {}
            _ => {
                wakers.insert(id, waker.clone());
            }
        }
    }

    fn remove(&self, id: u64) {
        lock(&self.wakers).remove(&id);
    }

    fn wake_all(&self) {
        let wakers: Vec<Waker> = lock(&self.wakers).values().cloned().collect();
        for waker in wakers {
            waker.wake();
        }
    }
}

impl ArcWake for ListenerWakers {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.wake_all();
    }
}

struct Hub<T> {
    source: Source<T>,
    state: Mutex<HubState<T>>,
    wakers: Arc<ListenerWakers>,
}

impl<T> Hub<T> {
    fn detach(&self, id: u64) {
        self.wakers.remove(id);

        let mut state = lock(&self.state);
        if state.listeners.remove(&id).is_some()
            && state.listeners.is_empty()
            && state.phase == Phase::Active
        {
            debug!("last listener on {} detached", self.source.channel);
            state.finish(self.source.channel);
        }
        let stalled = std::mem::take(&mut state.stalled);
        drop(state);

        // The departed listener may have been the one holding the others back.
        if stalled {
            self.wakers.wake_all();
        }
    }

    /// Called after a listener took an event out of its queue.
    fn released(&self) {
        let stalled = std::mem::take(&mut lock(&self.state).stalled);
        if stalled {
            self.wakers.wake_all();
        }
    }
}

impl<T> Hub<T>
where
    T: Clone + Send + 'static,
{
    fn attach(self: &Arc<Self>) -> Listener<T> {
        let (sender, receiver) = async_channel::bounded(1);

        let mut state = lock(&self.state);
        let id = state.next_id;
        state.next_id += 1;

        match state.phase {
            Phase::Finished => drop(sender),
            Phase::Pending => {
                debug!("opening subscription on {}", self.source.channel);
                state.subscription = Some(
                    self.source
                        .transport
                        .subscribe(self.source.channel, self.source.arguments.clone()),
                );
                state.deadline = self.source.time_limit.map(Deadline::arm);
                state.phase = Phase::Active;
                state.listeners.insert(id, sender);
            }
            Phase::Active => {
                state.listeners.insert(id, sender);
            }
        }
        drop(state);

        Listener {
            id,
            hub: Arc::clone(self),
            receiver,
        }
    }

    /// Pulls at most one event from the subscription and hands it to every
    /// listener.
    fn pump(&self) {
        let mut state = lock(&self.state);
        if state.phase != Phase::Active {
            return;
        }
        if state.has_undelivered() {
            state.stalled = true;
            return;
        }

        let waker = task::waker(Arc::clone(&self.wakers));
        let mut cx = Context::from_waker(&waker);

        let polled = state
            .subscription
            .as_mut()
            .map(|subscription| subscription.poll_next_unpin(&mut cx));
        let end = match polled {
            None | Some(Poll::Ready(None)) => End::Completed,
            Some(Poll::Ready(Some(Ok(payload)))) => match (self.source.decode)(payload) {
                Ok(event) => {
                    state.broadcast(&Ok(event));
                    if let Some(deadline) = state.deadline.as_mut() {
                        deadline.rearm();
                    }
                    drop(state);
                    self.wakers.wake_all();
                    return;
                }
                Err(err) => {
                    warn!("undecodable event on {}: {err}", self.source.channel);
                    End::Failed(err)
                }
            },
            Some(Poll::Ready(Some(Err(exception)))) => End::Failed(exception.into()),
            Some(Poll::Pending) => {
                let expired = state.deadline.as_mut().and_then(|deadline| {
                    deadline
                        .timer
                        .poll_unpin(&mut cx)
                        .is_ready()
                        .then_some(deadline.limit)
                });
                match expired {
                    Some(limit) => End::Failed(GeolocatorError::Timeout(limit)),
                    None => return,
                }
            }
        };

        match end {
            End::Failed(err) => {
                debug!("subscription on {} failed: {err}", self.source.channel);
                state.broadcast(&Err(err));
            }
            End::Completed => {
                debug!("subscription on {} completed", self.source.channel);
            }
        }
        state.finish(self.source.channel);
        drop(state);
        self.wakers.wake_all();
    }
}

/// One logical event stream shared by any number of [`Listener`]s.
///
/// Clones refer to the same stream; use [`SharedStream::ptr_eq`] to compare
/// identity. The platform subscription is opened when the first listener
/// attaches and closed when the last one is dropped.
pub struct SharedStream<T> {
    hub: Arc<Hub<T>>,
}

impl<T> Clone for SharedStream<T> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
        }
    }
}

impl<T> fmt::Debug for SharedStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.hub.state);
        f.debug_struct("SharedStream")
            .field("channel", &self.hub.source.channel)
            .field("phase", &state.phase)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl<T> SharedStream<T> {
    fn new(source: Source<T>) -> Self {
        Self {
            hub: Arc::new(Hub {
                source,
                state: Mutex::new(HubState {
                    phase: Phase::Pending,
                    subscription: None,
                    deadline: None,
                    listeners: HashMap::new(),
                    next_id: 0,
                    stalled: false,
                }),
                wakers: Arc::new(ListenerWakers::default()),
            }),
        }
    }

    /// Whether both handles refer to the same stream.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.hub, &other.hub)
    }

    /// The event channel this stream subscribes to.
    #[must_use]
    pub fn channel(&self) -> &'static str {
        self.hub.source.channel
    }

    /// Number of attached listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.hub.state).listeners.len()
    }

    /// Whether the platform subscription is currently open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        lock(&self.hub.state).phase == Phase::Active
    }

    /// Whether the stream has ended; new listeners complete immediately.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        lock(&self.hub.state).phase == Phase::Finished
    }
}

impl<T> SharedStream<T>
where
    T: Clone + Send + 'static,
{
    /// Attaches a new listener, opening the platform subscription if this is
    /// the first one.
    ///
    /// The listener sees every event that arrives after it attached. A
    /// failure is delivered as a final `Err` item, after which the listener
    /// ends.
    ///
    /// Listeners advance in lockstep: a new event is only pulled once every
    /// listener has taken the previous one, so a listener that is kept but
    /// never polled holds back the others. Drop listeners you stop reading.
    #[must_use]
    pub fn listen(&self) -> Listener<T> {
        self.hub.attach()
    }
}

/// A consumer attached to a [`SharedStream`]. Dropping it detaches.
pub struct Listener<T> {
    id: u64,
    hub: Arc<Hub<T>>,
    receiver: Receiver<GeolocatorResult<T>>,
}

// The receiver is only used through `&self` methods and never pinned.
impl<T> Unpin for Listener<T> {}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("channel", &self.hub.source.channel)
            .field("queued", &self.receiver.len())
            .finish()
    }
}

impl<T> Stream for Listener<T>
where
    T: Clone + Send + 'static,
{
    type Item = GeolocatorResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.hub.wakers.register(self.id, cx.waker());
        self.hub.pump();

        match self.receiver.try_recv() {
            Ok(event) => {
                self.hub.released();
                Poll::Ready(Some(event))
            }
            Err(TryRecvError::Closed) => Poll::Ready(None),
            Err(TryRecvError::Empty) => Poll::Pending,
        }
    }
}

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        self.hub.detach(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{PlatformException, TransportResult};
    use futures::channel::mpsc;
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out one scripted subscription per `subscribe` call.
    #[derive(Debug, Default)]
    struct ScriptedEvents {
        senders: Mutex<Vec<mpsc::UnboundedSender<TransportResult>>>,
        open: Arc<AtomicUsize>,
    }

    struct Tracked {
        inner: mpsc::UnboundedReceiver<TransportResult>,
        open: Arc<AtomicUsize>,
    }

    impl Stream for Tracked {
        type Item = TransportResult;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inner.poll_next_unpin(cx)
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl ScriptedEvents {
        fn emit(&self, event: TransportResult) {
            let senders = lock(&self.senders);
            senders
                .last()
                .expect("no subscription")
                .unbounded_send(event)
                .expect("subscription closed");
        }

        fn close(&self) {
            lock(&self.senders).clear();
        }

        fn subscriptions(&self) -> usize {
            lock(&self.senders).len()
        }
    }

    impl Transport for ScriptedEvents {
        fn invoke(
            &self,
            _channel: &str,
            _method: &str,
            _arguments: Option<Value>,
        ) -> BoxFuture<'static, TransportResult> {
            Box::pin(async { Ok(Value::Null) })
        }

        fn subscribe(&self, _channel: &str, _arguments: Option<Value>) -> EventStream {
            let (sender, receiver) = mpsc::unbounded();
            lock(&self.senders).push(sender);
            self.open.fetch_add(1, Ordering::SeqCst);
            Box::pin(Tracked {
                inner: receiver,
                open: Arc::clone(&self.open),
            })
        }
    }

    fn decode_int(value: Value) -> GeolocatorResult<i64> {
        value
            .as_i64()
            .ok_or_else(|| GeolocatorError::InvalidPayload(value.to_string()))
    }

    fn fixture() -> (Arc<ScriptedEvents>, Arc<dyn Transport>, Multiplexer<i64>) {
        let events = Arc::new(ScriptedEvents::default());
        let transport: Arc<dyn Transport> = events.clone();
        (events, transport, Multiplexer::new("test/events", decode_int))
    }

    #[test]
    fn subscription_opens_on_first_listener_only() {
        let (events, transport, mux) = fixture();
        let stream = mux.stream(&transport, None, None);
        assert!(!stream.is_active());
        assert_eq!(events.subscriptions(), 0);

        let first = stream.listen();
        let second = mux.stream(&transport, None, None).listen();
        assert!(stream.is_active());
        assert_eq!(stream.listener_count(), 2);
        assert_eq!(events.subscriptions(), 1);
        assert_eq!(events.open.load(Ordering::SeqCst), 1);

        drop(first);
        assert!(stream.is_active());
        drop(second);
        assert!(stream.is_finished());
        assert_eq!(events.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn events_reach_every_listener_in_order() {
        let (events, transport, mux) = fixture();
        let stream = mux.stream(&transport, None, None);
        let mut listeners = [stream.listen(), stream.listen()];

        for n in 1..=3 {
            events.emit(Ok(json!(n)));
        }

        for n in 1..=3 {
            for listener in &mut listeners {
                assert_eq!(listener.next().await, Some(Ok(n)));
            }
        }
    }

    #[tokio::test]
    async fn failure_is_terminal_for_all_listeners() {
        let (events, transport, mux) = fixture();
        let stream = mux.stream(&transport, None, None);
        let mut a = stream.listen();
        let mut b = stream.listen();

        events.emit(Err(PlatformException::new("LOCATION_UPDATE_FAILURE", "lost fix")));

        for listener in [&mut a, &mut b] {
            assert_eq!(
                listener.next().await,
                Some(Err(GeolocatorError::PositionUpdate(Some("lost fix".into()))))
            );
            assert_eq!(listener.next().await, None);
        }
        assert_eq!(events.open.load(Ordering::SeqCst), 0);
        assert!(!mux.stream(&transport, None, None).ptr_eq(&stream));
    }

    #[tokio::test]
    async fn undecodable_event_ends_the_stream() {
        let (events, transport, mux) = fixture();
        let mut listener = mux.stream(&transport, None, None).listen();

        events.emit(Ok(json!("not a number")));

        assert!(matches!(
            listener.next().await,
            Some(Err(GeolocatorError::InvalidPayload(_)))
        ));
        assert_eq!(listener.next().await, None);
    }

    #[tokio::test]
    async fn source_completion_ends_listeners_without_error() {
        let (events, transport, mux) = fixture();
        let mut listener = mux.stream(&transport, None, None).listen();

        events.emit(Ok(json!(9)));
        events.close();

        assert_eq!(listener.next().await, Some(Ok(9)));
        assert_eq!(listener.next().await, None);
    }

    #[tokio::test]
    async fn silent_source_times_out() {
        let (events, transport, mux) = fixture();
        let limit = Duration::from_millis(20);
        let stream = mux.stream(&transport, None, Some(limit));
        let mut listener = stream.listen();

        assert_eq!(
            listener.next().await,
            Some(Err(GeolocatorError::Timeout(limit)))
        );
        assert_eq!(listener.next().await, None);
        assert!(stream.is_finished());
        assert_eq!(events.open.load(Ordering::SeqCst), 0);
    }

    /// Never pending: every poll yields another event.
    #[derive(Debug)]
    struct EndlessEvents;

    impl Transport for EndlessEvents {
        fn invoke(
            &self,
            _channel: &str,
            _method: &str,
            _arguments: Option<Value>,
        ) -> BoxFuture<'static, TransportResult> {
            Box::pin(futures::future::ready(Ok(Value::Null)))
        }

        fn subscribe(&self, _channel: &str, _arguments: Option<Value>) -> EventStream {
            let event: TransportResult = Ok(json!(1));
            Box::pin(futures::stream::repeat(event))
        }
    }

    #[test]
    fn always_ready_source_yields_one_event_per_poll() {
        let transport: Arc<dyn Transport> = Arc::new(EndlessEvents);
        let mux = Multiplexer::new("test/endless", decode_int);
        let stream = mux.stream(&transport, None, None);
        let mut a = stream.listen();
        let mut b = stream.listen();

        for _ in 0..3 {
            assert_eq!(futures::executor::block_on(a.next()), Some(Ok(1)));
            assert_eq!(a.receiver.len(), 0);
            assert_eq!(b.receiver.len(), 1);
            assert_eq!(futures::executor::block_on(b.next()), Some(Ok(1)));
        }
    }

    #[tokio::test]
    async fn idle_listener_holds_at_most_one_event() {
        let (events, transport, mux) = fixture();
        let stream = mux.stream(&transport, None, None);
        let mut driver = stream.listen();
        let mut idle = stream.listen();

        for n in 1..=100 {
            events.emit(Ok(json!(n)));
        }

        assert_eq!(driver.next().await, Some(Ok(1)));
        assert!(driver.next().now_or_never().is_none());
        assert_eq!(idle.receiver.len(), 1);

        assert_eq!(idle.next().await, Some(Ok(1)));
        assert_eq!(driver.next().await, Some(Ok(2)));
        assert_eq!(idle.receiver.len(), 1);

        drop(idle);
        for n in 3..=100 {
            assert_eq!(driver.next().await, Some(Ok(n)));
        }
    }

    #[test]
    fn late_listener_on_finished_stream_ends_immediately() {
        let (_events, transport, mux) = fixture();
        let stream = mux.stream(&transport, None, None);
        drop(stream.listen());
        assert!(stream.is_finished());

        let mut late = stream.listen();
        assert_eq!(futures::executor::block_on(late.next()), None);
    }
}
