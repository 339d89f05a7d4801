//! Resilient MQTT client
//!
//! A [`MessageChannel`] owns one broker session. The rumqttc event loop runs in
//! a background task which
//! - marks the channel connected on every ConnAck and hands all registered
//!   subscriptions to the request task, which awaits each one in order,
//! - routes inbound publishes by exact topic to a dispatcher task that runs
//!   the message handlers in arrival order,
//! - on a connection error waits the reconnect delay before the next attempt.
//!
//! Publishing never queues: while disconnected a publish is dropped with a
//! warning.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
    SubscribeReasonCode,
};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{LastWillMessage, MessagePublisher, QualityOfService};
use crate::error::{LogoSrvError, Result};

/// Delay before reconnecting after an unexpected disconnect
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);
const CHANNEL_CAPACITY: usize = 64;

/// Handler for messages of one topic
pub type MessageHandler = Arc<dyn Fn(Bytes) -> BoxFuture<'static, ()> + Send + Sync>;

/// Connection options of a channel
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub clean_session: bool,
    pub credentials: Option<(String, String)>,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
    /// How long `connect` waits for the first ConnAck
    pub connect_timeout: Duration,
    /// How long a publish or shutdown request may wait for room in the client queue
    pub request_timeout: Duration,
}

impl ChannelOptions {
    pub fn new(client_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            client_id: client_id.into(),
            host: host.into(),
            port,
            clean_session: true,
            credentials: None,
            keep_alive: Duration::from_secs(30),
            reconnect_delay: RECONNECT_DELAY,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Credentials apply only when both parts are present
    pub fn with_credentials(mut self, username: Option<&str>, password: Option<&str>) -> Self {
        self.credentials = match (username, password) {
            (Some(user), Some(pass)) => Some((user.to_string(), pass.to_string())),
            _ => None,
        };
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }
}

/// Lifecycle of a channel's broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Connected,
    /// Last connection error
    Disconnected(String),
    Disposed,
}

/// Handle for messages of one topic
pub struct Subscription {
    topic: String,
    qos: QualityOfService,
    handlers: Mutex<Vec<MessageHandler>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("handlers", &self.handlers.lock().len())
            .finish()
    }
}

impl Subscription {
    pub fn new(topic: impl Into<String>, qos: QualityOfService) -> Self {
        Self {
            topic: topic.into(),
            qos,
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn qos(&self) -> QualityOfService {
        self.qos
    }

    /// Attach a handler run for every message on this topic
    pub fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: MessageHandler = Arc::new(move |payload| handler(payload).boxed());
        self.handlers.lock().push(handler);
    }

    /// Run all handlers for `payload`, in attach order
    pub async fn deliver(&self, payload: Bytes) {
        let handlers = self.handlers.lock().clone();
        for handler in handlers {
            handler(payload.clone()).await;
        }
    }
}

#[derive(Debug, Default)]
struct SubscribeTracker {
    /// Requests handed to the client, not yet given a packet id
    queued: VecDeque<(String, QualityOfService)>,
    in_flight: HashMap<u16, (String, QualityOfService)>,
}

struct Shared {
    options: ChannelOptions,
    subscriptions: DashMap<String, Arc<Subscription>>,
    tracker: Mutex<SubscribeTracker>,
    state: watch::Sender<ChannelState>,
    client: Mutex<Option<AsyncClient>>,
    requests: Mutex<Option<mpsc::UnboundedSender<(String, QualityOfService)>>>,
    cancel: CancellationToken,
    requests_cancel: CancellationToken,
}

impl Shared {
    fn client(&self) -> Option<AsyncClient> {
        self.client.lock().clone()
    }

    fn set_state(&self, state: ChannelState) {
        self.state.send_replace(state);
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow() == ChannelState::Connected
    }

    /// Queue a SUBSCRIBE for the request task
    fn request_subscribe(&self, topic: &str, qos: QualityOfService) {
        if let Some(requests) = self.requests.lock().as_ref() {
            if requests.send((topic.to_string(), qos)).is_err() {
                debug!(client_id = %self.options.client_id, topic, "Request task stopped");
            }
        }
    }

    fn resubscribe_all(&self) {
        let topics: Vec<_> = self
            .subscriptions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().qos()))
            .collect();
        for (topic, qos) in topics {
            self.request_subscribe(&topic, qos);
        }
    }

    fn check_suback(&self, ack: &rumqttc::SubAck) {
        let Some((topic, requested)) = self.tracker.lock().in_flight.remove(&ack.pkid) else {
            return;
        };
        for code in &ack.return_codes {
            match code {
                SubscribeReasonCode::Success(granted) => {
                    let granted = QualityOfService::from(*granted);
                    if granted < requested {
                        error!(
                            client_id = %self.options.client_id,
                            topic = %topic,
                            "Broker granted {} instead of {}", granted, requested
                        );
                    } else {
                        debug!(client_id = %self.options.client_id, topic = %topic, "Subscribed with {}", granted);
                    }
                },
                SubscribeReasonCode::Failure => {
                    error!(client_id = %self.options.client_id, topic = %topic, "Broker rejected subscription");
                },
            }
        }
    }
}

/// One MQTT client connection with automatic reconnect
pub struct MessageChannel {
    shared: Arc<Shared>,
    last_will: Mutex<Option<LastWillMessage>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageChannel")
            .field("client_id", &self.shared.options.client_id)
            .field("state", &*self.shared.state.borrow())
            .finish()
    }
}

impl MessageChannel {
    pub fn new(options: ChannelOptions) -> Self {
        let (state, _) = watch::channel(ChannelState::Idle);
        let cancel = CancellationToken::new();
        Self {
            shared: Arc::new(Shared {
                options,
                subscriptions: DashMap::new(),
                tracker: Mutex::new(SubscribeTracker::default()),
                state,
                client: Mutex::new(None),
                requests: Mutex::new(None),
                requests_cancel: cancel.child_token(),
                cancel,
            }),
            last_will: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.shared.options
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state.borrow().clone()
    }

    pub fn last_will(&self) -> Option<LastWillMessage> {
        self.last_will.lock().clone()
    }

    fn mqtt_options(&self) -> MqttOptions {
        let options = &self.shared.options;
        let mut mqtt = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt.set_keep_alive(options.keep_alive);
        mqtt.set_clean_session(options.clean_session);
        if let Some((user, pass)) = &options.credentials {
            mqtt.set_credentials(user, pass);
        }
        if let Some(will) = self.last_will.lock().as_ref() {
            mqtt.set_last_will(LastWill::new(
                &will.topic,
                will.payload.clone(),
                will.qos.into(),
                will.retain,
            ));
        }
        mqtt
    }

    /// Open the session and wait for the broker's answer.
    ///
    /// On failure the background task keeps reconnecting.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.shared.state.subscribe();
        match &*state.borrow_and_update() {
            ChannelState::Connected => return Ok(()),
            ChannelState::Disposed => {
                return Err(LogoSrvError::state("Channel has been disposed"));
            },
            _ => {},
        }

        if self.shared.client().is_none() {
            let options = &self.shared.options;
            info!(
                client_id = %options.client_id,
                "Connecting to MQTT broker {}:{}", options.host, options.port
            );
            let (client, eventloop) = AsyncClient::new(self.mqtt_options(), CHANNEL_CAPACITY);
            *self.shared.client.lock() = Some(client.clone());
            self.shared.set_state(ChannelState::Connecting);

            let (request_tx, request_rx) = mpsc::unbounded_channel();
            *self.shared.requests.lock() = Some(request_tx);

            let (tx, rx) = mpsc::unbounded_channel();
            let mut tasks = self.tasks.lock();
            tasks.push(tokio::spawn(run_event_loop(self.shared.clone(), eventloop, tx)));
            tasks.push(tokio::spawn(dispatch_messages(rx, self.shared.cancel.clone())));
            tasks.push(tokio::spawn(run_subscribe_requests(
                self.shared.clone(),
                client,
                request_rx,
            )));
        }

        let wait = async {
            loop {
                if state.changed().await.is_err() {
                    return Err(LogoSrvError::internal("Channel state dropped"));
                }
                match &*state.borrow_and_update() {
                    ChannelState::Connected => return Ok(()),
                    ChannelState::Disconnected(reason) => {
                        return Err(LogoSrvError::connection(reason.clone()));
                    },
                    ChannelState::Disposed => {
                        return Err(LogoSrvError::state("Channel has been disposed"));
                    },
                    ChannelState::Idle | ChannelState::Connecting => {},
                }
            }
        };
        match tokio::time::timeout(self.shared.options.connect_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(LogoSrvError::connection(format!(
                "No answer from {}:{} within {:?}",
                self.shared.options.host,
                self.shared.options.port,
                self.shared.options.connect_timeout
            ))),
        }
    }

    /// Subscribe to `topic`; repeated calls return the same handle
    pub fn subscribe(&self, topic: &str, qos: QualityOfService) -> Arc<Subscription> {
        if let Some(existing) = self.shared.subscriptions.get(topic) {
            return existing.clone();
        }
        let subscription = Arc::new(Subscription::new(topic, qos));
        self.shared
            .subscriptions
            .insert(topic.to_string(), subscription.clone());

        if self.shared.is_connected() {
            self.shared.request_subscribe(topic, qos);
        }
        subscription
    }

    pub fn subscriptions(&self) -> Vec<Arc<Subscription>> {
        self.shared
            .subscriptions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Unsubscribe everything and close the session; no reconnect afterwards
    pub async fn dispose(&self) {
        if *self.shared.state.borrow() == ChannelState::Disposed {
            return;
        }
        let was_connected = self.shared.is_connected();
        self.shared.set_state(ChannelState::Disposed);
        self.shared.requests_cancel.cancel();
        self.shared.requests.lock().take();

        let client = self.shared.client.lock().take();
        if let (Some(client), true) = (client, was_connected) {
            let topics: Vec<String> = self
                .shared
                .subscriptions
                .iter()
                .map(|entry| entry.key().clone())
                .collect();
            let goodbye = async {
                for topic in topics {
                    if let Err(e) = client.unsubscribe(topic.as_str()).await {
                        debug!(topic = %topic, "Unsubscribe failed: {}", e);
                    }
                }
                if let Err(e) = client.disconnect().await {
                    debug!("Disconnect request failed: {}", e);
                }
            };
            if tokio::time::timeout(self.shared.options.request_timeout, goodbye)
                .await
                .is_err()
            {
                warn!(
                    client_id = %self.shared.options.client_id,
                    "Broker did not take the disconnect in time"
                );
            }
        }

        // A live session gets the chance to flush the disconnect first
        if !was_connected {
            self.shared.cancel.cancel();
        }
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout(Duration::from_secs(2), &mut task)
                .await
                .is_err()
            {
                self.shared.cancel.cancel();
                if tokio::time::timeout(Duration::from_millis(200), &mut task)
                    .await
                    .is_err()
                {
                    task.abort();
                }
            }
        }
        self.shared.cancel.cancel();
        self.shared.subscriptions.clear();
        info!(client_id = %self.shared.options.client_id, "MQTT channel disposed");
    }
}

#[async_trait]
impl MessagePublisher for MessageChannel {
    fn client_id(&self) -> &str {
        &self.shared.options.client_id
    }

    fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QualityOfService, retain: bool) {
        let client = match self.shared.client() {
            Some(client) if self.shared.is_connected() => client,
            _ => {
                warn!(
                    client_id = %self.shared.options.client_id,
                    topic,
                    "Not connected, message dropped"
                );
                return;
            },
        };
        let request = client.publish(topic, qos.into(), retain, payload.to_vec());
        match tokio::time::timeout(self.shared.options.request_timeout, request).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => warn!(
                client_id = %self.shared.options.client_id,
                topic,
                "Publish failed: {}", e
            ),
            Err(_) => warn!(
                client_id = %self.shared.options.client_id,
                topic,
                "Client queue full, message dropped"
            ),
        }
    }

    fn set_last_will(&self, will: LastWillMessage) {
        if self.shared.client().is_some() {
            warn!(
                client_id = %self.shared.options.client_id,
                "Last will set after connect applies to the next session only"
            );
        }
        *self.last_will.lock() = Some(will);
    }
}

async fn run_event_loop(
    shared: Arc<Shared>,
    mut eventloop: EventLoop,
    tx: mpsc::UnboundedSender<(Arc<Subscription>, Bytes)>,
) {
    let client_id = shared.options.client_id.clone();
    loop {
        let event = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    info!(client_id = %client_id, "Connected to MQTT broker");
                    shared.tracker.lock().in_flight.clear();
                    shared.set_state(ChannelState::Connected);
                    shared.resubscribe_all();
                }
            },
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match shared.subscriptions.get(publish.topic.as_str()) {
                    Some(subscription) => {
                        if tx.send((subscription.clone(), publish.payload)).is_err() {
                            break;
                        }
                    },
                    None => debug!(client_id = %client_id, topic = %publish.topic, "Message without subscription"),
                }
            },
            Ok(Event::Incoming(Packet::SubAck(ack))) => shared.check_suback(&ack),
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                let mut tracker = shared.tracker.lock();
                if let Some(request) = tracker.queued.pop_front() {
                    tracker.in_flight.insert(pkid, request);
                }
            },
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!(client_id = %client_id, "Disconnect sent");
                if *shared.state.borrow() == ChannelState::Disposed {
                    break;
                }
            },
            Ok(_) => {},
            Err(e) => {
                if *shared.state.borrow() == ChannelState::Disposed {
                    break;
                }
                let was_connected = shared.is_connected();
                // Queued requests stay in the client queue and go out after reconnect
                shared.tracker.lock().in_flight.clear();
                shared.set_state(ChannelState::Disconnected(e.to_string()));
                if was_connected {
                    warn!(client_id = %client_id, "Connection to MQTT broker lost: {}", e);
                } else {
                    warn!(client_id = %client_id, "MQTT connect failed: {}", e);
                }
                info!(
                    client_id = %client_id,
                    "Reconnecting in {:?}", shared.options.reconnect_delay
                );
                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    _ = tokio::time::sleep(shared.options.reconnect_delay) => {},
                }
                if *shared.state.borrow() == ChannelState::Disposed {
                    break;
                }
                shared.set_state(ChannelState::Connecting);
            },
        }
    }
    debug!(client_id = %client_id, "MQTT event loop stopped");
}

/// Issue SUBSCRIBE requests one at a time so packet ids pair up in order
async fn run_subscribe_requests(
    shared: Arc<Shared>,
    client: AsyncClient,
    mut rx: mpsc::UnboundedReceiver<(String, QualityOfService)>,
) {
    loop {
        let (topic, qos) = tokio::select! {
            biased;
            _ = shared.requests_cancel.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        shared.tracker.lock().queued.push_back((topic.clone(), qos));
        let sent = tokio::select! {
            _ = shared.requests_cancel.cancelled() => break,
            sent = client.subscribe(topic.as_str(), qos.into()) => sent,
        };
        if let Err(e) = sent {
            shared.tracker.lock().queued.pop_back();
            error!(client_id = %shared.options.client_id, topic = %topic, "Subscribe failed: {}", e);
        }
    }
}

async fn dispatch_messages(
    mut rx: mpsc::UnboundedReceiver<(Arc<Subscription>, Bytes)>,
    cancel: CancellationToken,
) {
    loop {
        let (subscription, payload) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        subscription.deliver(payload).await;
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_credentials_need_both_parts() {
        let options = ChannelOptions::new("c", "localhost", 1883).with_credentials(Some("u"), None);
        assert!(options.credentials.is_none());
        let options =
            ChannelOptions::new("c", "localhost", 1883).with_credentials(Some("u"), Some("p"));
        assert_eq!(options.credentials, Some(("u".into(), "p".into())));
    }

    #[tokio::test]
    async fn test_subscription_deliver_runs_handlers_in_order() {
        let subscription = Subscription::new("logo/set/byte/205", QualityOfService::AtLeastOnce);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..2 {
            let seen = seen.clone();
            subscription.on_message(move |payload: Bytes| {
                let seen = seen.clone();
                async move {
                    seen.lock().push((tag, payload));
                }
            });
        }
        subscription.deliver(Bytes::from_static(b"222")).await;
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, 0);
        assert_eq!(seen[1].1, Bytes::from_static(b"222"));
    }

    #[test]
    fn test_subscribe_returns_same_handle() {
        let channel = MessageChannel::new(ChannelOptions::new("c", "localhost", 1883));
        let a = channel.subscribe("a/b", QualityOfService::AtMostOnce);
        let b = channel.subscribe("a/b", QualityOfService::ExactlyOnce);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(channel.subscriptions().len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_publish_while_disconnected_is_dropped() {
        let channel = MessageChannel::new(ChannelOptions::new("c", "localhost", 1883));
        channel
            .publish("a/b", Bytes::from_static(b"1"), QualityOfService::AtMostOnce, false)
            .await;
        assert!(logs_contain("Not connected, message dropped"));
    }

    #[tokio::test]
    async fn test_connect_refused_then_dispose() {
        let mut options = ChannelOptions::new("c", "127.0.0.1", closed_port());
        options.reconnect_delay = Duration::from_millis(50);
        let channel = MessageChannel::new(options);
        channel.set_last_will(LastWillMessage {
            topic: "logo/status/Connection".into(),
            payload: "lost".into(),
            qos: QualityOfService::ExactlyOnce,
            retain: true,
        });

        assert!(channel.connect().await.is_err());
        assert!(matches!(channel.state(), ChannelState::Disconnected(_) | ChannelState::Connecting));

        channel.dispose().await;
        assert_eq!(channel.state(), ChannelState::Disposed);
        assert!(channel.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_handlers_survive_many_messages() {
        let subscription = Arc::new(Subscription::new("t", QualityOfService::AtMostOnce));
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            subscription.on_message(move |_| {
                let count = count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let dispatcher = tokio::spawn(dispatch_messages(rx, cancel.clone()));
        for _ in 0..10 {
            tx.send((subscription.clone(), Bytes::from_static(b"1"))).unwrap();
        }
        drop(tx);
        dispatcher.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }
}
