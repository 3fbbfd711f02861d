//! In-process message bus: named participants, priority-ordered delivery, correlated
//! request/response, topic subscriptions, broadcast, and a bounded history.
//!
//! Each registered participant owns one bounded mailbox split into three priority tiers; a
//! participant drains its own mailbox in priority order. `request` parks the caller on a
//! `tokio::sync::oneshot` keyed by a correlation id and races it against a deadline with
//! `tokio::time::timeout`, mirroring the correlation_id/causation_id shape used for message
//! envelopes elsewhere in the wider agent-coordination ecosystem this module draws on.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout;

use crate::pantheon::error::PantheonError;

/// Delivery priority; high drains before normal, normal before low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Combined capacity of a participant's mailbox (all three priority tiers together) before the
/// oldest lowest-priority message is dropped to make room.
pub const QUEUE_CAPACITY: usize = 256;

/// Bounded ring of recently observed messages, for diagnostics and the `history` query.
const HISTORY_CAP: usize = 500;

/// One message travelling across the bus.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
    /// Set when this message is a reply; correlates it back to the original request.
    pub correlation_id: Option<String>,
    pub sent_at: chrono::DateTime<chrono::Utc>,
}

impl Message {
    fn new(from: &str, to: &str, topic: &str, payload: serde_json::Value, priority: Priority) -> Self {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            topic: topic.to_string(),
            payload,
            priority,
            correlation_id: None,
            sent_at: chrono::Utc::now(),
        }
    }
}

/// The three priority queues backing one participant's mailbox.
#[derive(Default)]
struct MailboxQueues {
    high: VecDeque<Message>,
    normal: VecDeque<Message>,
    low: VecDeque<Message>,
}

impl MailboxQueues {
    fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    fn pop_front(&mut self) -> Option<Message> {
        self.high.pop_front().or_else(|| self.normal.pop_front()).or_else(|| self.low.pop_front())
    }

    /// Drop the oldest message from the lowest non-empty priority tier, to make room for a new
    /// arrival once the mailbox is at capacity.
    fn evict_oldest_lowest_priority(&mut self) -> Option<Message> {
        self.low.pop_front().or_else(|| self.normal.pop_front()).or_else(|| self.high.pop_front())
    }

    fn push(&mut self, message: Message) {
        match message.priority {
            Priority::High => self.high.push_back(message),
            Priority::Normal => self.normal.push_back(message),
            Priority::Low => self.low.push_back(message),
        }
    }
}

/// Shared handle to one participant's mailbox: the queues themselves, a [`Notify`] to wake a
/// sleeping [`Inbox::recv`], and a flag set on [`Bus::unregister`].
#[derive(Clone)]
struct MailboxHandle {
    queues: Arc<Mutex<MailboxQueues>>,
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

/// Receiver side returned to a participant when it registers.
pub struct Inbox {
    queues: Arc<Mutex<MailboxQueues>>,
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl Inbox {
    /// Receive the next message, preferring high priority, then normal, then low. Returns `None`
    /// once the mailbox is drained and the participant has been unregistered.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            // Register as a waiter before checking the queue, so a notification delivered
            // between the check and the await below is never missed.
            let notified = self.notify.notified();

            if let Some(message) = self.queues.lock().expect("mailbox lock poisoned").pop_front() {
                return Some(message);
            }

            if self.closed.load(Ordering::Acquire) {
                // One last drain in case a message landed between the empty check and the
                // closed check.
                return self.queues.lock().expect("mailbox lock poisoned").pop_front();
            }

            notified.await;
        }
    }
}

/// One subscriber registered via [`Bus::subscribe`]: an optional topic filter plus the channel
/// messages are fanned out to.
struct Subscriber {
    filter: Option<String>,
    tx: mpsc::Sender<Message>,
}

/// A lazy sequence of messages matching a [`Bus::subscribe`] filter, independent of being a named
/// recipient.
pub struct Subscription {
    rx: mpsc::Receiver<Message>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

struct PendingRequest {
    reply_tx: oneshot::Sender<Message>,
}

/// The bus itself: a directory of registered participants, topic subscribers, a map of in-flight
/// requests awaiting a correlated reply, and a bounded history.
pub struct Bus {
    mailboxes: Mutex<HashMap<String, MailboxHandle>>,
    subscribers: Mutex<Vec<Subscriber>>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    history: Mutex<VecDeque<Message>>,
    overflow_count: AtomicU64,
}

impl Bus {
    pub fn new() -> Self {
        Bus {
            mailboxes: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAP)),
            overflow_count: AtomicU64::new(0),
        }
    }

    /// Register `name` as a participant, returning its [`Inbox`]. Re-registering the same name
    /// replaces its mailbox, dropping its unread messages.
    pub fn register(&self, name: &str) -> Inbox {
        let handle = MailboxHandle {
            queues: Arc::new(Mutex::new(MailboxQueues::default())),
            notify: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
        };

        let mut mailboxes = self.mailboxes.lock().expect("bus lock poisoned");
        mailboxes.insert(name.to_string(), handle.clone());

        Inbox { queues: handle.queues, notify: handle.notify, closed: handle.closed }
    }

    /// Remove `name` from the directory, closing its mailbox so its [`Inbox::recv`] drains and
    /// then returns `None`.
    pub fn unregister(&self, name: &str) {
        if let Some(handle) = self.mailboxes.lock().expect("bus lock poisoned").remove(name) {
            handle.closed.store(true, Ordering::Release);
            handle.notify.notify_waiters();
        }
    }

    /// Subscribe to messages whose topic matches `kind_filter` (or every message, if `None`),
    /// independent of being a registered recipient.
    pub fn subscribe(&self, kind_filter: Option<&str>) -> Subscription {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let mut subscribers = self.subscribers.lock().expect("bus lock poisoned");
        subscribers.push(Subscriber { filter: kind_filter.map(|s| s.to_string()), tx });
        Subscription { rx }
    }

    fn fan_out_to_subscribers(&self, message: &Message) {
        let mut subscribers = self.subscribers.lock().expect("bus lock poisoned");
        subscribers.retain(|sub| {
            if sub.tx.is_closed() {
                return false;
            }
            let matches = sub.filter.as_deref().map_or(true, |filter| filter == message.topic);
            if matches {
                let _ = sub.tx.try_send(message.clone());
            }
            true
        });
    }

    fn record_history(&self, message: &Message) {
        let mut history = self.history.lock().expect("bus lock poisoned");
        if history.len() >= HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(message.clone());
    }

    /// Total number of messages dropped across every mailbox so far because the recipient's
    /// queue was at capacity. Surfaced as a counter, never as an error to a sender.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    fn enqueue(&self, to: &str, message: Message) -> Result<(), PantheonError> {
        let handle = {
            let mailboxes = self.mailboxes.lock().expect("bus lock poisoned");
            mailboxes.get(to).cloned().ok_or_else(|| PantheonError::UnknownRecipient(to.to_string()))?
        };

        {
            let mut queues = handle.queues.lock().expect("mailbox lock poisoned");
            if queues.len() >= QUEUE_CAPACITY {
                if queues.evict_oldest_lowest_priority().is_some() {
                    self.overflow_count.fetch_add(1, Ordering::Relaxed);
                    log::warn!("bus: mailbox for '{to}' at capacity, dropped oldest lowest-priority message");
                }
            }
            queues.push(message.clone());
        }
        handle.notify.notify_waiters();

        self.record_history(&message);
        self.fan_out_to_subscribers(&message);
        Ok(())
    }

    /// Fire-and-forget delivery to `to`. Fails with `UnknownRecipient` if `to` is not registered.
    /// A full mailbox never fails the send — it drops its oldest lowest-priority message instead
    /// and bumps [`Bus::overflow_count`].
    pub fn send(
        &self,
        from: &str,
        to: &str,
        topic: &str,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Result<(), PantheonError> {
        let message = Message::new(from, to, topic, payload, priority);
        self.enqueue(to, message)
    }

    /// Deliver `payload` to every currently registered participant except `from`. Per-recipient
    /// overflow is handled the same way as `send` (drop-oldest, never an error) rather than
    /// aborting the whole broadcast.
    pub fn broadcast(&self, from: &str, topic: &str, payload: serde_json::Value, priority: Priority) {
        let recipients: Vec<String> = {
            let mailboxes = self.mailboxes.lock().expect("bus lock poisoned");
            mailboxes.keys().filter(|name| name.as_str() != from).cloned().collect()
        };

        for to in recipients {
            let message = Message::new(from, &to, topic, payload.clone(), priority);
            if let Err(err) = self.enqueue(&to, message) {
                log::warn!("bus: broadcast to {to} dropped: {err}");
            }
        }
    }

    /// Send `payload` to `to` and wait up to `deadline` for a correlated reply sent via
    /// [`Bus::reply`]. Cancelling the returned future (e.g. the caller's own future is dropped)
    /// removes the waiter so a late reply is never delivered into the void.
    pub async fn request(
        &self,
        from: &str,
        to: &str,
        topic: &str,
        payload: serde_json::Value,
        deadline: Duration,
    ) -> Result<Message, PantheonError> {
        let mut message = Message::new(from, to, topic, payload, Priority::Normal);
        let correlation_id = message.id.clone();
        message.correlation_id = Some(correlation_id.clone());

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("bus lock poisoned");
            pending.insert(correlation_id.clone(), PendingRequest { reply_tx });
        }

        let guard = PendingGuard { bus: self, correlation_id: correlation_id.clone() };

        self.enqueue(to, message)?;

        let result = timeout(deadline, reply_rx).await;
        // Disarm the guard on every path; it only removes a *still-present* entry, so a reply
        // that already fired (and removed the entry itself) is a no-op here.
        drop(guard);

        match result {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(PantheonError::Cancelled),
            Err(_) => Err(PantheonError::RequestTimeout),
        }
    }

    /// Reply to an in-flight request identified by `correlation_id`. Returns `false` if no
    /// request with that id is waiting (already timed out, cancelled, or already replied to).
    pub fn reply(&self, correlation_id: &str, from: &str, topic: &str, payload: serde_json::Value) -> bool {
        let pending = {
            let mut pending = self.pending.lock().expect("bus lock poisoned");
            pending.remove(correlation_id)
        };

        match pending {
            Some(entry) => {
                let mut message = Message::new(from, "", topic, payload, Priority::Normal);
                message.correlation_id = Some(correlation_id.to_string());
                self.record_history(&message);
                self.fan_out_to_subscribers(&message);
                entry.reply_tx.send(message).is_ok()
            }
            None => false,
        }
    }

    /// The most recent `limit` messages observed by the bus (sent, broadcast, or replied),
    /// most recent first.
    pub fn history(&self, limit: usize) -> Vec<Message> {
        let history = self.history.lock().expect("bus lock poisoned");
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Whether `name` is currently registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.mailboxes.lock().expect("bus lock poisoned").contains_key(name)
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard removing a pending request's waiter when the owning [`Bus::request`] future is
/// dropped (cancelled) before a reply arrives, so a late reply never gets delivered into the void.
struct PendingGuard<'a> {
    bus: &'a Bus,
    correlation_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.bus.pending.lock().expect("bus lock poisoned").remove(&self.correlation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_recv_delivers_payload() {
        let bus = Bus::new();
        let mut inbox = bus.register("agent-a");
        bus.send("agent-b", "agent-a", "ping", serde_json::json!({"n": 1}), Priority::Normal).unwrap();

        let message = inbox.recv().await.unwrap();
        assert_eq!(message.topic, "ping");
        assert_eq!(message.payload["n"], 1);
    }

    #[tokio::test]
    async fn high_priority_drains_before_normal() {
        let bus = Bus::new();
        let mut inbox = bus.register("agent-a");
        bus.send("agent-b", "agent-a", "low-prio", serde_json::json!(1), Priority::Normal).unwrap();
        bus.send("agent-b", "agent-a", "high-prio", serde_json::json!(2), Priority::High).unwrap();

        let first = inbox.recv().await.unwrap();
        assert_eq!(first.topic, "high-prio");
        let second = inbox.recv().await.unwrap();
        assert_eq!(second.topic, "low-prio");
    }

    #[tokio::test]
    async fn send_to_unknown_recipient_errors() {
        let bus = Bus::new();
        let result = bus.send("agent-a", "ghost", "ping", serde_json::json!(null), Priority::Normal);
        assert!(matches!(result, Err(PantheonError::UnknownRecipient(_))));
    }

    #[tokio::test]
    async fn request_reply_round_trip() {
        let bus = Bus::new();
        let mut inbox = bus.register("responder");

        let bus_ref = &bus;
        let (request_result, _) = tokio::join!(
            bus_ref.request("caller", "responder", "ask", serde_json::json!({"q": 1}), Duration::from_secs(1)),
            async {
                let incoming = inbox.recv().await.unwrap();
                bus_ref.reply(incoming.correlation_id.as_ref().unwrap(), "responder", "answer", serde_json::json!({"a": 2}));
            }
        );

        let reply = request_result.unwrap();
        assert_eq!(reply.payload["a"], 2);
    }

    #[tokio::test]
    async fn request_without_reply_times_out() {
        let bus = Bus::new();
        let _inbox = bus.register("responder");
        let result = bus.request("caller", "responder", "ask", serde_json::json!(null), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(PantheonError::RequestTimeout)));
    }

    #[tokio::test]
    async fn dropped_request_future_removes_pending_waiter() {
        let bus = Bus::new();
        let _inbox = bus.register("responder");

        {
            let fut = bus.request("caller", "responder", "ask", serde_json::json!(null), Duration::from_secs(5));
            tokio::pin!(fut);
            // poll once then drop, simulating cancellation (e.g. the caller's own timeout firing
            // a layer up) before the reply arrives.
            let _ = futures_util::poll!(&mut fut);
        }

        assert!(bus.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_all_but_sender() {
        let bus = Bus::new();
        let mut inbox_b = bus.register("b");
        let mut inbox_c = bus.register("c");
        let _inbox_a = bus.register("a");

        bus.broadcast("a", "announce", serde_json::json!("hi"), Priority::Normal);

        assert_eq!(inbox_b.recv().await.unwrap().topic, "announce");
        assert_eq!(inbox_c.recv().await.unwrap().topic, "announce");
    }

    #[tokio::test]
    async fn unregistering_closes_the_inbox() {
        let bus = Bus::new();
        let mut inbox = bus.register("agent-a");
        bus.unregister("agent-a");
        assert!(inbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn overflowing_a_mailbox_drops_oldest_low_priority_message_instead_of_erroring() {
        let bus = Bus::new();
        let _inbox = bus.register("agent-a");

        for i in 0..QUEUE_CAPACITY {
            bus.send("agent-b", "agent-a", "low", serde_json::json!(i), Priority::Low).unwrap();
        }
        // One more low-priority message should evict the oldest rather than erroring.
        let result = bus.send("agent-b", "agent-a", "low", serde_json::json!(QUEUE_CAPACITY), Priority::Low);
        assert!(result.is_ok());
        assert_eq!(bus.overflow_count(), 1);
    }

    #[tokio::test]
    async fn history_returns_most_recent_first_capped_at_limit() {
        let bus = Bus::new();
        let _inbox = bus.register("agent-a");
        for i in 0..5 {
            bus.send("agent-b", "agent-a", "evt", serde_json::json!(i), Priority::Normal).unwrap();
        }

        let recent = bus.history(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].payload, serde_json::json!(4));
        assert_eq!(recent[1].payload, serde_json::json!(3));
        assert_eq!(recent[2].payload, serde_json::json!(2));
    }

    #[tokio::test]
    async fn subscribe_filters_by_topic_independent_of_named_recipients() {
        let bus = Bus::new();
        let _inbox = bus.register("agent-a");
        let mut subscription = bus.subscribe(Some("observation"));

        bus.send("agent-b", "agent-a", "plan", serde_json::json!(1), Priority::Normal).unwrap();
        bus.send("agent-b", "agent-a", "observation", serde_json::json!(2), Priority::Normal).unwrap();

        let received = subscription.recv().await.unwrap();
        assert_eq!(received.topic, "observation");
        assert_eq!(received.payload, serde_json::json!(2));
    }
}
