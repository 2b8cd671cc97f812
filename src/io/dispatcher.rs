//! Fans decoded messages out to listeners and to blocked reply-waiters.
//!
//! Delivery order for each message: the generic message listeners first, then
//! the typed listeners and channel subscriptions matching its variant, then
//! the bounded reply queue. Callers waiting on [`Dispatcher::wait_for`] are
//! woken on every insert, so a waiter posted before its reply arrives is
//! guaranteed to observe it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::errors::Error;
use crate::io::message::{AnalogState, DigitalPortState, I2cReply, Message, MessageBody};

/// Upper bound on undelivered messages retained for reply-waiters.
pub const QUEUE_CAPACITY: usize = 100;

/// Handle returned by the `on_*` registrations, used to unregister.
pub type ListenerId = usize;

type MessageCallback = Box<dyn FnMut(&Message) + Send>;
type TypedCallback<T> = Box<dyn FnMut(&T) + Send>;

#[derive(Default)]
struct Listeners {
    message: Vec<(ListenerId, MessageCallback)>,
    analog: Vec<(ListenerId, TypedCallback<AnalogState>)>,
    digital: Vec<(ListenerId, TypedCallback<DigitalPortState>)>,
    i2c: Vec<(ListenerId, TypedCallback<I2cReply>)>,
    analog_senders: Vec<mpsc::Sender<AnalogState>>,
    digital_senders: Vec<mpsc::Sender<DigitalPortState>>,
    i2c_senders: Vec<mpsc::Sender<I2cReply>>,
}

struct Inner {
    queue: Mutex<VecDeque<Message>>,
    message_ready: Condvar,
    /// Horizon after which a queued message counts as stale for eviction.
    staleness: Mutex<Option<Duration>>,
    listeners: Mutex<Listeners>,
    next_id: AtomicUsize,
}

/// Shared fan-out point between the receive thread and the caller threads.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
                message_ready: Condvar::new(),
                staleness: Mutex::new(None),
                listeners: Mutex::new(Listeners::default()),
                next_id: AtomicUsize::new(0),
            }),
        }
    }

    /// Sets the staleness horizon used by the eviction policy (the session
    /// timeout; `None` means nothing ever counts as stale).
    pub fn set_staleness(&self, horizon: Option<Duration>) {
        *self.inner.staleness.lock() = horizon;
    }

    /// Delivers one decoded message: listeners first, then the reply queue.
    pub fn dispatch(&self, message: Message) {
        {
            let mut listeners = self.inner.listeners.lock();
            for (_, callback) in listeners.message.iter_mut() {
                callback(&message);
            }
            match &message.body {
                MessageBody::AnalogState(state) => {
                    for (_, callback) in listeners.analog.iter_mut() {
                        callback(state);
                    }
                    listeners
                        .analog_senders
                        .retain(|sender| sender.send(*state).is_ok());
                }
                MessageBody::DigitalPortState(state) => {
                    for (_, callback) in listeners.digital.iter_mut() {
                        callback(state);
                    }
                    listeners
                        .digital_senders
                        .retain(|sender| sender.send(*state).is_ok());
                }
                MessageBody::I2cReply(reply) => {
                    for (_, callback) in listeners.i2c.iter_mut() {
                        callback(reply);
                    }
                    listeners
                        .i2c_senders
                        .retain(|sender| sender.send(reply.clone()).is_ok());
                }
                _ => {}
            }
        }

        let horizon = *self.inner.staleness.lock();
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= QUEUE_CAPACITY {
                Self::evict(&mut queue, horizon);
            }
            queue.push_back(message);
        }
        self.inner.message_ready.notify_all();
    }

    /// Drops one message to make room: the oldest stale one if any, the
    /// oldest one otherwise.
    fn evict(queue: &mut VecDeque<Message>, horizon: Option<Duration>) {
        if let Some(horizon) = horizon {
            if let Some(position) = queue
                .iter()
                .position(|message| message.received_at.elapsed() > horizon)
            {
                queue.remove(position);
                return;
            }
        }
        queue.pop_front();
    }

    /// Blocks until a queued message satisfies `pick`, removing and returning
    /// the mapped value, or until the timeout elapses.
    ///
    /// # Errors
    /// * `Timeout` - no matching message arrived before the deadline.
    pub fn wait_for<T>(
        &self,
        mut pick: impl FnMut(&Message) -> Option<T>,
        timeout: Option<Duration>,
    ) -> Result<T, Error> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut queue = self.inner.queue.lock();
        loop {
            if let Some(value) = Self::take_match(&mut queue, &mut pick) {
                return Ok(value);
            }
            match deadline {
                None => self.inner.message_ready.wait(&mut queue),
                Some(deadline) => {
                    if self
                        .inner
                        .message_ready
                        .wait_until(&mut queue, deadline)
                        .timed_out()
                    {
                        // Last scan: a matching message may have raced in
                        // right at the deadline.
                        return match Self::take_match(&mut queue, &mut pick) {
                            Some(value) => Ok(value),
                            None => Err(Error::Timeout),
                        };
                    }
                }
            }
        }
    }

    fn take_match<T>(
        queue: &mut VecDeque<Message>,
        pick: &mut impl FnMut(&Message) -> Option<T>,
    ) -> Option<T> {
        let mut found = None;
        for (position, message) in queue.iter().enumerate() {
            if let Some(value) = pick(message) {
                found = Some((position, value));
                break;
            }
        }
        let (position, value) = found?;
        queue.remove(position);
        Some(value)
    }

    /// Number of undelivered messages currently queued.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Drops all queued messages and wakes any waiters (they will time out
    /// unless a new match arrives).
    pub fn clear(&self) {
        self.inner.queue.lock().clear();
        self.inner.message_ready.notify_all();
    }

    // ########################################
    // Listener registration

    fn next_id(&self) -> ListenerId {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a listener invoked for every decoded message.
    pub fn on_message(&self, callback: impl FnMut(&Message) + Send + 'static) -> ListenerId {
        let id = self.next_id();
        self.inner
            .listeners
            .lock()
            .message
            .push((id, Box::new(callback)));
        id
    }

    /// Registers a listener for analog state messages.
    pub fn on_analog(&self, callback: impl FnMut(&AnalogState) + Send + 'static) -> ListenerId {
        let id = self.next_id();
        self.inner
            .listeners
            .lock()
            .analog
            .push((id, Box::new(callback)));
        id
    }

    /// Registers a listener for digital port messages.
    pub fn on_digital(
        &self,
        callback: impl FnMut(&DigitalPortState) + Send + 'static,
    ) -> ListenerId {
        let id = self.next_id();
        self.inner
            .listeners
            .lock()
            .digital
            .push((id, Box::new(callback)));
        id
    }

    /// Registers a listener for i2c replies.
    pub fn on_i2c(&self, callback: impl FnMut(&I2cReply) + Send + 'static) -> ListenerId {
        let id = self.next_id();
        self.inner
            .listeners
            .lock()
            .i2c
            .push((id, Box::new(callback)));
        id
    }

    /// Unregisters a listener previously returned by one of the `on_*`
    /// registrations. Unknown ids are ignored.
    pub fn unregister(&self, id: ListenerId) {
        let mut listeners = self.inner.listeners.lock();
        listeners.message.retain(|(listener, _)| *listener != id);
        listeners.analog.retain(|(listener, _)| *listener != id);
        listeners.digital.retain(|(listener, _)| *listener != id);
        listeners.i2c.retain(|(listener, _)| *listener != id);
    }

    // ########################################
    // Channel subscriptions

    /// Opens a subscription receiving every analog state message until it is
    /// dropped.
    pub fn analog_events(&self) -> Subscription<AnalogState> {
        let (sender, receiver) = mpsc::channel();
        self.inner.listeners.lock().analog_senders.push(sender);
        Subscription { receiver }
    }

    /// Opens a subscription receiving every digital port message until it is
    /// dropped.
    pub fn digital_events(&self) -> Subscription<DigitalPortState> {
        let (sender, receiver) = mpsc::channel();
        self.inner.listeners.lock().digital_senders.push(sender);
        Subscription { receiver }
    }

    /// Opens a subscription receiving every i2c reply until it is dropped.
    pub fn i2c_events(&self) -> Subscription<I2cReply> {
        let (sender, receiver) = mpsc::channel();
        self.inner.listeners.lock().i2c_senders.push(sender);
        Subscription { receiver }
    }
}

/// A long-lived subscription over one message variant.
///
/// Dropping the subscription cancels it; the dispatcher prunes the channel on
/// its next delivery.
pub struct Subscription<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Blocks until the next event. Returns `None` once the dispatcher side
    /// has gone away.
    pub fn recv(&self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// Blocks for at most `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Returns the next event if one is already buffered.
    pub fn try_recv(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Iterator for Subscription<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.recv()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use super::*;
    use crate::io::message::{AnalogState, MessageBody, ProtocolVersion};

    fn analog(channel: u8, level: u16) -> Message {
        Message::new(MessageBody::AnalogState(AnalogState { channel, level }))
    }

    fn version(major: u8) -> Message {
        Message::new(MessageBody::ProtocolVersion(ProtocolVersion {
            major,
            minor: 0,
        }))
    }

    #[test]
    fn test_wait_returns_queued_match() {
        let dispatcher = Dispatcher::new();
        dispatcher.dispatch(analog(1, 10));
        dispatcher.dispatch(version(2));

        let result = dispatcher.wait_for(
            |message| match &message.body {
                MessageBody::ProtocolVersion(v) => Some(*v),
                _ => None,
            },
            Some(Duration::from_millis(50)),
        );
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(result.unwrap().major, 2);
        // The non-matching message stays queued.
        assert_eq!(dispatcher.pending(), 1);
    }

    #[test]
    fn test_wait_observes_later_arrival() {
        let dispatcher = Dispatcher::new();
        let publisher = dispatcher.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            publisher.dispatch(version(3));
        });

        let result = dispatcher.wait_for(
            |message| match &message.body {
                MessageBody::ProtocolVersion(v) => Some(*v),
                _ => None,
            },
            Some(Duration::from_millis(500)),
        );
        handle.join().unwrap();
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(result.unwrap().major, 3);
    }

    #[test]
    fn test_wait_times_out() {
        let dispatcher = Dispatcher::new();
        let start = Instant::now();
        let result =
            dispatcher.wait_for(|_| None::<()>, Some(Duration::from_millis(50)));
        let elapsed = start.elapsed();
        assert!(matches!(result, Err(Error::Timeout)), "{:?}", result);
        assert!(elapsed >= Duration::from_millis(50), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(200), "{:?}", elapsed);
    }

    #[test]
    fn test_queue_capacity_bounded() {
        let dispatcher = Dispatcher::new();
        for i in 0..250 {
            dispatcher.dispatch(analog((i % 16) as u8, i as u16));
        }
        assert_eq!(dispatcher.pending(), QUEUE_CAPACITY);
    }

    #[test]
    fn test_eviction_drops_oldest_and_keeps_newest() {
        let dispatcher = Dispatcher::new();
        for i in 0..=QUEUE_CAPACITY as u16 {
            dispatcher.dispatch(analog(0, i));
        }
        // Level 0 was evicted, the newest message survived.
        let oldest = dispatcher.wait_for(
            |message| match &message.body {
                MessageBody::AnalogState(state) => Some(state.level),
                _ => None,
            },
            Some(Duration::from_millis(10)),
        );
        assert_eq!(oldest.unwrap(), 1);

        let newest = dispatcher.wait_for(
            |message| match &message.body {
                MessageBody::AnalogState(state) if state.level == QUEUE_CAPACITY as u16 => {
                    Some(state.level)
                }
                _ => None,
            },
            Some(Duration::from_millis(10)),
        );
        assert!(newest.is_ok(), "{:?}", newest);
    }

    #[test]
    fn test_stale_eviction_prefers_stale_messages() {
        let dispatcher = Dispatcher::new();
        dispatcher.set_staleness(Some(Duration::from_millis(20)));
        dispatcher.dispatch(analog(0, 0));
        thread::sleep(Duration::from_millis(40));
        // Fill up with fresh messages, then overflow: the stale one goes
        // first even though fresher messages sit in front of nothing else.
        for i in 1..QUEUE_CAPACITY as u16 {
            dispatcher.dispatch(analog(0, i));
        }
        dispatcher.dispatch(analog(0, 999));
        assert_eq!(dispatcher.pending(), QUEUE_CAPACITY);
        let stale = dispatcher.wait_for(
            |message| match &message.body {
                MessageBody::AnalogState(state) if state.level == 0 => Some(()),
                _ => None,
            },
            Some(Duration::from_millis(10)),
        );
        assert!(matches!(stale, Err(Error::Timeout)), "{:?}", stale);
    }

    #[test]
    fn test_listener_order_and_unregister() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let generic_seen = seen.clone();
        let generic = dispatcher.on_message(move |_| generic_seen.lock().push("message"));
        let analog_seen = seen.clone();
        dispatcher.on_analog(move |_| analog_seen.lock().push("analog"));

        dispatcher.dispatch(analog(0, 1));
        assert_eq!(*seen.lock(), vec!["message", "analog"]);

        dispatcher.unregister(generic);
        dispatcher.dispatch(analog(0, 2));
        assert_eq!(*seen.lock(), vec!["message", "analog", "analog"]);
    }

    #[test]
    fn test_typed_listeners_see_messages_in_order() {
        let dispatcher = Dispatcher::new();
        let levels = Arc::new(Mutex::new(Vec::new()));
        let sink = levels.clone();
        dispatcher.on_analog(move |state| sink.lock().push(state.level));

        for level in [5u16, 3, 8] {
            dispatcher.dispatch(analog(0, level));
        }
        assert_eq!(*levels.lock(), vec![5, 3, 8]);
    }

    #[test]
    fn test_subscription_receives_until_dropped() {
        let dispatcher = Dispatcher::new();
        let subscription = dispatcher.analog_events();

        dispatcher.dispatch(analog(2, 7));
        dispatcher.dispatch(version(2));
        dispatcher.dispatch(analog(2, 9));

        assert_eq!(
            subscription.recv_timeout(Duration::from_millis(50)),
            Some(AnalogState { channel: 2, level: 7 })
        );
        assert_eq!(
            subscription.recv_timeout(Duration::from_millis(50)),
            Some(AnalogState { channel: 2, level: 9 })
        );
        assert_eq!(subscription.try_recv(), None);

        drop(subscription);
        // The dead channel gets pruned on the next delivery.
        dispatcher.dispatch(analog(2, 11));
        assert_eq!(dispatcher.inner.listeners.lock().analog_senders.len(), 0);
    }

    #[test]
    fn test_clear_drops_queued_messages() {
        let dispatcher = Dispatcher::new();
        dispatcher.dispatch(analog(0, 1));
        dispatcher.dispatch(analog(0, 2));
        dispatcher.clear();
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_concurrent_waiters_each_get_a_message() {
        let dispatcher = Dispatcher::new();
        let matched = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                let matched = matched.clone();
                thread::spawn(move || {
                    let result = dispatcher.wait_for(
                        |message| match &message.body {
                            MessageBody::AnalogState(state) => Some(state.level),
                            _ => None,
                        },
                        Some(Duration::from_millis(500)),
                    );
                    if result.is_ok() {
                        matched.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        for i in 0..4 {
            dispatcher.dispatch(analog(0, i));
        }
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(matched.load(Ordering::SeqCst), 4);
        assert_eq!(dispatcher.pending(), 0);
    }
}
