//! Receive-side demultiplexer.
//!
//! Decoded stream events (initial metadata, messages, trailing metadata)
//! meet their consumers here. Events and consumers arrive in either order:
//! each stream keeps, per event kind, either a queue of events waiting for a
//! consumer or a single consumer waiting for an event. Consumers are
//! one-shot; a stream expecting more traffic registers again after each
//! delivery. Callbacks run on whatever thread produced the pairing, outside
//! the receiver's locks.
//!
//! Queued events are paired with consumers strictly FIFO per (stream, kind),
//! with no record of which logical send produced them. If the transport ever
//! delivered a stream's transactions out of submission order, a queued event
//! could reach the wrong waiting consumer; the reader's sequence-number
//! check is what rules that situation out.

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Result, TxWireError};
use crate::protocol::transaction::Metadata;

/// The opening event of an inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialMetadata {
    /// Route name; present only on the server side of a connection.
    pub route: Option<String>,
    pub metadata: Metadata,
}

/// The closing event of an inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailingMetadata {
    pub metadata: Metadata,
    pub status: i32,
    pub status_description: Option<String>,
}

/// One-shot stream event consumer; may be invoked from any thread.
pub type Consumer<E> = Box<dyn FnOnce(Result<E>) + Send>;

enum Slot<E> {
    AwaitingConsumer(VecDeque<Result<E>>),
    AwaitingEvent(Consumer<E>),
}

fn notify<E>(
    map: &mut HashMap<u32, Slot<E>>,
    id: u32,
    event: Result<E>,
) -> Option<(Consumer<E>, Result<E>)> {
    match map.remove(&id) {
        Some(Slot::AwaitingEvent(consumer)) => Some((consumer, event)),
        Some(Slot::AwaitingConsumer(mut queue)) => {
            queue.push_back(event);
            map.insert(id, Slot::AwaitingConsumer(queue));
            None
        }
        None => {
            map.insert(id, Slot::AwaitingConsumer(VecDeque::from([event])));
            None
        }
    }
}

fn register<E>(
    map: &mut HashMap<u32, Slot<E>>,
    id: u32,
    consumer: Consumer<E>,
) -> Option<(Consumer<E>, Result<E>)> {
    match map.remove(&id) {
        Some(Slot::AwaitingEvent(_)) => {
            panic!("consumer already registered for stream {id}")
        }
        Some(Slot::AwaitingConsumer(mut queue)) => match queue.pop_front() {
            Some(event) => {
                if !queue.is_empty() {
                    map.insert(id, Slot::AwaitingConsumer(queue));
                }
                Some((consumer, event))
            }
            None => {
                map.insert(id, Slot::AwaitingEvent(consumer));
                None
            }
        },
        None => {
            map.insert(id, Slot::AwaitingEvent(consumer));
            None
        }
    }
}

fn dispatch<E>(pairing: Option<(Consumer<E>, Result<E>)>) {
    if let Some((consumer, event)) = pairing {
        consumer(event);
    }
}

pub struct StreamReceiver {
    initial: Mutex<HashMap<u32, Slot<InitialMetadata>>>,
    message: Mutex<HashMap<u32, Slot<Bytes>>>,
    trailing: Mutex<HashMap<u32, Slot<TrailingMetadata>>>,
    cancelled: Mutex<HashSet<u32>>,
}

impl StreamReceiver {
    pub fn new() -> Self {
        StreamReceiver {
            initial: Mutex::new(HashMap::new()),
            message: Mutex::new(HashMap::new()),
            trailing: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(HashSet::new()),
        }
    }

    fn is_cancelled(&self, id: u32) -> bool {
        self.cancelled.lock().contains(&id)
    }

    /// Registers a one-shot consumer for the stream's initial metadata.
    /// Panics if one is already waiting on this stream.
    pub fn register_initial(&self, id: u32, consumer: Consumer<InitialMetadata>) {
        if self.is_cancelled(id) {
            consumer(Err(TxWireError::StreamCancelled(id)));
            return;
        }
        let pairing = {
            let mut slots = self.initial.lock();
            register(&mut slots, id, consumer)
        };
        dispatch(pairing);
    }

    /// Registers a one-shot consumer for the stream's next message chunk.
    pub fn register_message(&self, id: u32, consumer: Consumer<Bytes>) {
        if self.is_cancelled(id) {
            consumer(Err(TxWireError::StreamCancelled(id)));
            return;
        }
        let pairing = {
            let mut slots = self.message.lock();
            register(&mut slots, id, consumer)
        };
        dispatch(pairing);
    }

    /// Registers a one-shot consumer for the stream's trailing metadata.
    pub fn register_trailing(&self, id: u32, consumer: Consumer<TrailingMetadata>) {
        if self.is_cancelled(id) {
            consumer(Err(TxWireError::StreamCancelled(id)));
            return;
        }
        let pairing = {
            let mut slots = self.trailing.lock();
            register(&mut slots, id, consumer)
        };
        dispatch(pairing);
    }

    pub fn notify_initial(&self, id: u32, event: Result<InitialMetadata>) {
        if self.is_cancelled(id) {
            return;
        }
        let pairing = {
            let mut slots = self.initial.lock();
            notify(&mut slots, id, event)
        };
        dispatch(pairing);
    }

    pub fn notify_message(&self, id: u32, event: Result<Bytes>) {
        if self.is_cancelled(id) {
            return;
        }
        let pairing = {
            let mut slots = self.message.lock();
            notify(&mut slots, id, event)
        };
        dispatch(pairing);
    }

    pub fn notify_trailing(&self, id: u32, event: Result<TrailingMetadata>) {
        if self.is_cancelled(id) {
            return;
        }
        let pairing = {
            let mut slots = self.trailing.lock();
            notify(&mut slots, id, event)
        };
        dispatch(pairing);
    }

    /// Cancels a stream: waiting consumers fail immediately, undelivered
    /// events are dropped, and later registrations fail on arrival.
    pub fn cancel_stream(&self, id: u32) {
        self.cancelled.lock().insert(id);
        let initial = self.initial.lock().remove(&id);
        let message = self.message.lock().remove(&id);
        let trailing = self.trailing.lock().remove(&id);
        if let Some(slot) = initial {
            fail_slot(slot)(TxWireError::StreamCancelled(id));
        }
        if let Some(slot) = message {
            fail_slot(slot)(TxWireError::StreamCancelled(id));
        }
        if let Some(slot) = trailing {
            fail_slot(slot)(TxWireError::StreamCancelled(id));
        }
    }

    /// Fails every waiting consumer on every stream. Used at teardown.
    pub fn clear(&self) {
        let initial: Vec<_> = self.initial.lock().drain().collect();
        let message: Vec<_> = self.message.lock().drain().collect();
        let trailing: Vec<_> = self.trailing.lock().drain().collect();
        self.cancelled.lock().clear();
        for (_, slot) in initial {
            fail_slot(slot)(TxWireError::ChannelClosed);
        }
        for (_, slot) in message {
            fail_slot(slot)(TxWireError::ChannelClosed);
        }
        for (_, slot) in trailing {
            fail_slot(slot)(TxWireError::ChannelClosed);
        }
    }
}

/// Turns a removed slot into a closure that fails its consumer, if it had
/// one. Queued events are dropped on the floor.
fn fail_slot<E>(slot: Slot<E>) -> impl FnOnce(TxWireError) {
    move |error| {
        if let Slot::AwaitingEvent(consumer) = slot {
            consumer(Err(error));
        }
    }
}

impl Default for StreamReceiver {
    fn default() -> Self {
        Self::new()
    }
}
