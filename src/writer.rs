//! Send half of a channel.
//!
//! [`WireWriter`] turns logical transactions into physical ones: it assigns
//! per-stream sequence numbers at the moment of transmission, splits
//! oversized messages into block-sized chunks, and holds chunks back when
//! the flow-control window is exhausted.
//!
//! Physical transmission is serialized by a run queue: whichever thread
//! finds the queue idle becomes the drainer and executes tasks until the
//! queue empties. A transact call may deliver inbound traffic on the calling
//! thread before it returns; work produced by such reentrant delivery (acks,
//! newly admitted chunks) lands on the run queue and is picked up once the
//! in-progress transact completes, so the send path never re-enters itself.
//!
//! Chunks are scheduled one at a time: the continuation of an unfinished
//! logical transaction returns to the front of the pending queue before
//! anything else can be popped, so a later transaction on the same stream
//! can never slip between its predecessor's chunks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, TxWireError};
use crate::protocol::codec;
use crate::protocol::parcel::{Parcel, ParcelWriter};
use crate::protocol::transaction::Transaction;
use crate::protocol::wire_format::{
    self, ControlCode, BLOCK_SIZE, FLOW_CONTROL_WINDOW_SIZE,
};
use crate::transport::TransactEndpoint;

/// A logical transaction together with how far into its message the writer
/// has transmitted.
struct ChunkTask {
    tx: Transaction,
    offset: usize,
}

enum WriteTask {
    Chunk(ChunkTask),
    Ack(i64),
    Ping(i32),
    PingResponse(i32),
}

/// State guarded by the send lock: per-stream sequence counters. Sequence
/// numbers must be assigned in physical transmission order, so assignment
/// happens under the same lock that serializes `transact`.
struct SendState {
    seq: HashMap<u32, i32>,
}

impl SendState {
    fn next_seq(&mut self, code: u32) -> Result<i32> {
        let counter = self.seq.entry(code).or_insert(0);
        if *counter == i32::MAX {
            return Err(TxWireError::Protocol(format!(
                "sequence number exhausted on stream {code}"
            )));
        }
        let seq = *counter;
        *counter += 1;
        Ok(seq)
    }
}

/// Flow-control bookkeeping and the queue of not-yet-admitted chunks.
struct AckState {
    acknowledged_bytes: i64,
    /// True while a popped chunk has not finished transmitting.
    chunk_inflight: bool,
    pending: VecDeque<ChunkTask>,
    cancelled: HashSet<u32>,
    broken: bool,
}

struct RunQueue {
    queue: VecDeque<WriteTask>,
    active: bool,
}

pub struct WireWriter {
    peer: Arc<dyn TransactEndpoint>,
    send: Mutex<SendState>,
    ack: Mutex<AckState>,
    run_queue: Mutex<RunQueue>,
    /// Stream bytes handed to `transact` so far. Atomic so the admission
    /// estimate can read it without taking the send lock.
    outgoing_bytes: AtomicI64,
    /// True while a `transact` call is in progress on some thread.
    is_transacting: AtomicBool,
}

impl WireWriter {
    pub fn new(peer: Arc<dyn TransactEndpoint>) -> Arc<Self> {
        Arc::new(WireWriter {
            peer,
            send: Mutex::new(SendState {
                seq: HashMap::new(),
            }),
            ack: Mutex::new(AckState {
                acknowledged_bytes: 0,
                chunk_inflight: false,
                pending: VecDeque::new(),
                cancelled: HashSet::new(),
                broken: false,
            }),
            run_queue: Mutex::new(RunQueue {
                queue: VecDeque::new(),
                active: false,
            }),
            outgoing_bytes: AtomicI64::new(0),
            is_transacting: AtomicBool::new(false),
        })
    }

    /// Queues a logical transaction for transmission. Returns once the
    /// transaction is accepted; actual transmission may happen later, after
    /// enough acknowledged window opens up.
    pub fn send(&self, tx: Transaction) -> Result<()> {
        let code = tx.code();
        if !wire_format::is_stream_code(code) {
            return Err(TxWireError::Protocol(format!(
                "transaction code {code} is reserved for control use"
            )));
        }
        {
            let mut ack = self.ack.lock();
            if ack.broken {
                return Err(TxWireError::ChannelClosed);
            }
            if ack.cancelled.contains(&code) {
                return Err(TxWireError::StreamCancelled(code));
            }
            ack.pending.push_back(ChunkTask { tx, offset: 0 });
        }
        self.try_schedule();
        Ok(())
    }

    /// Reports bytes the peer has received so far; may admit held-back
    /// chunks.
    pub fn on_ack_received(&self, num_bytes: i64) {
        {
            let mut ack = self.ack.lock();
            let outgoing = self.outgoing_bytes.load(Ordering::Relaxed);
            if num_bytes > outgoing {
                tracing::error!(
                    acked = num_bytes,
                    outgoing,
                    "peer acknowledged more bytes than were sent"
                );
            }
            if num_bytes > ack.acknowledged_bytes {
                ack.acknowledged_bytes = num_bytes;
            }
        }
        self.try_schedule();
    }

    /// Sends a cumulative received-byte report toward the peer.
    pub fn send_ack(&self, num_bytes: i64) -> Result<()> {
        if self.is_transacting.load(Ordering::Acquire) {
            self.schedule(WriteTask::Ack(num_bytes));
            return Ok(());
        }
        let result = self.transmit_ack(num_bytes);
        self.kick();
        result
    }

    pub fn send_ping(&self, id: i32) -> Result<()> {
        if self.is_transacting.load(Ordering::Acquire) {
            self.schedule(WriteTask::Ping(id));
            return Ok(());
        }
        let result = self.transmit_ping(ControlCode::Ping, id);
        self.kick();
        result
    }

    pub fn send_ping_response(&self, id: i32) -> Result<()> {
        if self.is_transacting.load(Ordering::Acquire) {
            self.schedule(WriteTask::PingResponse(id));
            return Ok(());
        }
        let result = self.transmit_ping(ControlCode::PingResponse, id);
        self.kick();
        result
    }

    /// Drops queued chunks for a stream and rejects further sends on it.
    /// Chunks already admitted past flow control still go out.
    pub fn cancel_stream(&self, code: u32) {
        let mut ack = self.ack.lock();
        ack.cancelled.insert(code);
        ack.pending.retain(|chunk| chunk.tx.code() != code);
    }

    /// Marks the channel unusable without notifying the peer. Used when the
    /// peer already knows (it sent SHUTDOWN) or cannot be reached.
    pub fn mark_broken(&self) {
        let mut ack = self.ack.lock();
        ack.broken = true;
        ack.pending.clear();
    }

    pub fn is_broken(&self) -> bool {
        self.ack.lock().broken
    }

    /// Marks the channel unusable and sends a best-effort SHUTDOWN notice.
    pub fn shutdown(&self) {
        {
            let mut ack = self.ack.lock();
            if ack.broken {
                return;
            }
            ack.broken = true;
            ack.pending.clear();
        }
        if let Err(e) = self.make_transaction(ControlCode::Shutdown.code(), |_, _| Ok(())) {
            tracing::debug!(error = %e, "shutdown notice not delivered");
        }
    }

    /// Whether another chunk may be admitted under the flow-control window.
    /// The block-size headroom accounts for the chunk about to be admitted.
    fn admission_allows(&self, ack: &AckState) -> bool {
        let estimate = self.outgoing_bytes.load(Ordering::Relaxed) - ack.acknowledged_bytes;
        estimate + (BLOCK_SIZE as i64) < FLOW_CONTROL_WINDOW_SIZE
    }

    /// Moves the front pending chunk onto the run queue if the window
    /// allows. At most one chunk is popped at a time: an unfinished logical
    /// transaction's continuation must regain the queue front before
    /// anything behind it can be scheduled.
    fn try_schedule(&self) {
        let task = {
            let mut ack = self.ack.lock();
            if ack.chunk_inflight || !self.admission_allows(&ack) {
                return;
            }
            match ack.pending.pop_front() {
                Some(task) => {
                    ack.chunk_inflight = true;
                    task
                }
                None => return,
            }
        };
        self.schedule(WriteTask::Chunk(task));
    }

    /// Appends a task to the run queue and drains it unless another thread
    /// already is, or a transact is in progress on this very thread (the
    /// in-progress call drains afterwards via `kick` or its own run loop).
    fn schedule(&self, task: WriteTask) {
        {
            let mut rq = self.run_queue.lock();
            rq.queue.push_back(task);
            if rq.active || self.is_transacting.load(Ordering::Acquire) {
                return;
            }
            rq.active = true;
        }
        self.drain();
    }

    /// Drains tasks parked on the run queue during a direct control
    /// transact.
    fn kick(&self) {
        {
            let mut rq = self.run_queue.lock();
            if rq.active || rq.queue.is_empty() {
                return;
            }
            rq.active = true;
        }
        self.drain();
    }

    fn drain(&self) {
        loop {
            let task = {
                let mut rq = self.run_queue.lock();
                match rq.queue.pop_front() {
                    Some(task) => task,
                    None => {
                        rq.active = false;
                        return;
                    }
                }
            };
            self.run_task(task);
        }
    }

    fn run_task(&self, task: WriteTask) {
        match task {
            WriteTask::Chunk(chunk) => self.run_chunk(chunk),
            WriteTask::Ack(num_bytes) => {
                if let Err(e) = self.transmit_ack(num_bytes) {
                    tracing::error!(error = %e, "ack transmission failed, marking channel broken");
                    self.mark_broken();
                }
            }
            WriteTask::Ping(id) => {
                if let Err(e) = self.transmit_ping(ControlCode::Ping, id) {
                    tracing::error!(error = %e, "ping transmission failed, marking channel broken");
                    self.mark_broken();
                }
            }
            WriteTask::PingResponse(id) => {
                if let Err(e) = self.transmit_ping(ControlCode::PingResponse, id) {
                    tracing::error!(error = %e, "ping response transmission failed, marking channel broken");
                    self.mark_broken();
                }
            }
        }
    }

    fn run_chunk(&self, chunk: ChunkTask) {
        let code = chunk.tx.code();
        let result = self.transmit_chunk(chunk);
        {
            let mut ack = self.ack.lock();
            match result {
                // Unfinished continuation goes back to the front so later
                // logical transactions on the same stream stay behind it.
                Ok(Some(rest)) => ack.pending.push_front(rest),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        code,
                        "transact failed, marking channel broken"
                    );
                    ack.broken = true;
                    ack.pending.clear();
                }
            }
            ack.chunk_inflight = false;
        }
        self.try_schedule();
    }

    /// Transmits one physical transaction for `chunk`. Returns the
    /// continuation task if the logical transaction is not finished.
    fn transmit_chunk(&self, chunk: ChunkTask) -> Result<Option<ChunkTask>> {
        let code = chunk.tx.code();
        if chunk.offset == 0 && codec::fits_in_one_transaction(&chunk.tx) {
            self.make_transaction(code, |send, parcel| {
                let seq = send.next_seq(code)?;
                codec::encode_transaction(&chunk.tx, seq, parcel)
            })?;
            return Ok(None);
        }

        let mut outcome = None;
        self.make_transaction(code, |send, parcel| {
            let seq = send.next_seq(code)?;
            outcome = Some(codec::encode_chunk(&chunk.tx, seq, chunk.offset, parcel)?);
            Ok(())
        })?;
        match outcome {
            Some(o) if !o.is_last => Ok(Some(ChunkTask {
                tx: chunk.tx,
                offset: o.next_offset,
            })),
            _ => Ok(None),
        }
    }

    fn transmit_ack(&self, num_bytes: i64) -> Result<()> {
        self.make_transaction(ControlCode::AcknowledgeBytes.code(), |_, parcel| {
            parcel.write_i64(num_bytes)
        })
    }

    fn transmit_ping(&self, kind: ControlCode, id: i32) -> Result<()> {
        self.make_transaction(kind.code(), |_, parcel| parcel.write_i32(id))
    }

    /// Builds a parcel under the send lock and hands it to the peer. Stream
    /// bytes are counted against the flow-control window before `transact`
    /// so a reentrant ack can never reference uncounted bytes.
    fn make_transaction(
        &self,
        code: u32,
        fill: impl FnOnce(&mut SendState, &mut Parcel) -> Result<()>,
    ) -> Result<()> {
        let mut send = self.send.lock();
        let mut parcel = Parcel::new();
        fill(&mut send, &mut parcel)?;
        if wire_format::is_stream_code(code) {
            self.outgoing_bytes
                .fetch_add(parcel.data_size() as i64, Ordering::Relaxed);
        }
        self.is_transacting.store(true, Ordering::Release);
        let result = self.peer.transact(code, parcel.freeze());
        self.is_transacting.store(false, Ordering::Release);
        result
    }
}
