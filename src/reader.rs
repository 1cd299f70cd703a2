//! Receive half of a channel.
//!
//! [`WireReader`] is the single entry point for inbound physical
//! transactions. Control codes are handled directly (handshake, shutdown,
//! acks, pings); stream codes are sequence-checked, decoded, and handed to
//! the [`StreamReceiver`] one physical transaction at a time. Message
//! payload is delivered chunk by chunk; gluing the chunks of an oversized
//! message back together is the consumer's job, and the sequence check is
//! what guarantees the chunks arrive in order. Every received stream
//! transaction is acknowledged back to the peer so its flow-control window
//! keeps moving.
//!
//! The transport may call [`WireReader::on_transaction`] from any thread.
//! An `Err` return means the channel is beyond recovery and must be torn
//! down; recoverable problems (a stream that fails to decode) are resolved
//! internally by failing just that stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Result, TxWireError};
use crate::handle::HandleArena;
use crate::protocol::codec;
use crate::protocol::parcel::{ParcelReader, ParcelView};
use crate::protocol::transaction::{Metadata, Role};
use crate::protocol::wire_format::{
    self, flags, ControlCode, STATUS_INTERNAL, STATUS_OK, WIRE_FORMAT_VERSION,
};
use crate::receiver::{InitialMetadata, StreamReceiver, TrailingMetadata};
use crate::transport::TransactEndpoint;
use crate::writer::WireWriter;

/// What a completed handshake yields: the peer's wire-format version and
/// the endpoint to send through.
pub(crate) type HandshakeOutcome = (i32, Arc<dyn TransactEndpoint>);

pub struct WireReader {
    role: Role,
    receiver: Arc<StreamReceiver>,
    arena: Arc<HandleArena>,
    writer: OnceLock<Arc<WireWriter>>,
    expected_seq: Mutex<HashMap<u32, i32>>,
    num_incoming_bytes: AtomicI64,
    handshake: Mutex<Option<oneshot::Sender<HandshakeOutcome>>>,
}

impl WireReader {
    pub(crate) fn new(
        role: Role,
        receiver: Arc<StreamReceiver>,
        arena: Arc<HandleArena>,
        handshake: oneshot::Sender<HandshakeOutcome>,
    ) -> Arc<Self> {
        Arc::new(WireReader {
            role,
            receiver,
            arena,
            writer: OnceLock::new(),
            expected_seq: Mutex::new(HashMap::new()),
            num_incoming_bytes: AtomicI64::new(0),
            handshake: Mutex::new(Some(handshake)),
        })
    }

    /// Installs the writer once the handshake resolved the peer endpoint.
    pub(crate) fn set_writer(&self, writer: Arc<WireWriter>) {
        if self.writer.set(writer).is_err() {
            tracing::error!("writer installed twice");
        }
    }

    /// Drops the handshake slot so a pending establish fails instead of
    /// waiting out its timeout.
    pub(crate) fn abort_handshake(&self) {
        self.handshake.lock().take();
    }

    /// Handles one inbound physical transaction.
    pub fn on_transaction(&self, code: u32, parcel: Bytes) -> Result<()> {
        if let Some(control) = ControlCode::from_code(code) {
            return self.on_control(control, parcel);
        }
        if !wire_format::is_stream_code(code) {
            tracing::warn!(code, "ignoring transaction on reserved code");
            return Ok(());
        }
        self.on_stream(code, parcel)
    }

    fn on_control(&self, control: ControlCode, parcel: Bytes) -> Result<()> {
        let mut view = ParcelView::new(parcel);
        match control {
            ControlCode::Setup => {
                let version = view.read_i32()?;
                let handle = view.read_handle()?;
                if version > WIRE_FORMAT_VERSION {
                    tracing::warn!(version, "peer speaks a newer wire format");
                }
                let endpoint = self.arena.resolve(handle)?;
                let sender = self.handshake.lock().take();
                match sender {
                    Some(sender) => {
                        if sender.send((version, endpoint)).is_err() {
                            tracing::debug!("handshake no longer awaited");
                        }
                    }
                    None => {
                        tracing::error!("ignoring repeated SETUP transaction");
                        self.arena.release(handle);
                    }
                }
                Ok(())
            }
            ControlCode::Shutdown => {
                tracing::info!("peer shut the channel down");
                if let Some(writer) = self.writer.get() {
                    writer.mark_broken();
                }
                self.receiver.clear();
                Ok(())
            }
            ControlCode::AcknowledgeBytes => {
                let num_bytes = view.read_i64()?;
                match self.writer.get() {
                    Some(writer) => writer.on_ack_received(num_bytes),
                    None => tracing::warn!(num_bytes, "ack received before handshake completed"),
                }
                Ok(())
            }
            ControlCode::Ping => {
                let id = view.read_i32()?;
                if let Some(writer) = self.writer.get() {
                    if let Err(e) = writer.send_ping_response(id) {
                        tracing::debug!(error = %e, id, "ping response not delivered");
                    }
                }
                Ok(())
            }
            ControlCode::PingResponse => {
                let id = view.read_i32()?;
                tracing::debug!(id, "ping response received");
                Ok(())
            }
        }
    }

    fn on_stream(&self, code: u32, parcel: Bytes) -> Result<()> {
        let received = parcel.len() as i64;
        let mut view = ParcelView::new(parcel);
        match self.process_stream(code, &mut view) {
            Ok(()) => {}
            Err(e @ TxWireError::Protocol(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, code, "failed to decode stream transaction");
                self.fail_stream(code, e.to_string());
            }
        }
        // Received bytes count toward the peer's window whether or not they
        // decoded.
        let total = self.num_incoming_bytes.fetch_add(received, Ordering::SeqCst) + received;
        match self.writer.get() {
            Some(writer) => {
                if let Err(e) = writer.send_ack(total) {
                    tracing::debug!(error = %e, "ack not delivered");
                }
            }
            None => tracing::warn!(code, "stream traffic before handshake completed"),
        }
        Ok(())
    }

    fn process_stream(&self, code: u32, view: &mut ParcelView) -> Result<()> {
        let f = view.read_i32()?;
        let seq = view.read_i32()?;
        {
            let mut expected = self.expected_seq.lock();
            let counter = expected.entry(code).or_insert(0);
            if *counter != seq {
                return Err(TxWireError::Protocol(format!(
                    "stream {code} expected sequence number {} but got {seq}",
                    *counter
                )));
            }
            if *counter == i32::MAX {
                return Err(TxWireError::Protocol(format!(
                    "sequence number exhausted on stream {code}"
                )));
            }
            *counter += 1;
        }

        if flags::has_flag(f, flags::PREFIX) {
            // Only clients put the route on the wire, so only servers read
            // one.
            let route = match self.role {
                Role::Server => Some(view.read_string()?),
                Role::Client => None,
            };
            let metadata = codec::read_metadata(view)?;
            self.receiver
                .notify_initial(code, Ok(InitialMetadata { route, metadata }));
        }

        if flags::has_flag(f, flags::MESSAGE_DATA) {
            // One message event per physical transaction. A chunk marked
            // partial is followed by more on later sequence numbers; the
            // consumer appends until a non-partial chunk arrives.
            let chunk = view.read_byte_array()?;
            self.receiver.notify_message(code, Ok(chunk));
        }

        if flags::has_flag(f, flags::SUFFIX) {
            // The status section is only present when the peer is a server.
            let trailing = match self.role {
                Role::Client => {
                    let status_description = if flags::has_flag(f, flags::STATUS_DESCRIPTION) {
                        Some(view.read_string()?)
                    } else {
                        None
                    };
                    let metadata = codec::read_metadata(view)?;
                    TrailingMetadata {
                        metadata,
                        status: flags::status_of(f),
                        status_description,
                    }
                }
                Role::Server => TrailingMetadata {
                    metadata: Metadata::new(),
                    status: STATUS_OK,
                    status_description: None,
                },
            };
            self.receiver.notify_trailing(code, Ok(trailing));
        }

        Ok(())
    }

    /// Ends a stream locally after an unrecoverable per-stream problem,
    /// reporting an internal status to whoever is listening.
    fn fail_stream(&self, code: u32, reason: String) {
        self.receiver.notify_trailing(
            code,
            Ok(TrailingMetadata {
                metadata: Metadata::new(),
                status: STATUS_INTERNAL,
                status_description: Some(reason),
            }),
        );
    }
}
