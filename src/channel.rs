//! Channel lifecycle and public API.
//!
//! A [`Channel`] owns one end of a connection. After construction it is
//! inert: hook its [`receive_callback`](Channel::receive_callback) up to a
//! transport, then [`establish`](Channel::establish) to run the SETUP
//! handshake. Only once the handshake resolves the peer endpoint can stream
//! traffic flow.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Result, TxWireError};
use crate::handle::{EndpointHandle, HandleArena};
use crate::protocol::parcel::{Parcel, ParcelWriter};
use crate::protocol::transaction::{Role, Transaction};
use crate::protocol::wire_format::{ControlCode, WIRE_FORMAT_VERSION};
use crate::reader::{HandshakeOutcome, WireReader};
use crate::receiver::StreamReceiver;
use crate::transport::{ReceiveCallback, TransactEndpoint};
use crate::writer::WireWriter;

pub struct Channel {
    role: Role,
    receiver: Arc<StreamReceiver>,
    reader: Arc<WireReader>,
    writer: OnceLock<Arc<WireWriter>>,
    handshake: Mutex<Option<oneshot::Receiver<HandshakeOutcome>>>,
    ping_id: AtomicI32,
}

impl Channel {
    pub fn new(role: Role, arena: Arc<HandleArena>) -> Arc<Self> {
        let receiver = Arc::new(StreamReceiver::new());
        let (tx, rx) = oneshot::channel();
        let reader = WireReader::new(role, receiver.clone(), arena, tx);
        Arc::new(Channel {
            role,
            receiver,
            reader,
            writer: OnceLock::new(),
            handshake: Mutex::new(Some(rx)),
            ping_id: AtomicI32::new(1),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Where stream consumers register their one-shot callbacks.
    pub fn receiver(&self) -> &Arc<StreamReceiver> {
        &self.receiver
    }

    /// The callback to hand to the transport. Unrecoverable inbound errors
    /// tear the whole channel down.
    pub fn receive_callback(self: &Arc<Self>) -> ReceiveCallback {
        let channel = self.clone();
        Arc::new(move |code, parcel| {
            if let Err(e) = channel.reader.on_transaction(code, parcel) {
                tracing::error!(error = %e, code, "unrecoverable inbound transaction, tearing channel down");
                channel.teardown();
            }
        })
    }

    /// Runs the SETUP handshake and installs the send path.
    ///
    /// A side holding a bootstrap endpoint sends its SETUP first; the other
    /// side answers with its own once the peer's arrives. `local_handle` is
    /// this side's endpoint handle, minted by the arena the peer resolves
    /// against. Returns the peer's wire-format version.
    pub async fn establish(
        &self,
        bootstrap: Option<Arc<dyn TransactEndpoint>>,
        local_handle: EndpointHandle,
        timeout: Duration,
    ) -> Result<i32> {
        let pending = self
            .handshake
            .lock()
            .take()
            .ok_or(TxWireError::NotEstablished)?;
        if let Some(boot) = &bootstrap {
            send_setup(boot.as_ref(), local_handle)?;
        }

        let (version, peer) = match tokio::time::timeout(timeout, pending).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(TxWireError::ChannelClosed),
            Err(_) => return Err(TxWireError::HandshakeTimeout),
        };

        let writer = WireWriter::new(peer.clone());
        self.reader.set_writer(writer.clone());
        if self.writer.set(writer).is_err() {
            return Err(TxWireError::Protocol("channel established twice".into()));
        }
        if bootstrap.is_none() {
            send_setup(peer.as_ref(), local_handle)?;
        }
        tracing::info!(version, role = ?self.role, "channel established");
        Ok(version)
    }

    fn writer(&self) -> Result<&Arc<WireWriter>> {
        self.writer.get().ok_or(TxWireError::NotEstablished)
    }

    /// Queues a logical transaction on its stream.
    pub fn send(&self, tx: Transaction) -> Result<()> {
        if tx.role() != self.role {
            return Err(TxWireError::Protocol(format!(
                "transaction built for {:?} sent on a {:?} channel",
                tx.role(),
                self.role
            )));
        }
        self.writer()?.send(tx)
    }

    /// Sends a liveness probe; the peer answers with a PING_RESPONSE
    /// carrying the returned id.
    pub fn ping(&self) -> Result<i32> {
        let id = self.ping_id.fetch_add(1, Ordering::Relaxed);
        self.writer()?.send_ping(id)?;
        Ok(id)
    }

    /// Drops a stream on both halves: queued outbound chunks are discarded
    /// and waiting consumers fail with a cancellation error.
    pub fn cancel_stream(&self, code: u32) {
        if let Some(writer) = self.writer.get() {
            writer.cancel_stream(code);
        }
        self.receiver.cancel_stream(code);
    }

    /// Stops the channel: sends a best-effort SHUTDOWN notice, fails every
    /// waiting consumer, and aborts a handshake still in flight.
    pub fn teardown(&self) {
        if let Some(writer) = self.writer.get() {
            writer.shutdown();
        }
        self.reader.abort_handshake();
        self.receiver.clear();
    }
}

fn send_setup(endpoint: &dyn TransactEndpoint, handle: EndpointHandle) -> Result<()> {
    let mut parcel = Parcel::new();
    parcel.write_i32(WIRE_FORMAT_VERSION)?;
    parcel.write_handle(handle)?;
    endpoint.transact(ControlCode::Setup.code(), parcel.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::protocol::wire_format::FIRST_CALL_ID;

    struct NullEndpoint;

    impl TransactEndpoint for NullEndpoint {
        fn transact(&self, _code: u32, _parcel: Bytes) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_send_before_establish_fails() {
        let channel = Channel::new(Role::Client, HandleArena::new());
        let tx = Transaction::new(FIRST_CALL_ID, Role::Client);
        assert!(matches!(
            channel.send(tx),
            Err(TxWireError::NotEstablished)
        ));
        assert!(matches!(channel.ping(), Err(TxWireError::NotEstablished)));
    }

    #[test]
    fn test_role_mismatch_rejected() {
        let channel = Channel::new(Role::Client, HandleArena::new());
        let tx = Transaction::new(FIRST_CALL_ID, Role::Server);
        assert!(matches!(channel.send(tx), Err(TxWireError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_establish_times_out_without_peer() {
        let arena = HandleArena::new();
        let channel = Channel::new(Role::Server, arena.clone());
        let handle = arena.register(Arc::new(NullEndpoint));
        let result = channel
            .establish(None, handle, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(TxWireError::HandshakeTimeout)));
    }

    #[tokio::test]
    async fn test_establish_twice_fails() {
        let arena = HandleArena::new();
        let channel = Channel::new(Role::Server, arena.clone());
        let handle = arena.register(Arc::new(NullEndpoint));
        let _ = channel
            .establish(None, handle, Duration::from_millis(10))
            .await;
        assert!(matches!(
            channel.establish(None, handle, Duration::from_millis(10)).await,
            Err(TxWireError::NotEstablished)
        ));
    }

    #[tokio::test]
    async fn test_teardown_aborts_pending_establish() {
        let arena = HandleArena::new();
        let channel = Channel::new(Role::Server, arena.clone());
        let handle = arena.register(Arc::new(NullEndpoint));

        let teardown_side = channel.clone();
        let establish = tokio::spawn(async move {
            teardown_side
                .establish(None, handle, Duration::from_secs(30))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.teardown();
        let result = establish.await.unwrap();
        assert!(matches!(result, Err(TxWireError::ChannelClosed)));
    }
}
