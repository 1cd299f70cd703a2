//! Transport abstraction.
//!
//! A channel talks to its peer through a [`TransactEndpoint`]: a one-way,
//! non-blocking primitive that carries a transaction code plus a serialized
//! parcel. Incoming transactions arrive through a [`ReceiveCallback`], which
//! the transport may invoke from any thread, including from inside the
//! caller's own `transact`.

pub mod memory;

use bytes::Bytes;

use crate::error::Result;

/// One-way submission of a physical transaction toward the peer.
///
/// `transact` must not block on the peer processing the parcel; an `Ok`
/// return means the transaction was accepted for delivery, nothing more.
pub trait TransactEndpoint: Send + Sync {
    fn transact(&self, code: u32, parcel: Bytes) -> Result<()>;
}

/// Callback invoked for every transaction received from the peer.
pub type ReceiveCallback = std::sync::Arc<dyn Fn(u32, Bytes) + Send + Sync>;

pub use memory::MemoryEndpoint;
