//! # txwire
//!
//! Point-to-point wire protocol engine over a one-way `transact` primitive.
//!
//! A connection is two endpoints that can each hand the other a transaction
//! code plus a parcel of bytes. txwire layers streams on top of that:
//! logical transactions carry a prefix (route + initial metadata), message
//! payload, and suffix (trailing metadata + status), multiplexed by
//! transaction code, sequence-checked per stream, and paced by a
//! byte-acknowledgement flow-control window.
//!
//! ## Architecture
//!
//! - **Channel**: lifecycle and handshake; the public entry point
//! - **Writer**: serialized transmission, chunking, flow control
//! - **Reader**: inbound dispatch, sequence validation, chunk delivery
//! - **Receiver**: pairs decoded stream events with one-shot consumers
//!
//! ## Example
//!
//! ```ignore
//! use txwire::{Channel, Role, Transaction};
//!
//! #[tokio::main]
//! async fn main() {
//!     let channel = Channel::new(Role::Client, arena);
//!     let endpoint = MemoryEndpoint::bind(channel.receive_callback());
//!     channel
//!         .establish(Some(bootstrap), handle, Duration::from_secs(5))
//!         .await
//!         .unwrap();
//!
//!     let mut tx = Transaction::new(1001, Role::Client);
//!     tx.set_prefix("Echo", vec![]);
//!     tx.set_message("hi".into());
//!     tx.set_suffix(vec![]);
//!     channel.send(tx).unwrap();
//! }
//! ```

pub mod error;
pub mod handle;
pub mod protocol;
pub mod receiver;
pub mod transport;

mod channel;
mod reader;
mod writer;

pub use channel::Channel;
pub use error::{Result, TxWireError};
pub use handle::{EndpointHandle, HandleArena};
pub use transport::{MemoryEndpoint, ReceiveCallback, TransactEndpoint};
pub use protocol::wire_format::{FIRST_CALL_ID, STATUS_INTERNAL, STATUS_OK};
pub use protocol::{Metadata, Role, Transaction};
pub use receiver::{Consumer, InitialMetadata, StreamReceiver, TrailingMetadata};
