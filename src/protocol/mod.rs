//! Wire-level protocol definitions: constants and flag words, parcel
//! serialization, the logical transaction model, and the framing codec that
//! maps between the two.

pub mod codec;
pub mod parcel;
pub mod transaction;
pub mod wire_format;

pub use parcel::{Parcel, ParcelReader, ParcelView, ParcelWriter};
pub use transaction::{Metadata, Role, Transaction};
