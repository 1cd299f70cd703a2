//! Transaction framing: serialize a [`Transaction`] onto a parcel and decode
//! field groups back out.
//!
//! Field order on the wire (per physical transaction):
//! flags, sequence number, [route + initial metadata], [length-prefixed
//! message chunk], [status description + trailing metadata]. Which groups
//! appear is governed by the flags word; role asymmetries are handled here
//! (route only from clients, status fields only from servers).

use super::parcel::{ParcelReader, ParcelWriter};
use super::transaction::{Metadata, Transaction};
use super::wire_format::{flags, BLOCK_SIZE};
use crate::error::Result;

/// Whether a logical transaction fits a single physical transaction.
pub fn fits_in_one_transaction(tx: &Transaction) -> bool {
    !flags::has_flag(tx.flags(), flags::MESSAGE_DATA) || tx.message().len() <= BLOCK_SIZE
}

/// The flags word for a single-transaction (fast path) encoding, with the
/// status code packed into the upper bits for server suffixes.
pub fn wire_flags(tx: &Transaction) -> i32 {
    let mut f = tx.flags();
    if tx.is_server() && flags::has_flag(f, flags::SUFFIX) {
        f = flags::with_status(f, tx.status());
    }
    f
}

fn write_initial_metadata(tx: &Transaction, parcel: &mut dyn ParcelWriter) -> Result<()> {
    if tx.is_client() {
        // Only the client sends the route name.
        parcel.write_string(tx.route())?;
    }
    parcel.write_i32(tx.prefix_metadata().len() as i32)?;
    for (key, value) in tx.prefix_metadata() {
        parcel.write_byte_array(key)?;
        parcel.write_byte_array(value)?;
    }
    Ok(())
}

fn write_trailing_metadata(tx: &Transaction, parcel: &mut dyn ParcelWriter) -> Result<()> {
    if tx.is_server() {
        if flags::has_flag(tx.flags(), flags::STATUS_DESCRIPTION) {
            parcel.write_string(tx.status_description().unwrap_or_default())?;
        }
        parcel.write_i32(tx.suffix_metadata().len() as i32)?;
        for (key, value) in tx.suffix_metadata() {
            parcel.write_byte_array(key)?;
            parcel.write_byte_array(value)?;
        }
    } else if !tx.suffix_metadata().is_empty() {
        // Client suffix metadata is defined empty on the wire.
        tracing::error!(
            code = tx.code(),
            "non-empty suffix metadata from client side, dropping"
        );
    }
    Ok(())
}

/// Fast path: encode an entire logical transaction as one physical
/// transaction.
pub fn encode_transaction(
    tx: &Transaction,
    seq: i32,
    parcel: &mut dyn ParcelWriter,
) -> Result<()> {
    let f = wire_flags(tx);
    parcel.write_i32(f)?;
    parcel.write_i32(seq)?;
    if flags::has_flag(f, flags::PREFIX) {
        write_initial_metadata(tx, parcel)?;
    }
    if flags::has_flag(f, flags::MESSAGE_DATA) {
        parcel.write_byte_array(tx.message())?;
    }
    if flags::has_flag(f, flags::SUFFIX) {
        write_trailing_metadata(tx, parcel)?;
    }
    Ok(())
}

/// Result of encoding one chunk of an oversized message.
#[derive(Debug, Clone, Copy)]
pub struct ChunkOutcome {
    /// Message offset the next chunk starts at.
    pub next_offset: usize,
    /// Whether this chunk completed the logical transaction.
    pub is_last: bool,
}

/// Slow path: encode the chunk of `tx`'s message starting at `offset`.
///
/// The first chunk carries the prefix, every chunk but the last is marked
/// partial, and the last chunk carries the suffix. Callers must only use
/// this for transactions bearing message data.
pub fn encode_chunk(
    tx: &Transaction,
    seq: i32,
    offset: usize,
    parcel: &mut dyn ParcelWriter,
) -> Result<ChunkOutcome> {
    assert!(
        flags::has_flag(tx.flags(), flags::MESSAGE_DATA),
        "chunked encode of a transaction without message data"
    );
    let data = tx.message();
    assert!(offset <= data.len());

    let mut f = flags::MESSAGE_DATA;
    if offset == 0 && flags::has_flag(tx.flags(), flags::PREFIX) {
        f |= flags::PREFIX;
    }

    let is_last = offset + BLOCK_SIZE >= data.len();
    let size = if is_last {
        data.len() - offset
    } else {
        f |= flags::MESSAGE_DATA_PARTIAL;
        BLOCK_SIZE
    };
    if is_last && flags::has_flag(tx.flags(), flags::SUFFIX) {
        f |= flags::SUFFIX;
        if flags::has_flag(tx.flags(), flags::STATUS_DESCRIPTION) {
            f |= flags::STATUS_DESCRIPTION;
        }
        if tx.is_server() {
            f = flags::with_status(f, tx.status());
        }
    }

    parcel.write_i32(f)?;
    parcel.write_i32(seq)?;
    if flags::has_flag(f, flags::PREFIX) {
        write_initial_metadata(tx, parcel)?;
    }
    parcel.write_byte_array(&data[offset..offset + size])?;
    if flags::has_flag(f, flags::SUFFIX) {
        write_trailing_metadata(tx, parcel)?;
    }

    Ok(ChunkOutcome {
        next_offset: offset + size,
        is_last,
    })
}

/// Decode an int32-counted run of (key, value) byte-array pairs.
pub fn read_metadata(parcel: &mut dyn ParcelReader) -> Result<Metadata> {
    let count = parcel.read_i32()?;
    if count < 0 {
        return Err(crate::error::TxWireError::Decode(format!(
            "negative metadata count {count}"
        )));
    }
    let mut metadata = Metadata::with_capacity((count as usize).min(64));
    for _ in 0..count {
        let key = parcel.read_byte_array()?;
        let value = parcel.read_byte_array()?;
        metadata.push((key, value));
    }
    Ok(metadata)
}
