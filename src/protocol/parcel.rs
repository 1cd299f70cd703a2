//! Positional byte encoder/decoder bound to one physical transaction.
//!
//! A [`Parcel`] accumulates the fields of one outbound transaction; freezing
//! it yields the byte buffer handed to the transact primitive. A
//! [`ParcelView`] walks an inbound buffer field by field. Every read is
//! bounds-checked and surfaces [`TxWireError::Decode`] instead of panicking,
//! since inbound parcels come straight from the peer.
//!
//! All multi-byte integers are Big Endian. Strings and byte arrays are
//! int32-length-prefixed; an empty array encodes as length 0 with no body.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TxWireError};
use crate::handle::EndpointHandle;

/// Write surface of a parcel. Each operation returns a status rather than
/// panicking so callers can propagate failures with `?`.
pub trait ParcelWriter {
    fn write_i32(&mut self, v: i32) -> Result<()>;
    fn write_i64(&mut self, v: i64) -> Result<()>;
    fn write_string(&mut self, s: &str) -> Result<()>;
    fn write_byte_array(&mut self, data: &[u8]) -> Result<()>;
    fn write_handle(&mut self, handle: EndpointHandle) -> Result<()>;
    /// Number of bytes written so far; used for flow-control accounting.
    fn data_size(&self) -> usize;
}

/// Read surface of a parcel.
pub trait ParcelReader {
    fn read_i32(&mut self) -> Result<i32>;
    fn read_i64(&mut self) -> Result<i64>;
    fn read_string(&mut self) -> Result<String>;
    fn read_byte_array(&mut self) -> Result<Bytes>;
    fn read_handle(&mut self) -> Result<EndpointHandle>;
    /// Bytes not yet consumed.
    fn remaining(&self) -> usize;
}

/// Owned write-side parcel backed by `BytesMut`.
#[derive(Debug, Default)]
pub struct Parcel {
    buf: BytesMut,
}

impl Parcel {
    /// Create an empty parcel.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Freeze the parcel into the byte buffer submitted to the transport.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

impl ParcelWriter for Parcel {
    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.buf.put_i32(v);
        Ok(())
    }

    fn write_i64(&mut self, v: i64) -> Result<()> {
        self.buf.put_i64(v);
        Ok(())
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        self.write_byte_array(s.as_bytes())
    }

    fn write_byte_array(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > i32::MAX as usize {
            return Err(TxWireError::Protocol(format!(
                "byte array of {} bytes does not fit an int32 length field",
                data.len()
            )));
        }
        self.buf.put_i32(data.len() as i32);
        if !data.is_empty() {
            self.buf.put_slice(data);
        }
        Ok(())
    }

    fn write_handle(&mut self, handle: EndpointHandle) -> Result<()> {
        self.buf.put_u64(handle.raw());
        Ok(())
    }

    fn data_size(&self) -> usize {
        self.buf.len()
    }
}

/// Read-side cursor over a frozen inbound parcel.
#[derive(Debug)]
pub struct ParcelView {
    buf: Bytes,
}

impl ParcelView {
    /// Wrap an inbound buffer for field-by-field decoding.
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(TxWireError::Decode(format!(
                "truncated parcel: need {n} bytes for {what}, {} remain",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn read_length(&mut self, what: &str) -> Result<usize> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(TxWireError::Decode(format!(
                "negative length {len} for {what}"
            )));
        }
        let len = len as usize;
        self.need(len, what)?;
        Ok(len)
    }
}

impl ParcelReader for ParcelView {
    fn read_i32(&mut self) -> Result<i32> {
        self.need(4, "int32")?;
        Ok(self.buf.get_i32())
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.need(8, "int64")?;
        Ok(self.buf.get_i64())
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_length("string")?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec())
            .map_err(|_| TxWireError::Decode("invalid UTF-8 in string field".to_string()))
    }

    fn read_byte_array(&mut self) -> Result<Bytes> {
        let len = self.read_length("byte array")?;
        if len == 0 {
            return Ok(Bytes::new());
        }
        Ok(self.buf.split_to(len))
    }

    fn read_handle(&mut self) -> Result<EndpointHandle> {
        self.need(8, "endpoint handle")?;
        Ok(EndpointHandle::from_raw(self.buf.get_u64()))
    }

    fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_roundtrip() {
        let mut p = Parcel::new();
        p.write_i32(-7).unwrap();
        p.write_i64(1 << 40).unwrap();
        assert_eq!(p.data_size(), 12);

        let mut v = ParcelView::new(p.freeze());
        assert_eq!(v.read_i32().unwrap(), -7);
        assert_eq!(v.read_i64().unwrap(), 1 << 40);
        assert_eq!(v.remaining(), 0);
    }

    #[test]
    fn test_string_and_byte_array_roundtrip() {
        let mut p = Parcel::new();
        p.write_string("Echo").unwrap();
        p.write_byte_array(b"payload").unwrap();
        p.write_byte_array(b"").unwrap();

        let mut v = ParcelView::new(p.freeze());
        assert_eq!(v.read_string().unwrap(), "Echo");
        assert_eq!(v.read_byte_array().unwrap(), Bytes::from_static(b"payload"));
        assert_eq!(v.read_byte_array().unwrap(), Bytes::new());
        assert_eq!(v.remaining(), 0);
    }

    #[test]
    fn test_empty_byte_array_has_no_body() {
        let mut p = Parcel::new();
        p.write_byte_array(b"").unwrap();
        assert_eq!(p.data_size(), 4);
    }

    #[test]
    fn test_oversized_byte_array_is_rejected_on_write() {
        // Zeroed allocation stays lazily mapped; the write fails before any
        // copy happens.
        let data = vec![0u8; i32::MAX as usize + 1];
        let mut p = Parcel::new();
        assert!(matches!(
            p.write_byte_array(&data),
            Err(TxWireError::Protocol(_))
        ));
        assert_eq!(p.data_size(), 0);
    }

    #[test]
    fn test_truncated_int_is_decode_error() {
        let mut v = ParcelView::new(Bytes::from_static(&[0, 0]));
        assert!(matches!(v.read_i32(), Err(TxWireError::Decode(_))));
    }

    #[test]
    fn test_length_beyond_buffer_is_decode_error() {
        // Claims a 9999-byte array, provides none.
        let mut p = Parcel::new();
        p.write_i32(9999).unwrap();
        let mut v = ParcelView::new(p.freeze());
        assert!(matches!(v.read_byte_array(), Err(TxWireError::Decode(_))));
    }

    #[test]
    fn test_negative_length_is_decode_error() {
        let mut p = Parcel::new();
        p.write_i32(-1).unwrap();
        let mut v = ParcelView::new(p.freeze());
        assert!(matches!(v.read_byte_array(), Err(TxWireError::Decode(_))));
    }

    #[test]
    fn test_invalid_utf8_is_decode_error() {
        let mut p = Parcel::new();
        p.write_byte_array(&[0xff, 0xfe]).unwrap();
        let mut v = ParcelView::new(p.freeze());
        assert!(matches!(v.read_string(), Err(TxWireError::Decode(_))));
    }

    #[test]
    fn test_handle_roundtrip() {
        let mut p = Parcel::new();
        p.write_handle(EndpointHandle::from_raw(42)).unwrap();
        let mut v = ParcelView::new(p.freeze());
        assert_eq!(v.read_handle().unwrap().raw(), 42);
    }
}
