//! In-process transport endpoint.
//!
//! Each [`MemoryEndpoint`] owns a delivery thread that feeds received
//! transactions to the bound callback one at a time, in submission order.
//! Delivery is asynchronous with respect to `transact`, which mirrors how a
//! kernel-brokered transport behaves and keeps two endpoints from
//! deadlocking when both sides send at once.

use std::sync::mpsc;
use std::thread;

use bytes::Bytes;
use parking_lot::Mutex;

use super::{ReceiveCallback, TransactEndpoint};
use crate::error::{Result, TxWireError};

/// A transact endpoint whose peer lives in the same process.
pub struct MemoryEndpoint {
    tx: Mutex<Option<mpsc::Sender<(u32, Bytes)>>>,
}

impl MemoryEndpoint {
    /// Creates an endpoint delivering to `callback` on a dedicated thread.
    pub fn bind(callback: ReceiveCallback) -> Self {
        let (tx, rx) = mpsc::channel::<(u32, Bytes)>();
        thread::Builder::new()
            .name("txwire-delivery".into())
            .spawn(move || {
                while let Ok((code, parcel)) = rx.recv() {
                    callback(code, parcel);
                }
                tracing::debug!("delivery thread exiting");
            })
            .ok();
        MemoryEndpoint {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Stops accepting transactions; the delivery thread drains what was
    /// already queued and exits.
    pub fn close(&self) {
        self.tx.lock().take();
    }
}

impl TransactEndpoint for MemoryEndpoint {
    fn transact(&self, code: u32, parcel: Bytes) -> Result<()> {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => tx
                .send((code, parcel))
                .map_err(|_| TxWireError::ChannelClosed),
            None => Err(TxWireError::ChannelClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_delivers_in_submission_order() {
        let (seen_tx, seen_rx) = channel();
        let endpoint = MemoryEndpoint::bind(Arc::new(move |code, _| {
            seen_tx.send(code).ok();
        }));
        for code in 1..=5u32 {
            endpoint.transact(code, Bytes::new()).unwrap();
        }
        for code in 1..=5u32 {
            assert_eq!(seen_rx.recv_timeout(Duration::from_secs(5)).unwrap(), code);
        }
    }

    #[test]
    fn test_transact_after_close_fails() {
        let endpoint = MemoryEndpoint::bind(Arc::new(|_, _| {}));
        endpoint.close();
        assert!(matches!(
            endpoint.transact(1, Bytes::new()),
            Err(TxWireError::ChannelClosed)
        ));
    }

    #[test]
    fn test_queued_transactions_drain_after_close() {
        let (seen_tx, seen_rx) = channel();
        let endpoint = MemoryEndpoint::bind(Arc::new(move |code, _| {
            seen_tx.send(code).ok();
        }));
        endpoint.transact(7, Bytes::new()).unwrap();
        endpoint.close();
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }
}
