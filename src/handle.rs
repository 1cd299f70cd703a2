//! Endpoint handles.
//!
//! A handle is an opaque token that travels inside a SETUP parcel and lets
//! the peer resolve a live [`TransactEndpoint`] out of a shared arena. In a
//! real kernel-brokered transport the token would be materialized by the OS;
//! here the arena plays that role for in-process transports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, TxWireError};
use crate::transport::TransactEndpoint;

/// Opaque token identifying an endpoint registered with a [`HandleArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointHandle(u64);

impl EndpointHandle {
    /// Reconstructs a handle from its wire representation.
    pub fn from_raw(raw: u64) -> Self {
        EndpointHandle(raw)
    }

    /// The wire representation of this handle.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

struct Entry {
    endpoint: Arc<dyn TransactEndpoint>,
    refs: u32,
}

/// Registry mapping handles to live endpoints.
///
/// Both sides of an in-process connection share one arena. Registering an
/// endpoint mints a fresh handle; resolving a received handle bumps a
/// reference count so the endpoint outlives the parcel it arrived in until
/// the resolver releases it.
pub struct HandleArena {
    entries: Mutex<HashMap<u64, Entry>>,
    next_id: AtomicU64,
}

impl HandleArena {
    pub fn new() -> Arc<Self> {
        Arc::new(HandleArena {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Registers an endpoint and mints a handle for it.
    pub fn register(&self, endpoint: Arc<dyn TransactEndpoint>) -> EndpointHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .insert(id, Entry { endpoint, refs: 1 });
        EndpointHandle(id)
    }

    /// Resolves a handle received from the peer, taking a reference.
    pub fn resolve(&self, handle: EndpointHandle) -> Result<Arc<dyn TransactEndpoint>> {
        let mut entries = self.entries.lock();
        match entries.get_mut(&handle.0) {
            Some(entry) => {
                entry.refs += 1;
                Ok(entry.endpoint.clone())
            }
            None => Err(TxWireError::Protocol(format!(
                "unknown endpoint handle {}",
                handle.0
            ))),
        }
    }

    /// Drops one reference; the entry is removed once every holder releases.
    pub fn release(&self, handle: EndpointHandle) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&handle.0) {
            entry.refs -= 1;
            if entry.refs == 0 {
                entries.remove(&handle.0);
            }
        }
    }
}
