//! Logical transaction model.
//!
//! A [`Transaction`] describes one logical unit of stream traffic: which of
//! the PREFIX / MESSAGE_DATA / SUFFIX sections are present and their
//! contents. It carries no sequence number — sequence numbers belong to
//! physical transactions and are assigned by the writer at the moment a
//! chunk is actually transmitted.

use bytes::Bytes;

use super::wire_format::flags;

/// Ordered list of (key, value) byte-string pairs.
pub type Metadata = Vec<(Bytes, Bytes)>;

/// Which side of the stream this endpoint plays.
///
/// The roles are asymmetric on the wire: only a client writes the route name
/// in a prefix, and only a server writes status information in a suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// One logical transaction on an application stream.
///
/// Each section may be set at most once over the transaction's lifetime;
/// setting one twice is a programming error and panics.
#[derive(Debug, Clone)]
pub struct Transaction {
    code: u32,
    role: Role,
    flags: i32,
    route: String,
    prefix_metadata: Metadata,
    message: Bytes,
    suffix_metadata: Metadata,
    status: i32,
    status_description: Option<String>,
}

impl Transaction {
    /// Create an empty transaction for the given stream code.
    pub fn new(code: u32, role: Role) -> Self {
        Self {
            code,
            role,
            flags: 0,
            route: String::new(),
            prefix_metadata: Metadata::new(),
            message: Bytes::new(),
            suffix_metadata: Metadata::new(),
            status: 0,
            status_description: None,
        }
    }

    /// Attach route name and initial metadata. The route is only encoded
    /// when the sender role is [`Role::Client`].
    pub fn set_prefix(&mut self, route: impl Into<String>, metadata: Metadata) {
        assert!(
            !flags::has_flag(self.flags, flags::PREFIX),
            "prefix set twice on stream {}",
            self.code
        );
        self.route = route.into();
        self.prefix_metadata = metadata;
        self.flags |= flags::PREFIX;
    }

    /// Attach message payload bytes. Payloads larger than one physical block
    /// are split into chunks by the writer.
    pub fn set_message(&mut self, message: Bytes) {
        assert!(
            !flags::has_flag(self.flags, flags::MESSAGE_DATA),
            "message data set twice on stream {}",
            self.code
        );
        self.message = message;
        self.flags |= flags::MESSAGE_DATA;
    }

    /// Attach trailing metadata. A client's suffix metadata is defined to be
    /// empty on the wire; a non-empty one is logged at encode time and
    /// dropped.
    pub fn set_suffix(&mut self, metadata: Metadata) {
        assert!(
            !flags::has_flag(self.flags, flags::SUFFIX),
            "suffix set twice on stream {}",
            self.code
        );
        self.suffix_metadata = metadata;
        self.flags |= flags::SUFFIX;
    }

    /// Set the integer outcome code carried in the suffix flags. Only
    /// meaningful from the server side.
    pub fn set_status(&mut self, status: i32) {
        self.status = status;
    }

    /// Attach a human-readable status description to the suffix.
    pub fn set_status_description(&mut self, description: impl Into<String>) {
        assert!(
            !flags::has_flag(self.flags, flags::STATUS_DESCRIPTION),
            "status description set twice on stream {}",
            self.code
        );
        self.status_description = Some(description.into());
        self.flags |= flags::STATUS_DESCRIPTION;
    }

    #[inline]
    pub fn code(&self) -> u32 {
        self.code
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Section flags accumulated so far (without status bits).
    #[inline]
    pub fn flags(&self) -> i32 {
        self.flags
    }

    #[inline]
    pub fn is_client(&self) -> bool {
        self.role == Role::Client
    }

    #[inline]
    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    #[inline]
    pub fn route(&self) -> &str {
        &self.route
    }

    #[inline]
    pub fn prefix_metadata(&self) -> &Metadata {
        &self.prefix_metadata
    }

    #[inline]
    pub fn message(&self) -> &Bytes {
        &self.message
    }

    #[inline]
    pub fn suffix_metadata(&self) -> &Metadata {
        &self.suffix_metadata
    }

    #[inline]
    pub fn status(&self) -> i32 {
        self.status
    }

    #[inline]
    pub fn status_description(&self) -> Option<&str> {
        self.status_description.as_deref()
    }
}
