//! Pluggable credential storage
//!
//! The orchestrator reads a snapshot before every call and writes back after
//! a successful refresh. Deployments inject their own implementation (a
//! database row, a KV entry, an encrypted vault); `FileStore` is the
//! illustrative default.
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
//! (`Arc<dyn CredentialStorage>`).

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;
use crate::record::{CredentialHint, CredentialRecord};

/// Boxed future returned by storage operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Reads and writes one tenant's credential record.
///
/// The store keys records by the hint's domain. Reads returning a record
/// that fails [`CredentialRecord::is_valid`] are treated as absent by the
/// caller, so implementations need not validate. Each read/write is assumed
/// atomic; no further concurrency property is required.
pub trait CredentialStorage: Send + Sync {
    /// Return the record for the tenant identified by `hint`, if any.
    fn read<'a>(
        &'a self,
        hint: &'a CredentialHint,
    ) -> StorageFuture<'a, Result<Option<CredentialRecord>>>;

    /// Persist the record, keyed by its domain.
    fn write<'a>(&'a self, record: &'a CredentialRecord) -> StorageFuture<'a, Result<()>>;
}
