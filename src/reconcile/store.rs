use async_trait::async_trait;

use super::{AssociationSet, StoreError};

/// The remote side of one entity's associations.
///
/// A store is bound to a single entity (a group on a project, a quality
/// gate, ...). It has no transactions: every `add`/`remove` is an
/// independent remote call, and `search` may not yet reflect earlier writes.
#[async_trait]
pub trait AssociationStore: Send + Sync + 'static {
    /// Human-readable name of the entity, used in logs and errors.
    fn describe(&self) -> String;

    /// Read the current associations, exhausting every result page.
    ///
    /// Returns `Ok(None)` when the entity itself does not exist.
    async fn search(&self) -> Result<Option<AssociationSet>, StoreError>;

    /// Create one association.
    async fn add(&self, key: &str) -> Result<(), StoreError>;

    /// Delete one association.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}
