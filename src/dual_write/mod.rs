//! Dual-write Coordination
//!
//! Keeps the legacy entity row and the unified transaction row of one
//! logical transaction in step.
//!
//! ```text
//! facade ──update_status──▶ DualWriteAdapter ──CAS──▶ legacy row
//!                                  │          └─CAS──▶ unified row
//!                                  └─check_consistency / repair_inconsistency
//! ```
//!
//! Write order is fixed per mode: legacy-primary modes write the legacy row
//! first, unified-primary modes write the unified row first.

pub mod adapter;
pub mod config;
pub mod consistency;

pub use adapter::{DualWriteAdapter, DualWriteResult, WriteTarget};
pub use config::{DualWriteConfig, DualWriteMode, DualWriteStrategy};
pub use consistency::{
    ConsistencyReport, Discrepancy, DiscrepancyKind, RepairOutcome, RepairStrategy,
};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{LegacyEntity, LegacyRef, TransactionId, UnifiedTransaction};
use crate::store::{StoreError, StoreTx};

/// Either side's identifier; both resolve to the same pair of rows
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityKey {
    Transaction(TransactionId),
    Legacy(LegacyRef),
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Transaction(id) => write!(f, "transaction/{}", id),
            EntityKey::Legacy(r) => write!(f, "{}", r),
        }
    }
}

impl From<TransactionId> for EntityKey {
    fn from(id: TransactionId) -> Self {
        EntityKey::Transaction(id)
    }
}

impl From<LegacyRef> for EntityKey {
    fn from(r: LegacyRef) -> Self {
        EntityKey::Legacy(r)
    }
}

/// Both representations of one logical transaction, as currently stored
#[derive(Debug, Clone, Default)]
pub struct EntityPair {
    pub unified: Option<UnifiedTransaction>,
    pub legacy: Option<LegacyEntity>,
}

impl EntityPair {
    pub fn legacy_ref(&self) -> Option<LegacyRef> {
        self.legacy
            .as_ref()
            .map(LegacyEntity::legacy_ref)
            .or_else(|| self.unified.as_ref().and_then(UnifiedTransaction::legacy_ref))
    }

    pub fn is_empty(&self) -> bool {
        self.unified.is_none() && self.legacy.is_none()
    }
}

/// Load both rows for a key within an open unit of work
pub async fn load_pair(uow: &mut dyn StoreTx, key: &EntityKey) -> Result<EntityPair, StoreError> {
    match key {
        EntityKey::Transaction(id) => {
            let unified = uow.get_unified(*id).await?;
            let legacy = match unified.as_ref().and_then(UnifiedTransaction::legacy_ref) {
                Some(r) => uow.get_legacy(&r).await?,
                None => None,
            };
            Ok(EntityPair { unified, legacy })
        }
        EntityKey::Legacy(r) => {
            let legacy = uow.get_legacy(r).await?;
            let unified = match legacy.as_ref().and_then(LegacyEntity::unified_transaction_id) {
                Some(id) => uow.get_unified(id).await?,
                None => None,
            };
            let unified = match unified {
                Some(tx) => Some(tx),
                None => uow.find_unified_by_legacy(r).await?,
            };
            Ok(EntityPair { unified, legacy })
        }
    }
}
