//! unified_tx - Unified Transaction Status Engine
//!
//! One status vocabulary and one guarded mutation path for every financial
//! transaction type, kept in step with the legacy per-domain tables during
//! migration.
//!
//! # Modules
//!
//! - [`status`] - Unified and legacy vocabularies, flow tables, validator, mapper
//! - [`models`] - Transaction rows, legacy entities, history, holds, tokens
//! - [`error`] - `StatusError` with stable codes and categories
//! - [`store`] - Unit-of-work storage (in-memory and PostgreSQL)
//! - [`dual_write`] - Mode/strategy-driven writes to both systems, consistency repair
//! - [`facade`] - The single entry point for status changes
//! - [`service`] - Transaction workflows (creation, payouts, holds, admin credit)
//! - [`otp`] - OTP collaborator seam
//! - [`notifications`] - Post-update notification hook
//! - [`worker`] - Background consistency worker
//! - [`legacy_compat`] - Deprecated string-based mapping helpers

pub mod config;
pub mod logging;

// Vocabulary and data
pub mod error;
pub mod models;
pub mod status;

// Storage and coordination
pub mod dual_write;
pub mod store;

// Entry points and workflows
pub mod facade;
pub mod notifications;
pub mod otp;
pub mod service;
pub mod worker;

pub mod legacy_compat;

// Convenient re-exports at crate root
pub use dual_write::{
    DualWriteAdapter, DualWriteConfig, DualWriteMode, DualWriteStrategy, EntityKey,
};
pub use error::{ErrorCategory, StatusError};
pub use facade::{StatusUpdateFacade, StatusUpdateRequest, StatusUpdateResult};
pub use models::{LegacyRef, OperationId, TransactionId, UnifiedTransaction};
pub use service::TransactionService;
pub use status::{
    LegacyStatus, LegacyStatusMapper, StatusContext, StatusValue, UnifiedTransactionStatus,
    UnifiedTransactionType, UnifiedTransitionValidator,
};
pub use store::{MemoryStore, PgStore, StoreError, TransactionStore};
