//! Status Vocabulary & Transition Rules
//!
//! # Architecture
//!
//! ```text
//! legacy vocabularies ──(LegacyStatusMapper)──▶ unified status ──(validator)──▶ verdict
//!   cashout / escrow / exchange                    16 values         flow tables per type
//! ```
//!
//! # Invariants
//!
//! 1. Every unified status belongs to exactly one [`StatusPhase`]
//! 2. Every legacy status has exactly one forward mapping
//! 3. Terminal statuses have no outgoing edges, except the enumerated
//!    administrative resolution edges
//! 4. No flow edge moves backwards in phase unless it lands in Terminal

pub mod flows;
pub mod legacy;
pub mod mapper;
pub mod unified;
pub mod validator;

pub use flows::StatusFlows;
pub use legacy::{
    CashoutStatus, EscrowStatus, ExchangeStatus, LegacyStatus, LegacySystemType, StatusValue,
};
pub use mapper::{LegacyStatusMapper, MappingCompletenessReport, MappingError, ReverseCoverage};
pub use unified::{
    Loose, ParseEnumError, StatusContext, StatusPhase, UnifiedTransactionStatus,
    UnifiedTransactionType,
};
pub use validator::{UnifiedTransitionValidator, ValidationFailure, ValidationResult};
