//! Legacy Status Mapper
//!
//! Bidirectional translation between each legacy vocabulary and the unified
//! vocabulary. Forward maps are many-to-one; reverse maps are built once by
//! inverting them in declaration order, so the first registered legacy value
//! is the stable "primary" choice.
//!
//! The mapper is an immutable value: build it once at startup and share it
//! behind an `Arc`.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use super::legacy::{CashoutStatus, EscrowStatus, ExchangeStatus, LegacyStatus, LegacySystemType};
use super::unified::UnifiedTransactionStatus as U;
use super::unified::UnifiedTransactionStatus;

/// Mapping errors. These indicate a missing table entry, not a transient
/// condition, and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("Unknown legacy status '{value}' for system {system}")]
    UnknownLegacyStatus { system: String, value: String },

    #[error("Unknown legacy system type: {0}")]
    UnknownSystemType(String),

    #[error("No reverse mapping from unified status {status} to {system}")]
    NoReverseMapping {
        status: UnifiedTransactionStatus,
        system: LegacySystemType,
    },

    #[error("Legacy status {status} does not belong to system {expected}")]
    SystemMismatch {
        status: LegacyStatus,
        expected: LegacySystemType,
    },
}

impl MappingError {
    pub fn code(&self) -> &'static str {
        match self {
            MappingError::UnknownLegacyStatus { .. } => "UNKNOWN_LEGACY_STATUS",
            MappingError::UnknownSystemType(_) => "UNKNOWN_SYSTEM_TYPE",
            MappingError::NoReverseMapping { .. } => "NO_REVERSE_MAPPING",
            MappingError::SystemMismatch { .. } => "SYSTEM_MISMATCH",
        }
    }
}

// ============================================================================
// Mapping tables
// ============================================================================

const CASHOUT_FORWARD: &[(CashoutStatus, U)] = &[
    (CashoutStatus::Pending, U::Pending),
    (CashoutStatus::OtpPending, U::OtpPending),
    (CashoutStatus::UserConfirmPending, U::AwaitingApproval),
    (CashoutStatus::AdminPending, U::AdminPending),
    (CashoutStatus::PendingAddressConfig, U::AdminPending),
    (CashoutStatus::PendingServiceFunding, U::AdminPending),
    (CashoutStatus::Approved, U::FundsHeld),
    (CashoutStatus::Processing, U::Processing),
    (CashoutStatus::Executing, U::Processing),
    (CashoutStatus::AwaitingResponse, U::AwaitingResponse),
    (CashoutStatus::Success, U::Success),
    (CashoutStatus::Completed, U::Success),
    (CashoutStatus::Failed, U::Failed),
    (CashoutStatus::Expired, U::Expired),
    (CashoutStatus::Cancelled, U::Cancelled),
];

const ESCROW_FORWARD: &[(EscrowStatus, U)] = &[
    (EscrowStatus::Created, U::Pending),
    (EscrowStatus::PaymentPending, U::AwaitingPayment),
    (EscrowStatus::PendingDeposit, U::AwaitingPayment),
    (EscrowStatus::PaymentConfirmed, U::PaymentConfirmed),
    (EscrowStatus::PartialPayment, U::PartialPayment),
    (EscrowStatus::PendingSeller, U::AwaitingApproval),
    (EscrowStatus::Active, U::FundsHeld),
    (EscrowStatus::Completed, U::Success),
    (EscrowStatus::PaymentFailed, U::Failed),
    (EscrowStatus::Disputed, U::Disputed),
    (EscrowStatus::Cancelled, U::Cancelled),
    (EscrowStatus::Refunded, U::Cancelled),
    (EscrowStatus::Expired, U::Expired),
];

const EXCHANGE_FORWARD: &[(ExchangeStatus, U)] = &[
    (ExchangeStatus::Created, U::Pending),
    (ExchangeStatus::AwaitingDeposit, U::AwaitingPayment),
    (ExchangeStatus::PaymentConfirmed, U::PaymentConfirmed),
    (ExchangeStatus::PaymentReceived, U::PaymentConfirmed),
    (ExchangeStatus::RateLocked, U::FundsHeld),
    (ExchangeStatus::PendingApproval, U::AwaitingApproval),
    (ExchangeStatus::Processing, U::Processing),
    (ExchangeStatus::Completed, U::Success),
    (ExchangeStatus::Failed, U::Failed),
    (ExchangeStatus::Cancelled, U::Cancelled),
    (ExchangeStatus::Expired, U::Expired),
];

/// Approximations for unified statuses with no natural legacy predecessor.
/// Reviewed with the domain owners; extend only deliberately.
const REVERSE_FALLBACKS: &[(U, LegacyStatus)] = &[
    (U::ReleasePending, LegacyStatus::Cashout(CashoutStatus::Executing)),
    (U::ReleasePending, LegacyStatus::Escrow(EscrowStatus::Active)),
    (U::ReleasePending, LegacyStatus::Exchange(ExchangeStatus::Processing)),
];

// ============================================================================
// Completeness report
// ============================================================================

/// How a unified status reaches one legacy system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReverseCoverage {
    Direct { candidates: Vec<LegacyStatus> },
    Fallback { status: LegacyStatus },
    Missing,
}

/// Output of [`LegacyStatusMapper::validate_mapping_completeness`]
#[derive(Debug, Clone, Serialize)]
pub struct MappingCompletenessReport {
    /// Legacy values without a forward mapping. Must be empty.
    pub missing_forward: Vec<LegacyStatus>,
    /// Forward mappings registered per system
    pub forward_counts: BTreeMap<LegacySystemType, usize>,
    /// Per system, per unified status: how (and whether) it maps back
    pub reverse: BTreeMap<LegacySystemType, BTreeMap<UnifiedTransactionStatus, ReverseCoverage>>,
}

impl MappingCompletenessReport {
    /// Forward completeness is the startup invariant
    pub fn is_complete(&self) -> bool {
        self.missing_forward.is_empty()
    }

    pub fn missing_reverse(&self) -> Vec<(LegacySystemType, UnifiedTransactionStatus)> {
        self.reverse
            .iter()
            .flat_map(|(system, statuses)| {
                statuses
                    .iter()
                    .filter(|(_, coverage)| **coverage == ReverseCoverage::Missing)
                    .map(move |(status, _)| (*system, *status))
            })
            .collect()
    }
}

// ============================================================================
// Mapper
// ============================================================================

/// Immutable bidirectional mapper between legacy and unified statuses
#[derive(Debug, Clone)]
pub struct LegacyStatusMapper {
    forward: HashMap<LegacyStatus, UnifiedTransactionStatus>,
    /// Declaration-ordered inversion of `forward`
    reverse: HashMap<(LegacySystemType, UnifiedTransactionStatus), Vec<LegacyStatus>>,
    fallbacks: HashMap<(LegacySystemType, UnifiedTransactionStatus), LegacyStatus>,
}

impl Default for LegacyStatusMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl LegacyStatusMapper {
    /// Build the mapper from the production tables
    pub fn new() -> Self {
        let forward_pairs = CASHOUT_FORWARD
            .iter()
            .map(|(l, u)| (LegacyStatus::Cashout(*l), *u))
            .chain(
                ESCROW_FORWARD
                    .iter()
                    .map(|(l, u)| (LegacyStatus::Escrow(*l), *u)),
            )
            .chain(
                EXCHANGE_FORWARD
                    .iter()
                    .map(|(l, u)| (LegacyStatus::Exchange(*l), *u)),
            );
        Self::from_tables(forward_pairs, REVERSE_FALLBACKS.iter().copied())
    }

    /// Build a mapper from arbitrary tables (declaration order matters)
    pub fn from_tables(
        forward_pairs: impl IntoIterator<Item = (LegacyStatus, UnifiedTransactionStatus)>,
        fallback_pairs: impl IntoIterator<Item = (UnifiedTransactionStatus, LegacyStatus)>,
    ) -> Self {
        let mut forward = HashMap::new();
        let mut reverse: HashMap<_, Vec<LegacyStatus>> = HashMap::new();

        for (legacy, unified) in forward_pairs {
            if forward.insert(legacy, unified).is_none() {
                reverse
                    .entry((legacy.system(), unified))
                    .or_default()
                    .push(legacy);
            }
        }

        let fallbacks = fallback_pairs
            .into_iter()
            .map(|(unified, legacy)| ((legacy.system(), unified), legacy))
            .collect();

        Self {
            forward,
            reverse,
            fallbacks,
        }
    }

    /// Legacy → unified
    pub fn map_to_unified(
        &self,
        legacy: LegacyStatus,
    ) -> Result<UnifiedTransactionStatus, MappingError> {
        self.forward
            .get(&legacy)
            .copied()
            .ok_or_else(|| MappingError::UnknownLegacyStatus {
                system: legacy.system().to_string(),
                value: legacy.as_str().to_string(),
            })
    }

    /// Legacy → unified from raw strings
    pub fn map_to_unified_str(
        &self,
        legacy_status: &str,
        system_type: &str,
    ) -> Result<UnifiedTransactionStatus, MappingError> {
        let system: LegacySystemType = system_type
            .parse()
            .map_err(|_| MappingError::UnknownSystemType(system_type.to_string()))?;
        let legacy = LegacyStatus::parse(system, legacy_status).map_err(|_| {
            MappingError::UnknownLegacyStatus {
                system: system.to_string(),
                value: legacy_status.to_string(),
            }
        })?;
        self.map_to_unified(legacy)
    }

    /// Unified → legacy, primary candidate.
    ///
    /// Always returns the first-registered legacy value; applies the fallback
    /// table when no direct candidate exists.
    pub fn map_from_unified(
        &self,
        unified: UnifiedTransactionStatus,
        system: LegacySystemType,
    ) -> Result<LegacyStatus, MappingError> {
        if let Some(primary) = self
            .reverse
            .get(&(system, unified))
            .and_then(|candidates| candidates.first())
        {
            return Ok(*primary);
        }
        self.fallbacks
            .get(&(system, unified))
            .copied()
            .ok_or(MappingError::NoReverseMapping {
                status: unified,
                system,
            })
    }

    /// Unified → legacy, every candidate in declaration order
    pub fn candidates_from_unified(
        &self,
        unified: UnifiedTransactionStatus,
        system: LegacySystemType,
    ) -> Result<Vec<LegacyStatus>, MappingError> {
        match self.reverse.get(&(system, unified)) {
            Some(candidates) if !candidates.is_empty() => Ok(candidates.clone()),
            _ => self
                .fallbacks
                .get(&(system, unified))
                .map(|fallback| vec![*fallback])
                .ok_or(MappingError::NoReverseMapping {
                    status: unified,
                    system,
                }),
        }
    }

    /// Whether a stored legacy status agrees with a stored unified status,
    /// counting fallback approximations as agreement.
    pub fn is_consistent(&self, legacy: LegacyStatus, unified: UnifiedTransactionStatus) -> bool {
        if self.forward.get(&legacy) == Some(&unified) {
            return true;
        }
        self.fallbacks.get(&(legacy.system(), unified)) == Some(&legacy)
    }

    /// Startup / CI self-check over every legacy and unified value
    pub fn validate_mapping_completeness(&self) -> MappingCompletenessReport {
        let mut missing_forward = Vec::new();
        let mut forward_counts = BTreeMap::new();
        let mut reverse = BTreeMap::new();

        for system in LegacySystemType::ALL {
            let statuses = system.statuses();
            let mapped = statuses
                .iter()
                .filter(|legacy| self.forward.contains_key(legacy))
                .count();
            missing_forward.extend(
                statuses
                    .iter()
                    .filter(|legacy| !self.forward.contains_key(legacy)),
            );
            forward_counts.insert(system, mapped);

            let coverage = UnifiedTransactionStatus::ALL
                .into_iter()
                .map(|unified| {
                    let entry = match self.reverse.get(&(system, unified)) {
                        Some(candidates) if !candidates.is_empty() => ReverseCoverage::Direct {
                            candidates: candidates.clone(),
                        },
                        _ => match self.fallbacks.get(&(system, unified)) {
                            Some(status) => ReverseCoverage::Fallback { status: *status },
                            None => ReverseCoverage::Missing,
                        },
                    };
                    (unified, entry)
                })
                .collect();
            reverse.insert(system, coverage);
        }

        MappingCompletenessReport {
            missing_forward,
            forward_counts,
            reverse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_many_to_one_forward() {
        let m = LegacyStatusMapper::new();
        assert_eq!(
            m.map_to_unified(CashoutStatus::Success.into()),
            Ok(U::Success)
        );
        assert_eq!(
            m.map_to_unified(CashoutStatus::Completed.into()),
            Ok(U::Success)
        );
    }

    #[test]
    fn test_funds_secured_equivalence() {
        let m = LegacyStatusMapper::new();
        assert_eq!(m.map_to_unified(CashoutStatus::Approved.into()), Ok(U::FundsHeld));
        assert_eq!(m.map_to_unified(EscrowStatus::Active.into()), Ok(U::FundsHeld));
        assert_eq!(m.map_to_unified(ExchangeStatus::RateLocked.into()), Ok(U::FundsHeld));
    }

    #[test]
    fn test_primary_is_first_registered() {
        let m = LegacyStatusMapper::new();
        assert_eq!(
            m.map_from_unified(U::Success, LegacySystemType::Cashout),
            Ok(CashoutStatus::Success.into())
        );
        assert_eq!(
            m.candidates_from_unified(U::AdminPending, LegacySystemType::Cashout),
            Ok(vec![
                CashoutStatus::AdminPending.into(),
                CashoutStatus::PendingAddressConfig.into(),
                CashoutStatus::PendingServiceFunding.into(),
            ])
        );
    }

    #[test]
    fn test_release_pending_fallbacks() {
        let m = LegacyStatusMapper::new();
        assert_eq!(
            m.map_from_unified(U::ReleasePending, LegacySystemType::Cashout),
            Ok(CashoutStatus::Executing.into())
        );
        assert_eq!(
            m.map_from_unified(U::ReleasePending, LegacySystemType::Escrow),
            Ok(EscrowStatus::Active.into())
        );
        assert_eq!(
            m.map_from_unified(U::ReleasePending, LegacySystemType::Exchange),
            Ok(ExchangeStatus::Processing.into())
        );
    }

    #[test]
    fn test_no_reverse_mapping_fails_loudly() {
        let m = LegacyStatusMapper::new();
        assert_eq!(
            m.map_from_unified(U::Disputed, LegacySystemType::Cashout),
            Err(MappingError::NoReverseMapping {
                status: U::Disputed,
                system: LegacySystemType::Cashout,
            })
        );
    }

    #[test]
    fn test_string_inputs() {
        let m = LegacyStatusMapper::new();
        assert_eq!(m.map_to_unified_str("rate_locked", "exchange"), Ok(U::FundsHeld));
        assert!(matches!(
            m.map_to_unified_str("rate_locked", "escrow"),
            Err(MappingError::UnknownLegacyStatus { .. })
        ));
        assert!(matches!(
            m.map_to_unified_str("pending", "remittance"),
            Err(MappingError::UnknownSystemType(_))
        ));
    }

    #[test]
    fn test_consistency_accepts_fallback() {
        let m = LegacyStatusMapper::new();
        assert!(m.is_consistent(EscrowStatus::Active.into(), U::FundsHeld));
        assert!(m.is_consistent(EscrowStatus::Active.into(), U::ReleasePending));
        assert!(!m.is_consistent(EscrowStatus::Created.into(), U::ReleasePending));
    }

    #[test]
    fn test_completeness_report() {
        let report = LegacyStatusMapper::new().validate_mapping_completeness();
        assert!(report.is_complete());
        assert_eq!(report.forward_counts[&LegacySystemType::Cashout], 15);
        assert_eq!(report.forward_counts[&LegacySystemType::Escrow], 13);
        assert_eq!(report.forward_counts[&LegacySystemType::Exchange], 11);
        assert_eq!(
            report.reverse[&LegacySystemType::Escrow][&U::ReleasePending],
            ReverseCoverage::Fallback {
                status: EscrowStatus::Active.into()
            }
        );
        assert!(
            report
                .missing_reverse()
                .contains(&(LegacySystemType::Cashout, U::Disputed))
        );
    }

    #[test]
    fn test_incomplete_tables_are_reported() {
        let m = LegacyStatusMapper::from_tables(
            [(LegacyStatus::Cashout(CashoutStatus::Pending), U::Pending)],
            [],
        );
        let report = m.validate_mapping_completeness();
        assert!(!report.is_complete());
        assert_eq!(report.missing_forward.len(), 38);
    }
}
