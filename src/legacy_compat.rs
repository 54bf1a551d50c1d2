//! Legacy string-based mapping helpers
//!
//! Kept so older call sites keep compiling while they migrate to
//! [`LegacyStatusMapper`]. Every function delegates to the shared mapper;
//! none of them carries mapping knowledge of its own.

#![allow(deprecated)]

use std::sync::LazyLock;

use crate::error::StatusError;
use crate::status::{
    LegacyStatusMapper, LegacySystemType, MappingError, UnifiedTransactionStatus,
};

static MAPPER: LazyLock<LegacyStatusMapper> = LazyLock::new(LegacyStatusMapper::new);

#[deprecated(note = "use LegacyStatusMapper::map_to_unified_str")]
pub fn map_cashout_status(legacy_status: &str) -> Result<UnifiedTransactionStatus, MappingError> {
    MAPPER.map_to_unified_str(legacy_status, LegacySystemType::Cashout.as_str())
}

#[deprecated(note = "use LegacyStatusMapper::map_to_unified_str")]
pub fn map_escrow_status(legacy_status: &str) -> Result<UnifiedTransactionStatus, MappingError> {
    MAPPER.map_to_unified_str(legacy_status, LegacySystemType::Escrow.as_str())
}

#[deprecated(note = "use LegacyStatusMapper::map_to_unified_str")]
pub fn map_exchange_status(legacy_status: &str) -> Result<UnifiedTransactionStatus, MappingError> {
    MAPPER.map_to_unified_str(legacy_status, LegacySystemType::Exchange.as_str())
}

#[deprecated(note = "use LegacyStatusMapper::map_to_unified_str")]
pub fn map_legacy_status(
    legacy_status: &str,
    system_type: &str,
) -> Result<UnifiedTransactionStatus, MappingError> {
    MAPPER.map_to_unified_str(legacy_status, system_type)
}

/// Returns the legacy status string for a unified status
#[deprecated(note = "use LegacyStatusMapper::map_from_unified")]
pub fn to_legacy_status(
    unified_status: &str,
    system_type: &str,
) -> Result<&'static str, StatusError> {
    let unified: UnifiedTransactionStatus = unified_status
        .parse()
        .map_err(|_| StatusError::UnknownStatus(unified_status.to_string()))?;
    let system: LegacySystemType = system_type
        .parse()
        .map_err(|_| MappingError::UnknownSystemType(system_type.to_string()))?;
    Ok(MAPPER.map_from_unified(unified, system)?.as_str())
}

#[deprecated(note = "use LegacyStatusMapper::is_consistent")]
pub fn statuses_consistent(legacy_status: &str, system_type: &str, unified_status: &str) -> bool {
    let Ok(system) = system_type.parse::<LegacySystemType>() else {
        return false;
    };
    let Ok(legacy) = crate::status::LegacyStatus::parse(system, legacy_status) else {
        return false;
    };
    unified_status
        .parse::<UnifiedTransactionStatus>()
        .is_ok_and(|unified| MAPPER.is_consistent(legacy, unified))
}
