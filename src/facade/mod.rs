//! Status Update Facade
//!
//! The only sanctioned path for changing a transaction's status.
//!
//! # Pipeline
//!
//! ```text
//! ┌──────┐  ┌───────┐  ┌──────────┐  ┌─────────┐  ┌────────────┐  ┌────────┐
//! │ Load │─▶│ Rules │─▶│ Validate │─▶│ Effects │─▶│ Dual-write │─▶│ Commit │
//! └──────┘  └───────┘  └──────────┘  └─────────┘  └────────────┘  └────────┘
//!    └──────────────── one unit of work ──────────────────────────────┘
//!                                                          │
//!                               history (own unit of work) ┤
//!                                      financial audit log ┤
//!                                 post-update hooks (spawn)┘
//! ```
//!
//! Any failure before commit leaves both rows untouched. A history failure
//! after commit is reported as a warning only.

pub mod audit;
pub mod effects;
pub mod hooks;
pub mod rules;
pub mod status_update;
pub mod types;

pub use hooks::{PostUpdateHook, StatusChangeEvent};
pub use status_update::StatusUpdateFacade;
pub use types::{StatusUpdateRequest, StatusUpdateResult};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What happens when an OTP-gated cashout reaches `processing` unverified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpEnforcement {
    /// Proceed, with a warning on the result
    #[default]
    Warn,
    /// Reject with `OtpRequired`
    Enforce,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusUpdateConfig {
    /// Cashouts at or above this amount need OTP before `processing`
    pub otp_threshold: Decimal,
    pub otp_enforcement: OtpEnforcement,
    /// Append `accepted = false` history rows for rejected transitions
    pub record_rejected_transitions: bool,
}

impl Default for StatusUpdateConfig {
    fn default() -> Self {
        Self {
            otp_threshold: Decimal::new(1000, 0),
            otp_enforcement: OtpEnforcement::Warn,
            record_rejected_transitions: true,
        }
    }
}
