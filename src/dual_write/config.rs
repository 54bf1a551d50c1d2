//! Dual-write Modes & Strategies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::status::ParseEnumError;

/// Which systems participate in writes, and which one is read first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DualWriteMode {
    LegacyOnly,
    #[default]
    DualWriteLegacyPrimary,
    DualWriteUnifiedPrimary,
    UnifiedOnly,
}

impl DualWriteMode {
    pub const ALL: [DualWriteMode; 4] = [
        DualWriteMode::LegacyOnly,
        DualWriteMode::DualWriteLegacyPrimary,
        DualWriteMode::DualWriteUnifiedPrimary,
        DualWriteMode::UnifiedOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DualWriteMode::LegacyOnly => "legacy_only",
            DualWriteMode::DualWriteLegacyPrimary => "dual_write_legacy_primary",
            DualWriteMode::DualWriteUnifiedPrimary => "dual_write_unified_primary",
            DualWriteMode::UnifiedOnly => "unified_only",
        }
    }

    #[inline]
    pub fn writes_legacy(&self) -> bool {
        !matches!(self, DualWriteMode::UnifiedOnly)
    }

    #[inline]
    pub fn writes_unified(&self) -> bool {
        !matches!(self, DualWriteMode::LegacyOnly)
    }

    #[inline]
    pub fn is_dual(&self) -> bool {
        self.writes_legacy() && self.writes_unified()
    }

    /// Legacy is read first and written first
    #[inline]
    pub fn legacy_is_primary(&self) -> bool {
        matches!(
            self,
            DualWriteMode::LegacyOnly | DualWriteMode::DualWriteLegacyPrimary
        )
    }
}

impl fmt::Display for DualWriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DualWriteMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DualWriteMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError::new("dual-write mode", s))
    }
}

/// Whether a single-system failure fails the whole write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DualWriteStrategy {
    /// Both sides or nothing; the succeeded side is compensated
    #[default]
    FailFast,
    /// Success follows the legacy write
    LegacyFallback,
    /// Success follows the unified write
    UnifiedFallback,
    /// Either side succeeding is enough
    BestEffort,
}

impl DualWriteStrategy {
    pub const ALL: [DualWriteStrategy; 4] = [
        DualWriteStrategy::FailFast,
        DualWriteStrategy::LegacyFallback,
        DualWriteStrategy::UnifiedFallback,
        DualWriteStrategy::BestEffort,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DualWriteStrategy::FailFast => "fail_fast",
            DualWriteStrategy::LegacyFallback => "legacy_fallback",
            DualWriteStrategy::UnifiedFallback => "unified_fallback",
            DualWriteStrategy::BestEffort => "best_effort",
        }
    }
}

impl fmt::Display for DualWriteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DualWriteStrategy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DualWriteStrategy::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError::new("dual-write strategy", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DualWriteConfig {
    pub mode: DualWriteMode,
    pub strategy: DualWriteStrategy,
}

impl DualWriteConfig {
    pub fn new(mode: DualWriteMode, strategy: DualWriteStrategy) -> Self {
        Self { mode, strategy }
    }

    /// Overall success of a write attempt.
    ///
    /// | mode           | fail_fast | legacy_fallback | unified_fallback | best_effort |
    /// |----------------|-----------|-----------------|------------------|-------------|
    /// | legacy_only    | legacy    | legacy          | legacy           | legacy      |
    /// | dual (either)  | both      | legacy          | unified          | either      |
    /// | unified_only   | unified   | unified         | unified          | unified     |
    pub fn overall_success(&self, legacy_ok: bool, unified_ok: bool) -> bool {
        match self.mode {
            DualWriteMode::LegacyOnly => legacy_ok,
            DualWriteMode::UnifiedOnly => unified_ok,
            DualWriteMode::DualWriteLegacyPrimary | DualWriteMode::DualWriteUnifiedPrimary => {
                match self.strategy {
                    DualWriteStrategy::FailFast => legacy_ok && unified_ok,
                    DualWriteStrategy::LegacyFallback => legacy_ok,
                    DualWriteStrategy::UnifiedFallback => unified_ok,
                    DualWriteStrategy::BestEffort => legacy_ok || unified_ok,
                }
            }
        }
    }

    /// Compensate the succeeded side when the other fails
    #[inline]
    pub fn rolls_back_on_partial_failure(&self) -> bool {
        self.mode.is_dual() && self.strategy == DualWriteStrategy::FailFast
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_success_table() {
        use DualWriteMode as M;
        use DualWriteStrategy as S;

        let dual = DualWriteConfig::new(M::DualWriteLegacyPrimary, S::FailFast);
        assert!(dual.overall_success(true, true));
        assert!(!dual.overall_success(true, false));
        assert!(!dual.overall_success(false, true));

        let best = DualWriteConfig::new(M::DualWriteUnifiedPrimary, S::BestEffort);
        assert!(best.overall_success(false, true));
        assert!(best.overall_success(true, false));
        assert!(!best.overall_success(false, false));

        let legacy_fb = DualWriteConfig::new(M::DualWriteUnifiedPrimary, S::LegacyFallback);
        assert!(legacy_fb.overall_success(true, false));
        assert!(!legacy_fb.overall_success(false, true));

        let unified_fb = DualWriteConfig::new(M::DualWriteLegacyPrimary, S::UnifiedFallback);
        assert!(unified_fb.overall_success(false, true));
        assert!(!unified_fb.overall_success(true, false));

        // Single-system modes ignore the strategy
        for strategy in DualWriteStrategy::ALL {
            let legacy_only = DualWriteConfig::new(M::LegacyOnly, strategy);
            assert!(legacy_only.overall_success(true, false));
            let unified_only = DualWriteConfig::new(M::UnifiedOnly, strategy);
            assert!(!unified_only.overall_success(true, false));
        }
    }

    #[test]
    fn test_participation() {
        assert!(!DualWriteMode::UnifiedOnly.writes_legacy());
        assert!(!DualWriteMode::LegacyOnly.writes_unified());
        assert!(DualWriteMode::DualWriteUnifiedPrimary.is_dual());
        assert!(!DualWriteMode::DualWriteUnifiedPrimary.legacy_is_primary());
    }

    #[test]
    fn test_parse_and_serde() {
        assert_eq!(
            "DUAL_WRITE_UNIFIED_PRIMARY".parse::<DualWriteMode>(),
            Ok(DualWriteMode::DualWriteUnifiedPrimary)
        );
        let cfg: DualWriteConfig =
            serde_yaml::from_str("mode: unified_only\nstrategy: best_effort\n").unwrap();
        assert_eq!(cfg.mode, DualWriteMode::UnifiedOnly);
        assert_eq!(cfg.strategy, DualWriteStrategy::BestEffort);
        assert!(!cfg.rolls_back_on_partial_failure());
    }
}
