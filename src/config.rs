//! Run configuration
//!
//! One explicit object constructed at process start and handed to the
//! reconciler. Nothing in the engine reads ambient state.

/// Tuning for transfer-pair detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// How many days apart the withdrawal and the deposit of a pair may
    /// be posted. Zero means same-day only, which is the behavior of
    /// most single-institution internal transfers.
    pub date_tolerance_days: i64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            date_tolerance_days: 0,
        }
    }
}

/// Configuration for a synchronization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Look-back window for full-history fetches on accounts the ledger
    /// does not know yet. Wide enough to mean "everything".
    pub lookback_years: i64,
    pub transfer: TransferConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_years: 100,
            transfer: TransferConfig::default(),
        }
    }
}
