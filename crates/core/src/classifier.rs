//! Two-stage TSH screening classification.
//!
//! A record's status is never stored. It is derived from the two TSH results every time a
//! record is read, so correcting a first-sample value immediately changes whether a
//! second sample is required.
//!
//! Absent values are treated as `0.0` ("not yet resulted").

use crate::constants::TSH_CUTOFF;
use crate::schema::ScreeningRecord;
use crate::validation::parse_decimal;
use serde::Serialize;
use std::fmt;

/// Where a record sits in the screening pathway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ScreeningStatus {
    /// First sample not yet resulted.
    Pending,
    /// First sample below the cutoff. Terminal.
    Normal,
    /// First sample at or above the cutoff, second sample not yet resulted.
    NeedsConfirmation,
    /// Second sample below the cutoff. Terminal.
    ConfirmedNegative,
    /// Second sample at or above the cutoff. Terminal; triggers alerts.
    ConfirmedPositive,
}

impl ScreeningStatus {
    pub const ALL: [ScreeningStatus; 5] = [
        ScreeningStatus::Pending,
        ScreeningStatus::Normal,
        ScreeningStatus::NeedsConfirmation,
        ScreeningStatus::ConfirmedNegative,
        ScreeningStatus::ConfirmedPositive,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ScreeningStatus::Pending => "pending",
            ScreeningStatus::Normal => "normal",
            ScreeningStatus::NeedsConfirmation => "needs confirmation",
            ScreeningStatus::ConfirmedNegative => "confirmed negative",
            ScreeningStatus::ConfirmedPositive => "confirmed positive",
        }
    }
}

impl fmt::Display for ScreeningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn resulted(value: Option<f64>) -> f64 {
    value.unwrap_or(0.0)
}

/// Classifies a pair of TSH results.
///
/// # Arguments
///
/// * `tsh_neonatal` - First-sample TSH, `None` if absent or unreadable.
/// * `tsh_second` - Second-sample TSH, `None` if absent or unreadable.
pub fn classify_values(tsh_neonatal: Option<f64>, tsh_second: Option<f64>) -> ScreeningStatus {
    let first = resulted(tsh_neonatal);
    if first <= 0.0 {
        return ScreeningStatus::Pending;
    }
    if first < TSH_CUTOFF {
        return ScreeningStatus::Normal;
    }

    let second = resulted(tsh_second);
    if second <= 0.0 {
        ScreeningStatus::NeedsConfirmation
    } else if second < TSH_CUTOFF {
        ScreeningStatus::ConfirmedNegative
    } else {
        ScreeningStatus::ConfirmedPositive
    }
}

/// Current status of `record`.
pub fn classify(record: &ScreeningRecord) -> ScreeningStatus {
    classify_values(record.tsh_neonatal, record.tsh_second)
}

/// First-sample TSH at or above the cutoff.
pub fn is_suspected(record: &ScreeningRecord) -> bool {
    resulted(record.tsh_neonatal) >= TSH_CUTOFF
}

/// Suspected, and the second-sample TSH is also at or above the cutoff.
pub fn is_confirmed(record: &ScreeningRecord) -> bool {
    is_suspected(record) && resulted(record.tsh_second) >= TSH_CUTOFF
}

/// Whether a typed first-sample value calls for a second sample.
///
/// Accepts a comma or a dot as decimal separator. Anything that is not a number
/// returns `false`.
pub fn second_sample_required(tsh_text: &str) -> bool {
    parse_decimal(tsh_text.trim()).is_some_and(|v| v >= TSH_CUTOFF)
}

/// `confirmed / suspected`, or `0.0` when nothing is suspected.
pub fn confirmation_rate(suspected: usize, confirmed: usize) -> f64 {
    if suspected == 0 {
        0.0
    } else {
        confirmed as f64 / suspected as f64
    }
}
