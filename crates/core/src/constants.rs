//! Constants used throughout the tamiz core crate.
//!
//! Clinical thresholds, storage tokens and default paths live here so the
//! validators, the classifier and the storage adapter agree on them.

/// Lowest TSH value accepted from the lab (µIU/mL).
pub const TSH_MIN: f64 = 0.1;

/// Highest TSH value accepted from the lab (µIU/mL).
pub const TSH_MAX: f64 = 300.0;

/// Clinical cutoff: a sample at or above this value is positive (µIU/mL).
pub const TSH_CUTOFF: f64 = 15.0;

/// Lowest plausible birth weight in grams.
pub const WEIGHT_MIN_GRAMS: f64 = 400.0;

/// Highest plausible birth weight in grams.
pub const WEIGHT_MAX_GRAMS: f64 = 8000.0;

/// Birth dates older than this many days before today raise a warning.
pub const BIRTH_DATE_WARNING_DAYS: i64 = 365;

/// Stored token for a true flag.
pub const FLAG_TRUE: &str = "VERDADERO";

/// Stored token for a false flag.
pub const FLAG_FALSE: &str = "FALSO";

/// Placeholder stored for "no phone number" and "no second ficha".
pub const ABSENT_PLACEHOLDER: &str = "0";

/// Default location of the record table when no explicit path is configured.
pub const DEFAULT_RECORDS_PATH: &str = "data/hipotiroidismo_registros.csv";

/// Default location of the municipality reference table.
pub const DEFAULT_GEOGRAPHY_PATH: &str = "data/municipios.csv";

/// Dialling prefix used when a phone number carries none.
pub const DEFAULT_COUNTRY_CODE: &str = "+57";

/// Number of message characters echoed back by a simulated send.
pub const SIMULATED_ECHO_CHARS: usize = 60;

/// Text used in messages when a record has no insurer.
pub const UNKNOWN_INSURER: &str = "your EPS";
