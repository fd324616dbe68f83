//! Field-level input validation.
//!
//! Every validator takes raw operator text plus the label of the field it came from, and
//! returns either the typed value or a [`ValidationError`] naming the field and the violated
//! constraint. Validators never fail the surrounding operation on their own: callers run
//! all of them, collect the failures into [`ValidationErrors`], and only then decide
//! whether to accept the submission.

use crate::constants::{
    BIRTH_DATE_WARNING_DAYS, TSH_MAX, TSH_MIN, WEIGHT_MAX_GRAMS, WEIGHT_MIN_GRAMS,
};
use chrono::NaiveDate;
use std::fmt;
use tamiz_types::NonEmptyText;

/// One failed field check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    field: String,
    message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Label of the field that failed.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Operator-facing message. Always names the field.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Every failure collected while validating one submission, in check order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    /// Keeps the value of a successful check and records the error of a failed one.
    pub fn collect<T>(&mut self, result: Result<T, ValidationError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.0.push(e);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// Messages only, for display.
    pub fn messages(&self) -> Vec<String> {
        self.0.iter().map(|e| e.message.clone()).collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s): ", self.0.len())?;
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            f.write_str(&e.message)?;
        }
        Ok(())
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[derive(Clone, Copy)]
enum YearDigits {
    Two,
    Four,
}

/// One accepted input date shape.
///
/// `pattern` is always a four-digit-year chrono pattern. Two-digit years are expanded
/// before parsing so the century pivot is explicit rather than chrono's.
struct DateFormat {
    pattern: &'static str,
    separator: char,
    year_index: usize,
    year_digits: YearDigits,
}

/// Accepted date formats, in trial order. First match wins.
const DATE_FORMATS: [DateFormat; 5] = [
    // D-Mon-YY
    DateFormat {
        pattern: "%d-%b-%Y",
        separator: '-',
        year_index: 2,
        year_digits: YearDigits::Two,
    },
    // D/M/YYYY
    DateFormat {
        pattern: "%d/%m/%Y",
        separator: '/',
        year_index: 2,
        year_digits: YearDigits::Four,
    },
    // YYYY-M-D
    DateFormat {
        pattern: "%Y-%m-%d",
        separator: '-',
        year_index: 0,
        year_digits: YearDigits::Four,
    },
    // D-M-YYYY
    DateFormat {
        pattern: "%d-%m-%Y",
        separator: '-',
        year_index: 2,
        year_digits: YearDigits::Four,
    },
    // D-Mon-YYYY
    DateFormat {
        pattern: "%d-%b-%Y",
        separator: '-',
        year_index: 2,
        year_digits: YearDigits::Four,
    },
];

/// Two-digit years below this pivot belong to the 2000s, the rest to the 1900s.
const TWO_DIGIT_YEAR_PIVOT: u32 = 69;

impl DateFormat {
    fn parse(&self, text: &str) -> Option<NaiveDate> {
        let parts: Vec<&str> = text.split(self.separator).collect();
        if parts.len() != 3 {
            return None;
        }

        let year = parts[self.year_index];
        if !year.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        match self.year_digits {
            YearDigits::Four if year.len() == 4 => {
                NaiveDate::parse_from_str(text, self.pattern).ok()
            }
            YearDigits::Two if year.len() == 2 => {
                let short: u32 = year.parse().ok()?;
                let full = if short < TWO_DIGIT_YEAR_PIVOT {
                    2000 + short
                } else {
                    1900 + short
                }
                .to_string();
                let mut expanded = parts.clone();
                expanded[self.year_index] = &full;
                let joined = expanded.join(&self.separator.to_string());
                NaiveDate::parse_from_str(&joined, self.pattern).ok()
            }
            _ => None,
        }
    }
}

/// Validates a date typed by the operator.
///
/// Accepts `D-Mon-YY`, `D/M/YYYY`, `YYYY-M-D`, `D-M-YYYY` and `D-Mon-YYYY`, tried in
/// that order. Two-digit years are ambiguous; the first matching format wins and no
/// further disambiguation is attempted.
///
/// # Errors
///
/// Fails if the text is blank or matches none of the formats.
pub fn validate_date(text: &str, label: &str) -> Result<NaiveDate, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(label, format!("{label} is required")));
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| format.parse(trimmed))
        .ok_or_else(|| {
            ValidationError::new(
                label,
                format!("{label}: invalid format (e.g. 5-May-19 or 05/05/2019)"),
            )
        })
}

/// Parses a decimal number accepting either `,` or `.` as the separator.
///
/// Returns `None` for blank or non-numeric input. This is the lenient parse behind the
/// "second sample required" hint; use [`validate_tsh`] to accept a value.
pub fn parse_decimal(text: &str) -> Option<f64> {
    let normalised = text.trim().replace(',', ".");
    if normalised.is_empty() {
        return None;
    }
    normalised.parse::<f64>().ok().filter(|v| !v.is_nan())
}

fn validate_bounded(
    text: &str,
    label: &str,
    min: f64,
    max: f64,
    unit: &str,
) -> Result<f64, ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::new(label, format!("{label} is required")));
    }
    let value = parse_decimal(text)
        .ok_or_else(|| ValidationError::new(label, format!("{label} must be a number")))?;
    if value < min {
        return Err(ValidationError::new(
            label,
            format!("{label} too low (min {min} {unit})"),
        ));
    }
    if value > max {
        return Err(ValidationError::new(
            label,
            format!("{label} impossible (max {max} {unit})"),
        ));
    }
    Ok(value)
}

/// Validates a TSH result in µIU/mL. Both bounds are inclusive.
pub fn validate_tsh(text: &str, label: &str) -> Result<f64, ValidationError> {
    validate_bounded(text, label, TSH_MIN, TSH_MAX, "µIU/mL")
}

/// Validates a birth weight in grams. Both bounds are inclusive.
pub fn validate_weight(text: &str) -> Result<f64, ValidationError> {
    validate_bounded(text, "Weight", WEIGHT_MIN_GRAMS, WEIGHT_MAX_GRAMS, "g")
}

/// Requires non-blank text and returns it trimmed.
pub fn validate_required(text: &str, label: &str) -> Result<NonEmptyText, ValidationError> {
    NonEmptyText::new(text).map_err(|_| ValidationError::new(label, format!("{label} is required")))
}

/// Result of checking a birth date against the ingestion date and today.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BirthDateCheck {
    pub error: Option<ValidationError>,
    pub warning: Option<String>,
}

/// A birth date after the ingestion date is an error. One more than
/// [`BIRTH_DATE_WARNING_DAYS`] days before `today` is only a warning.
pub fn check_birth_date(birth: NaiveDate, ingestion: NaiveDate, today: NaiveDate) -> BirthDateCheck {
    let mut check = BirthDateCheck::default();
    if birth > ingestion {
        check.error = Some(ValidationError::new(
            "Birth date",
            "Birth date cannot be after the ingestion date",
        ));
    }
    if (today - birth).num_days() > BIRTH_DATE_WARNING_DAYS {
        check.warning = Some(format!(
            "Unusual birth date (more than {BIRTH_DATE_WARNING_DAYS} days ago)"
        ));
    }
    check
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_is_required() {
        let err = validate_date("   ", "Birth date").unwrap_err();
        assert_eq!(err.message(), "Birth date is required");
        assert_eq!(err.field(), "Birth date");
    }

    #[test]
    fn date_accepts_every_format() {
        assert_eq!(validate_date("5-May-19", "d").unwrap(), ymd(2019, 5, 5));
        assert_eq!(validate_date("05/05/2019", "d").unwrap(), ymd(2019, 5, 5));
        assert_eq!(validate_date("2019-5-5", "d").unwrap(), ymd(2019, 5, 5));
        assert_eq!(validate_date("5-5-2019", "d").unwrap(), ymd(2019, 5, 5));
        assert_eq!(validate_date("5-May-2019", "d").unwrap(), ymd(2019, 5, 5));
    }

    #[test]
    fn date_trims_input() {
        assert_eq!(validate_date(" 2024-01-31 ", "d").unwrap(), ymd(2024, 1, 31));
    }

    #[test]
    fn two_digit_year_pivot() {
        assert_eq!(validate_date("1-Jan-68", "d").unwrap(), ymd(2068, 1, 1));
        assert_eq!(validate_date("1-Jan-69", "d").unwrap(), ymd(1969, 1, 1));
    }

    #[test]
    fn two_digit_year_only_in_month_name_format() {
        let err = validate_date("05/05/19", "Ingestion date").unwrap_err();
        assert_eq!(
            err.message(),
            "Ingestion date: invalid format (e.g. 5-May-19 or 05/05/2019)"
        );
        assert!(validate_date("05-05-19", "d").is_err());
    }

    #[test]
    fn date_rejects_impossible_day() {
        assert!(validate_date("31/02/2020", "d").is_err());
        assert!(validate_date("2020-13-01", "d").is_err());
    }

    #[test]
    fn tsh_messages() {
        assert_eq!(validate_tsh("", "TSH 1").unwrap_err().message(), "TSH 1 is required");
        assert_eq!(
            validate_tsh("abc", "TSH 1").unwrap_err().message(),
            "TSH 1 must be a number"
        );
        assert_eq!(
            validate_tsh("0.05", "TSH 1").unwrap_err().message(),
            "TSH 1 too low (min 0.1 µIU/mL)"
        );
        assert_eq!(
            validate_tsh("300.5", "TSH 1").unwrap_err().message(),
            "TSH 1 impossible (max 300 µIU/mL)"
        );
    }

    #[test]
    fn tsh_bounds_are_inclusive() {
        assert_eq!(validate_tsh("0.1", "TSH").unwrap(), 0.1);
        assert_eq!(validate_tsh("300", "TSH").unwrap(), 300.0);
        assert_eq!(validate_tsh("300,0", "TSH").unwrap(), 300.0);
    }

    #[test]
    fn tsh_comma_and_dot_are_equal() {
        assert_eq!(validate_tsh("7,2", "TSH").unwrap(), validate_tsh("7.2", "TSH").unwrap());
    }

    #[test]
    fn tsh_rejects_nan() {
        assert!(validate_tsh("NaN", "TSH").is_err());
    }

    #[test]
    fn weight_bounds() {
        assert_eq!(validate_weight("400").unwrap(), 400.0);
        assert_eq!(validate_weight("8000").unwrap(), 8000.0);
        assert_eq!(
            validate_weight("399,9").unwrap_err().message(),
            "Weight too low (min 400 g)"
        );
        assert_eq!(
            validate_weight("8000.1").unwrap_err().message(),
            "Weight impossible (max 8000 g)"
        );
        assert_eq!(validate_weight(" ").unwrap_err().message(), "Weight is required");
    }

    #[test]
    fn required_text() {
        assert_eq!(validate_required(" X ", "Institution").unwrap().as_str(), "X");
        assert_eq!(
            validate_required("", "Institution").unwrap_err().message(),
            "Institution is required"
        );
    }

    #[test]
    fn birth_after_ingestion_is_error() {
        let check = check_birth_date(ymd(2024, 3, 2), ymd(2024, 3, 1), ymd(2024, 3, 5));
        assert!(check.error.is_some());
        assert!(check.warning.is_none());
    }

    #[test]
    fn old_birth_date_is_only_a_warning() {
        let check = check_birth_date(ymd(2022, 1, 1), ymd(2024, 3, 1), ymd(2024, 3, 5));
        assert!(check.error.is_none());
        assert!(check.warning.is_some());

        let check = check_birth_date(ymd(2023, 3, 6), ymd(2024, 3, 1), ymd(2024, 3, 5));
        assert!(check.warning.is_none(), "exactly 365 days is not flagged");
    }

    #[test]
    fn collector_keeps_order() {
        let mut errors = ValidationErrors::new();
        assert_eq!(errors.collect(validate_tsh("5", "TSH 1")), Some(5.0));
        assert_eq!(errors.collect(validate_tsh("", "TSH 1")), None);
        assert_eq!(errors.collect(validate_weight("x")), None);
        assert_eq!(
            errors.messages(),
            vec!["TSH 1 is required".to_string(), "Weight must be a number".to_string()]
        );
    }

    proptest! {
        #[test]
        fn tsh_in_range_is_accepted(hundredths in 10u32..=30000) {
            let text = format!("{}.{:02}", hundredths / 100, hundredths % 100);
            let expected: f64 = text.parse().unwrap();
            prop_assert_eq!(validate_tsh(&text, "TSH").unwrap(), expected);
            let comma = text.replace('.', ",");
            prop_assert_eq!(validate_tsh(&comma, "TSH").unwrap(), expected);
        }

        #[test]
        fn tsh_above_range_is_rejected(value in 300.001f64..1.0e6) {
            prop_assert!(validate_tsh(&value.to_string(), "TSH").is_err());
        }

        #[test]
        fn tsh_below_range_is_rejected(value in -1.0e6f64..0.0999) {
            prop_assert!(validate_tsh(&value.to_string(), "TSH").is_err());
        }

        #[test]
        fn tsh_non_numeric_is_rejected(text in "[xqz#]{1,6}") {
            let err = validate_tsh(&text, "TSH").unwrap_err();
            prop_assert_eq!(err.message(), "TSH must be a number");
        }

        #[test]
        fn weight_in_range_is_accepted(grams in 400u32..=8000) {
            prop_assert_eq!(validate_weight(&grams.to_string()).unwrap(), f64::from(grams));
        }

        #[test]
        fn weight_out_of_range_is_rejected(grams in prop_oneof![0u32..400, 8001u32..100_000]) {
            prop_assert!(validate_weight(&grams.to_string()).is_err());
        }
    }
}
