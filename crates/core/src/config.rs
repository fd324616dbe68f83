//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services.
//! Nothing in this crate reads environment variables while handling an operation; the
//! binary does that before building a [`CoreConfig`].

use crate::constants::{DEFAULT_COUNTRY_CODE, DEFAULT_GEOGRAPHY_PATH, DEFAULT_RECORDS_PATH};
use crate::{ScreeningError, ScreeningResult};
use std::path::{Path, PathBuf};

/// Credentials for the SMS provider.
///
/// The three values are opaque to the core. They are only handed to the transport.
#[derive(Clone)]
pub struct SmsCredentials {
    pub account_id: String,
    pub auth_token: String,
    pub sender_number: String,
}

impl SmsCredentials {
    /// Builds credentials from optional raw values.
    ///
    /// Returns `None` unless all three values are present and non-blank. Partial
    /// credentials are treated as absent so that sending reports a configuration error
    /// rather than failing against the provider.
    pub fn from_parts(
        account_id: Option<String>,
        auth_token: Option<String>,
        sender_number: Option<String>,
    ) -> Option<Self> {
        let keep = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Some(Self {
            account_id: keep(account_id)?,
            auth_token: keep(auth_token)?,
            sender_number: keep(sender_number)?,
        })
    }
}

impl std::fmt::Debug for SmsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmsCredentials")
            .field("account_id", &self.account_id)
            .field("auth_token", &"<redacted>")
            .field("sender_number", &self.sender_number)
            .finish()
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    records_path: PathBuf,
    geography_path: PathBuf,
    default_country_code: String,
    sms_credentials: Option<SmsCredentials>,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`ScreeningError::InvalidInput`] if `records_path` is empty or the country
    /// code is not `+` followed by one to three digits.
    pub fn new(
        records_path: PathBuf,
        geography_path: PathBuf,
        default_country_code: String,
        sms_credentials: Option<SmsCredentials>,
    ) -> ScreeningResult<Self> {
        if records_path.as_os_str().is_empty() {
            return Err(ScreeningError::InvalidInput(
                "records path cannot be empty".into(),
            ));
        }

        let default_country_code = default_country_code.trim().to_string();
        tamiz_types::validate_country_code(&default_country_code)
            .map_err(|e| ScreeningError::InvalidInput(e.to_string()))?;

        Ok(Self {
            records_path,
            geography_path,
            default_country_code,
            sms_credentials,
        })
    }

    /// Configuration with every default and no SMS credentials.
    pub fn with_defaults() -> Self {
        Self {
            records_path: PathBuf::from(DEFAULT_RECORDS_PATH),
            geography_path: PathBuf::from(DEFAULT_GEOGRAPHY_PATH),
            default_country_code: DEFAULT_COUNTRY_CODE.to_string(),
            sms_credentials: None,
        }
    }

    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    pub fn geography_path(&self) -> &Path {
        &self.geography_path
    }

    pub fn default_country_code(&self) -> &str {
        &self.default_country_code
    }

    pub fn sms_credentials(&self) -> Option<&SmsCredentials> {
        self.sms_credentials.as_ref()
    }
}

/// Resolve a path from an optional override value, falling back to `default`.
///
/// Blank overrides are ignored.
pub fn path_from_env_value(value: Option<String>, default: &str) -> PathBuf {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_records_path() {
        let err = CoreConfig::new(PathBuf::new(), PathBuf::from("m.csv"), "+57".into(), None)
            .expect_err("empty path should be rejected");
        assert!(matches!(err, ScreeningError::InvalidInput(_)));
    }

    #[test]
    fn rejects_bad_country_code() {
        let err = CoreConfig::new(
            PathBuf::from("r.csv"),
            PathBuf::from("m.csv"),
            "57".into(),
            None,
        )
        .expect_err("country code without plus should be rejected");
        assert!(matches!(err, ScreeningError::InvalidInput(_)));
    }

    #[test]
    fn trims_country_code() {
        let cfg = CoreConfig::new(
            PathBuf::from("r.csv"),
            PathBuf::from("m.csv"),
            " +57 ".into(),
            None,
        )
        .unwrap();
        assert_eq!(cfg.default_country_code(), "+57");
    }

    #[test]
    fn partial_credentials_are_absent() {
        assert!(SmsCredentials::from_parts(Some("AC1".into()), Some(" ".into()), Some("+1".into()))
            .is_none());
        assert!(SmsCredentials::from_parts(Some("AC1".into()), None, Some("+1".into())).is_none());
        let creds =
            SmsCredentials::from_parts(Some("AC1".into()), Some("tok".into()), Some("+1".into()))
                .unwrap();
        assert_eq!(creds.account_id, "AC1");
    }

    #[test]
    fn debug_redacts_token() {
        let creds =
            SmsCredentials::from_parts(Some("AC1".into()), Some("secret".into()), Some("+1".into()))
                .unwrap();
        assert!(!format!("{creds:?}").contains("secret"));
    }

    #[test]
    fn path_override_falls_back_on_blank() {
        assert_eq!(
            path_from_env_value(Some("  ".into()), DEFAULT_RECORDS_PATH),
            PathBuf::from(DEFAULT_RECORDS_PATH)
        );
        assert_eq!(
            path_from_env_value(Some("/tmp/x.csv".into()), DEFAULT_RECORDS_PATH),
            PathBuf::from("/tmp/x.csv")
        );
    }
}
