//! SMS delivery.
//!
//! [`Notifier::send`] normalises the phone number and either simulates delivery (test
//! mode) or hands the message to an [`SmsTransport`]. Failures never escape as errors:
//! every call returns a [`SendOutcome`] whose status string is shown to the operator and
//! written to the session log.

use crate::config::{CoreConfig, SmsCredentials};
use crate::constants::SIMULATED_ECHO_CHARS;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tamiz_types::PhoneNumber;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";
const MISSING_CREDENTIALS: &str =
    "Missing SMS credentials (account id, auth token, sender number)";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider rejected the message (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("provider response carried no message id")]
    MissingMessageId,
}

/// Something that can deliver one text message.
pub trait SmsTransport: Send + Sync {
    /// Sends `body` to `to` and returns the provider's message identifier.
    fn send(&self, to: &PhoneNumber, body: &str) -> Result<String, TransportError>;
}

#[derive(Deserialize)]
struct MessageResource {
    sid: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResource {
    message: Option<String>,
}

/// Twilio Messages REST API.
pub struct TwilioTransport {
    client: reqwest::blocking::Client,
    credentials: SmsCredentials,
    base_url: String,
}

impl TwilioTransport {
    pub fn new(credentials: SmsCredentials) -> Result<Self, TransportError> {
        Self::with_base_url(credentials, TWILIO_API_BASE)
    }

    /// Transport against a different API root, e.g. a local mock of the provider.
    pub fn with_base_url(
        credentials: SmsCredentials,
        base_url: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            credentials,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.base_url, self.credentials.account_id
        )
    }
}

impl SmsTransport for TwilioTransport {
    fn send(&self, to: &PhoneNumber, body: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.credentials.account_id, Some(&self.credentials.auth_token))
            .form(&[
                ("To", to.as_str()),
                ("From", self.credentials.sender_number.as_str()),
                ("Body", body),
            ])
            .send()?;

        let status = response.status();
        let text = response.text()?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResource>(&text)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or(text);
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str::<MessageResource>(&text)
            .ok()
            .and_then(|m| m.sid)
            .ok_or(TransportError::MissingMessageId)
    }
}

/// Result of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub status: String,
    /// Normalised number the message went (or would have gone) to.
    pub phone: Option<PhoneNumber>,
}

impl SendOutcome {
    fn failed(status: impl Into<String>, phone: Option<PhoneNumber>) -> Self {
        Self {
            success: false,
            status: status.into(),
            phone,
        }
    }
}

/// Sends or simulates SMS alerts.
#[derive(Clone)]
pub struct Notifier {
    transport: Option<Arc<dyn SmsTransport>>,
    default_country_code: String,
}

impl Notifier {
    /// Builds a notifier from configuration.
    ///
    /// Without credentials (or if the HTTP client cannot be built) live sends report a
    /// configuration error. Simulated sends always work.
    pub fn new(cfg: &CoreConfig) -> Self {
        let transport = cfg.sms_credentials().and_then(|creds| {
            match TwilioTransport::new(creds.clone()) {
                Ok(t) => Some(Arc::new(t) as Arc<dyn SmsTransport>),
                Err(e) => {
                    tracing::warn!(error = %e, "SMS transport unavailable");
                    None
                }
            }
        });
        Self {
            transport,
            default_country_code: cfg.default_country_code().to_string(),
        }
    }

    pub fn with_transport(
        transport: Arc<dyn SmsTransport>,
        default_country_code: impl Into<String>,
    ) -> Self {
        Self {
            transport: Some(transport),
            default_country_code: default_country_code.into(),
        }
    }

    pub fn without_transport(default_country_code: impl Into<String>) -> Self {
        Self {
            transport: None,
            default_country_code: default_country_code.into(),
        }
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Sends `message` to `phone`, or simulates it when `test_mode` is set.
    ///
    /// # Returns
    ///
    /// A [`SendOutcome`]. Simulated sends always succeed and never touch the transport.
    pub fn send(&self, phone: &str, message: &str, test_mode: bool) -> SendOutcome {
        let Ok(phone) = PhoneNumber::normalise(phone, &self.default_country_code) else {
            return SendOutcome::failed("Empty phone number", None);
        };

        if test_mode {
            let echo: String = message.chars().take(SIMULATED_ECHO_CHARS).collect();
            tracing::info!(to = %phone, "simulated SMS");
            return SendOutcome {
                success: true,
                status: format!("[SIMULATED] → {phone}: {echo}..."),
                phone: Some(phone),
            };
        }

        let Some(transport) = &self.transport else {
            tracing::warn!(to = %phone, "SMS not sent: credentials missing");
            return SendOutcome::failed(MISSING_CREDENTIALS, Some(phone));
        };

        match transport.send(&phone, message) {
            Ok(sid) => {
                tracing::info!(to = %phone, %sid, "SMS sent");
                SendOutcome {
                    success: true,
                    status: format!("Sent — SID: {sid}"),
                    phone: Some(phone),
                }
            }
            Err(e) => {
                tracing::warn!(to = %phone, error = %e, "SMS failed");
                SendOutcome::failed(format!("Transport error: {e}"), Some(phone))
            }
        }
    }
}
