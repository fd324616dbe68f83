//! Per-operator session state.
//!
//! A [`Session`] is created when an operator starts working and dropped when they are
//! done. It carries the geography table loaded for the session and the log of SMS
//! attempts made during it. Nothing here is persisted or shared between sessions.

use crate::config::CoreConfig;
use crate::geography::Geography;
use crate::notifier::SendOutcome;
use crate::schema::RecordId;
use crate::ScreeningResult;
use chrono::{Local, NaiveDateTime};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// Who an alert was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecipientKind {
    Patient,
    Institution,
}

impl fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipientKind::Patient => f.write_str("Patient"),
            RecipientKind::Institution => f.write_str("Institution"),
        }
    }
}

fn minute_precision<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.format("%Y-%m-%d %H:%M").to_string())
}

/// One SMS attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmsLogEntry {
    #[serde(serialize_with = "minute_precision")]
    pub timestamp: NaiveDateTime,
    /// Empty for a case whose stored id is unreadable.
    pub case_id: Option<RecordId>,
    pub recipient: RecipientKind,
    pub phone: String,
    pub success: bool,
    pub status: String,
}

/// Ordered log of SMS attempts.
#[derive(Debug, Clone, Default)]
pub struct SmsLog {
    entries: Vec<SmsLogEntry>,
}

impl SmsLog {
    pub fn record(
        &mut self,
        case_id: Option<RecordId>,
        recipient: RecipientKind,
        phone: &str,
        outcome: &SendOutcome,
    ) -> &SmsLogEntry {
        let phone = outcome
            .phone
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| phone.trim().to_string());
        self.entries.push(SmsLogEntry {
            timestamp: Local::now().naive_local(),
            case_id,
            recipient,
            phone,
            success: outcome.success,
            status: outcome.status.clone(),
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[SmsLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the log as CSV, one row per attempt.
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> ScreeningResult<()> {
        let mut out = csv::Writer::from_writer(writer);
        for entry in &self.entries {
            out.serialize(entry)?;
        }
        out.flush().map_err(crate::ScreeningError::StoreWrite)
    }
}

/// State scoped to one operator session.
#[derive(Debug, Default)]
pub struct Session {
    geography: Geography,
    sms_log: SmsLog,
}

impl Session {
    pub fn new(geography: Geography) -> Self {
        Self {
            geography,
            sms_log: SmsLog::default(),
        }
    }

    /// Starts a session, loading the geography table named in `cfg`.
    pub fn open(cfg: &CoreConfig) -> ScreeningResult<Self> {
        Ok(Self::new(Geography::load(cfg.geography_path())?))
    }

    pub fn geography(&self) -> &Geography {
        &self.geography
    }

    pub fn sms_log(&self) -> &SmsLog {
        &self.sms_log
    }

    pub fn sms_log_mut(&mut self) -> &mut SmsLog {
        &mut self.sms_log
    }

    /// Cases with at least one successful SMS in this session.
    pub fn notified_case_ids(&self) -> BTreeSet<RecordId> {
        self.sms_log
            .entries
            .iter()
            .filter(|e| e.success)
            .filter_map(|e| e.case_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tamiz_types::PhoneNumber;

    fn outcome(success: bool) -> SendOutcome {
        SendOutcome {
            success,
            status: if success { "Sent — SID: SM1" } else { "Transport error: x" }.into(),
            phone: Some(PhoneNumber::normalise("3001234567", "+57").unwrap()),
        }
    }

    #[test]
    fn records_normalised_phone() {
        let mut log = SmsLog::default();
        let entry = log.record(Some(RecordId::new(3)), RecipientKind::Patient, "3001234567", &outcome(true));
        assert_eq!(entry.phone, "+573001234567");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn falls_back_to_raw_phone_when_unnormalised() {
        let mut log = SmsLog::default();
        let failed = SendOutcome {
            success: false,
            status: "Empty phone number".into(),
            phone: None,
        };
        let entry = log.record(Some(RecordId::new(3)), RecipientKind::Institution, " ", &failed);
        assert_eq!(entry.phone, "");
    }

    #[test]
    fn only_successful_sends_count_as_notified() {
        let mut session = Session::default();
        session
            .sms_log_mut()
            .record(Some(RecordId::new(1)), RecipientKind::Patient, "1", &outcome(true));
        session
            .sms_log_mut()
            .record(Some(RecordId::new(2)), RecipientKind::Patient, "1", &outcome(false));
        let ids: Vec<u64> = session.notified_case_ids().into_iter().map(RecordId::get).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn exports_log_as_csv() {
        let mut log = SmsLog::default();
        log.record(Some(RecordId::new(7)), RecipientKind::Patient, "1", &outcome(true));

        let mut out = Vec::new();
        log.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp,case_id,recipient,phone,success,status")
        );
        let row = lines.next().unwrap();
        assert!(row.contains(",7,Patient,+573001234567,true,Sent — SID: SM1"));
        assert_eq!(row.split(',').next().unwrap().len(), "2024-01-01 10:00".len());
    }
}
