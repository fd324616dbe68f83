//! Alerts for confirmed cases.
//!
//! Builds the default alert texts, sends one alert to one recipient and logs it, and runs
//! the bulk send over every confirmed case.

use crate::classifier;
use crate::constants::{ABSENT_PLACEHOLDER, UNKNOWN_INSURER};
use crate::notifier::{Notifier, SendOutcome};
use crate::schema::{Field, ScreeningRecord};
use crate::session::{RecipientKind, Session};
use serde::Serialize;

/// Default bulk template for patients. `{tsh}` and `{ars}` are substituted.
pub const DEFAULT_PATIENT_TEMPLATE: &str =
    "Alert: your child's newborn TSH is {tsh} µIU/mL. Contact {ars} urgently.";

/// Default bulk template for the institution. `{tsh}` and `{ars}` are substituted.
pub const DEFAULT_INSTITUTION_TEMPLATE: &str =
    "Confirmed case: TSH {tsh} µIU/mL — ARS {ars}. Follow-up required.";

/// Columns of the confirmed-case export.
pub const CONFIRMED_EXPORT_COLUMNS: [Field; 13] = [
    Field::Id,
    Field::FichaId,
    Field::Surname1,
    Field::Surname2,
    Field::City,
    Field::Department,
    Field::Sex,
    Field::BirthDate,
    Field::Weight,
    Field::TshNeonatal,
    Field::TshSecond,
    Field::Insurer,
    Field::Institution,
];

fn insurer(record: &ScreeningRecord) -> &str {
    if record.insurer.is_empty() {
        UNKNOWN_INSURER
    } else {
        &record.insurer
    }
}

fn tsh_text(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "—".to_string())
}

/// Whether a stored phone cell holds a number worth dialling.
pub fn is_usable_phone(phone: &str) -> bool {
    let phone = phone.trim();
    !phone.is_empty() && phone != ABSENT_PLACEHOLDER && !phone.eq_ignore_ascii_case("nan")
}

/// First usable stored phone of the family, if any.
pub fn patient_phone(record: &ScreeningRecord) -> Option<&str> {
    [&record.phone_1, &record.phone_2]
        .into_iter()
        .map(|p| p.trim())
        .find(|p| is_usable_phone(p))
}

/// Default alert to the family of a confirmed case.
pub fn patient_message(record: &ScreeningRecord) -> String {
    format!(
        "Alert: the newborn screening result for {} {} is POSITIVE (TSH: {} µIU/mL). \
         Contact {} urgently to start treatment.",
        record.newborn_name,
        record.surname_1,
        tsh_text(record.tsh_second),
        insurer(record),
    )
}

/// Default alert to the reporting institution.
pub fn institution_message(record: &ScreeningRecord) -> String {
    format!(
        "Confirmed case — ID {}, Ficha {}, Municipality {}, TSH: {} µIU/mL. ARS: {}. \
         Urgent follow-up required.",
        record.id_label(),
        record.ficha_id,
        record.city,
        tsh_text(record.tsh_second),
        insurer(record),
    )
}

/// Substitutes `{tsh}` (second-sample TSH) and `{ars}` in a bulk template.
pub fn render_template(template: &str, record: &ScreeningRecord) -> String {
    template
        .replace("{tsh}", &tsh_text(record.tsh_second))
        .replace("{ars}", insurer(record))
}

/// Every confirmed case, in store order.
pub fn confirmed_cases(records: &[ScreeningRecord]) -> Vec<&ScreeningRecord> {
    records.iter().filter(|r| classifier::is_confirmed(r)).collect()
}

/// One alert that was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: RecipientKind,
    pub outcome: SendOutcome,
}

/// Sends one alert about `record` and records it in the session log.
pub fn notify_case(
    notifier: &Notifier,
    session: &mut Session,
    record: &ScreeningRecord,
    recipient: RecipientKind,
    phone: &str,
    message: &str,
    test_mode: bool,
) -> Notification {
    let outcome = notifier.send(phone, message, test_mode);
    tracing::info!(
        case = %record.id_label(),
        ficha = %record.ficha_id,
        %recipient,
        success = outcome.success,
        "case alert attempted"
    );
    session
        .sms_log_mut()
        .record(record.id, recipient, phone, &outcome);
    Notification { recipient, outcome }
}

/// Recipients to alert when a case is confirmed while saving lab results.
///
/// A recipient is configured when its phone is set. Messages default to
/// [`patient_message`] and [`institution_message`].
#[derive(Debug, Clone)]
pub struct AlertPlan {
    pub patient_phone: Option<String>,
    pub patient_message: Option<String>,
    pub institution_phone: Option<String>,
    pub institution_message: Option<String>,
    pub test_mode: bool,
}

impl Default for AlertPlan {
    fn default() -> Self {
        Self {
            patient_phone: None,
            patient_message: None,
            institution_phone: None,
            institution_message: None,
            test_mode: true,
        }
    }
}

impl AlertPlan {
    /// No recipients.
    pub fn none() -> Self {
        Self::default()
    }

    fn configured(phone: &Option<String>) -> Option<&str> {
        phone.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }

    /// Alerts every configured recipient once.
    pub fn dispatch(
        &self,
        notifier: &Notifier,
        session: &mut Session,
        record: &ScreeningRecord,
    ) -> Vec<Notification> {
        let mut sent = Vec::new();
        if let Some(phone) = Self::configured(&self.patient_phone) {
            let message = self
                .patient_message
                .clone()
                .unwrap_or_else(|| patient_message(record));
            sent.push(notify_case(
                notifier,
                session,
                record,
                RecipientKind::Patient,
                phone,
                &message,
                self.test_mode,
            ));
        }
        if let Some(phone) = Self::configured(&self.institution_phone) {
            let message = self
                .institution_message
                .clone()
                .unwrap_or_else(|| institution_message(record));
            sent.push(notify_case(
                notifier,
                session,
                record,
                RecipientKind::Institution,
                phone,
                &message,
                self.test_mode,
            ));
        }
        sent
    }
}

/// Settings for the bulk send.
#[derive(Debug, Clone)]
pub struct BulkAlert {
    pub patient_template: String,
    /// One institution number used for every case. `None` sends nothing to institutions.
    pub institution_phone: Option<String>,
    pub institution_template: String,
    pub test_mode: bool,
    /// Skip cases already notified in this session. Off by default, so a rerun resends.
    pub skip_already_notified: bool,
}

impl Default for BulkAlert {
    fn default() -> Self {
        Self {
            patient_template: DEFAULT_PATIENT_TEMPLATE.to_string(),
            institution_phone: None,
            institution_template: DEFAULT_INSTITUTION_TEMPLATE.to_string(),
            test_mode: true,
            skip_already_notified: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryCount {
    pub sent: usize,
    pub failed: usize,
}

impl DeliveryCount {
    fn add(&mut self, outcome: &SendOutcome) {
        if outcome.success {
            self.sent += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Totals of one bulk run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub cases: usize,
    pub without_phone: usize,
    pub skipped_already_notified: usize,
    pub patient: DeliveryCount,
    pub institution: DeliveryCount,
}

/// Alerts every confirmed case in `records`.
///
/// Sends are sequential with no retry. A failed send is logged and the run carries on
/// with the next recipient.
pub fn notify_confirmed(
    notifier: &Notifier,
    records: &[ScreeningRecord],
    alert: &BulkAlert,
    session: &mut Session,
) -> BulkReport {
    let already = if alert.skip_already_notified {
        session.notified_case_ids()
    } else {
        Default::default()
    };
    let institution_phone = alert
        .institution_phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    let mut report = BulkReport::default();
    for record in confirmed_cases(records) {
        report.cases += 1;
        if record.id.is_some_and(|id| already.contains(&id)) {
            report.skipped_already_notified += 1;
            continue;
        }

        if is_usable_phone(&record.phone_1) {
            let message = render_template(&alert.patient_template, record);
            let n = notify_case(
                notifier,
                session,
                record,
                RecipientKind::Patient,
                record.phone_1.trim(),
                &message,
                alert.test_mode,
            );
            report.patient.add(&n.outcome);
        } else {
            report.without_phone += 1;
        }

        if let Some(phone) = institution_phone {
            let message = render_template(&alert.institution_template, record);
            let n = notify_case(
                notifier,
                session,
                record,
                RecipientKind::Institution,
                phone,
                &message,
                alert.test_mode,
            );
            report.institution.add(&n.outcome);
        }
    }

    tracing::info!(
        cases = report.cases,
        patient_sent = report.patient.sent,
        patient_failed = report.patient.failed,
        institution_sent = report.institution.sent,
        institution_failed = report.institution.failed,
        "bulk alert run finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RecordId;

    fn confirmed(id: u64, phone: &str) -> ScreeningRecord {
        let mut r = ScreeningRecord::blank(RecordId::new(id), format!("F{id}"));
        r.tsh_neonatal = Some(18.0);
        r.tsh_second = Some(20.5);
        r.phone_1 = phone.into();
        r.newborn_name = "HIJO DE ANA".into();
        r.surname_1 = "PEREZ".into();
        r.city = "SOACHA".into();
        r
    }

    fn simulated() -> Notifier {
        Notifier::without_transport("+57")
    }

    #[test]
    fn placeholder_phones_are_unusable() {
        assert!(!is_usable_phone(""));
        assert!(!is_usable_phone(" 0 "));
        assert!(!is_usable_phone("nan"));
        assert!(is_usable_phone("3001234567"));
    }

    #[test]
    fn patient_phone_falls_back_to_second() {
        let mut r = confirmed(1, "0");
        r.phone_2 = "3110000000".into();
        assert_eq!(patient_phone(&r), Some("3110000000"));
        r.phone_2 = "0".into();
        assert_eq!(patient_phone(&r), None);
    }

    #[test]
    fn default_messages_name_the_case() {
        let mut r = confirmed(4, "1");
        r.insurer = "MEDIMAS".into();
        assert_eq!(
            patient_message(&r),
            "Alert: the newborn screening result for HIJO DE ANA PEREZ is POSITIVE \
             (TSH: 20.5 µIU/mL). Contact MEDIMAS urgently to start treatment."
        );
        assert_eq!(
            institution_message(&r),
            "Confirmed case — ID 4, Ficha F4, Municipality SOACHA, TSH: 20.5 µIU/mL. \
             ARS: MEDIMAS. Urgent follow-up required."
        );
    }

    #[test]
    fn template_uses_placeholder_insurer() {
        let r = confirmed(1, "1");
        assert_eq!(
            render_template("{tsh} / {ars}", &r),
            format!("20.5 / {UNKNOWN_INSURER}")
        );
    }

    #[test]
    fn bulk_send_counts_per_class() {
        let mut normal = confirmed(3, "3001112222");
        normal.tsh_second = Some(5.0);
        let records = vec![confirmed(1, "3001234567"), confirmed(2, "0"), normal];
        let alert = BulkAlert {
            institution_phone: Some("6011234567".into()),
            ..BulkAlert::default()
        };
        let mut session = Session::default();

        let report = notify_confirmed(&simulated(), &records, &alert, &mut session);
        assert_eq!(report.cases, 2);
        assert_eq!(report.without_phone, 1);
        assert_eq!(report.patient, DeliveryCount { sent: 1, failed: 0 });
        assert_eq!(report.institution, DeliveryCount { sent: 2, failed: 0 });
        assert_eq!(session.sms_log().len(), 3);
    }

    #[test]
    fn live_bulk_without_credentials_fails_and_continues() {
        let records = vec![confirmed(1, "3001234567"), confirmed(2, "3007654321")];
        let alert = BulkAlert {
            test_mode: false,
            ..BulkAlert::default()
        };
        let mut session = Session::default();
        let report = notify_confirmed(&simulated(), &records, &alert, &mut session);
        assert_eq!(report.patient, DeliveryCount { sent: 0, failed: 2 });
        assert!(session.sms_log().entries().iter().all(|e| !e.success));
    }

    #[test]
    fn rerun_resends_unless_skipping() {
        let records = vec![confirmed(1, "3001234567")];
        let mut session = Session::default();
        let mut alert = BulkAlert::default();

        notify_confirmed(&simulated(), &records, &alert, &mut session);
        let again = notify_confirmed(&simulated(), &records, &alert, &mut session);
        assert_eq!(again.patient.sent, 1);

        alert.skip_already_notified = true;
        let skipped = notify_confirmed(&simulated(), &records, &alert, &mut session);
        assert_eq!(skipped.skipped_already_notified, 1);
        assert_eq!(skipped.patient.sent, 0);
        assert_eq!(session.sms_log().len(), 2);
    }

    #[test]
    fn case_with_unreadable_id_is_still_alerted() {
        let mut record = confirmed(1, "3001234567");
        record.id = None;
        assert!(institution_message(&record).starts_with("Confirmed case — ID ?, Ficha F1,"));

        let records = vec![record];
        let alert = BulkAlert {
            skip_already_notified: true,
            ..BulkAlert::default()
        };
        let mut session = Session::default();
        let report = notify_confirmed(&simulated(), &records, &alert, &mut session);
        assert_eq!(report.cases, 1);
        assert_eq!(report.patient.sent, 1);
        assert_eq!(session.sms_log().entries()[0].case_id, None);
    }

    #[test]
    fn plan_sends_once_per_configured_recipient() {
        let record = confirmed(1, "3001234567");
        let plan = AlertPlan {
            patient_phone: Some("3001234567".into()),
            institution_phone: Some("  ".into()),
            ..AlertPlan::default()
        };
        let mut session = Session::default();
        let sent = plan.dispatch(&simulated(), &mut session, &record);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, RecipientKind::Patient);
        assert!(sent[0].outcome.status.starts_with("[SIMULATED] → +573001234567: Alert:"));
    }
}
