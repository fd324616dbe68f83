//! Aggregate figures over the record set.
//!
//! These are the numbers behind the dashboard: screening funnel counts, the confirmation
//! rate, a month-by-month trend and incidence by group. All of them are pure functions of
//! a slice of records and apply the classifier's zero-for-absent policy.

use crate::classifier::{self, ScreeningStatus};
use crate::schema::{ScreeningRecord, StoredToken};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Screening funnel and confirmation figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScreeningSummary {
    pub screened: usize,
    pub pending: usize,
    pub normal: usize,
    pub needs_confirmation: usize,
    pub confirmed_negative: usize,
    pub confirmed_positive: usize,
    pub suspected: usize,
    pub confirmed: usize,
    /// `confirmed / suspected`, `0.0` when nothing is suspected.
    pub confirmation_rate: f64,
    /// Mean second-sample TSH over confirmed cases.
    pub mean_confirmed_tsh: Option<f64>,
    /// Distinct reporting institutions among confirmed cases.
    pub confirmed_institutions: usize,
}

impl ScreeningSummary {
    pub fn from_records(records: &[ScreeningRecord]) -> Self {
        let mut summary = Self {
            screened: records.len(),
            ..Self::default()
        };
        let mut confirmed_tsh = Vec::new();
        let mut institutions = BTreeSet::new();

        for record in records {
            match classifier::classify(record) {
                ScreeningStatus::Pending => summary.pending += 1,
                ScreeningStatus::Normal => summary.normal += 1,
                ScreeningStatus::NeedsConfirmation => summary.needs_confirmation += 1,
                ScreeningStatus::ConfirmedNegative => summary.confirmed_negative += 1,
                ScreeningStatus::ConfirmedPositive => summary.confirmed_positive += 1,
            }
            if classifier::is_suspected(record) {
                summary.suspected += 1;
            }
            if classifier::is_confirmed(record) {
                summary.confirmed += 1;
                confirmed_tsh.push(record.tsh_second.unwrap_or(0.0));
                if !record.institution.is_empty() {
                    institutions.insert(record.institution.as_str());
                }
            }
        }

        summary.confirmation_rate = classifier::confirmation_rate(summary.suspected, summary.confirmed);
        summary.mean_confirmed_tsh = (!confirmed_tsh.is_empty())
            .then(|| confirmed_tsh.iter().sum::<f64>() / confirmed_tsh.len() as f64);
        summary.confirmed_institutions = institutions.len();
        summary
    }

    /// Count of records in `status`.
    pub fn count(&self, status: ScreeningStatus) -> usize {
        match status {
            ScreeningStatus::Pending => self.pending,
            ScreeningStatus::Normal => self.normal,
            ScreeningStatus::NeedsConfirmation => self.needs_confirmation,
            ScreeningStatus::ConfirmedNegative => self.confirmed_negative,
            ScreeningStatus::ConfirmedPositive => self.confirmed_positive,
        }
    }
}

/// Suspected and confirmed cases for one birth month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyTrend {
    /// `YYYY-MM`
    pub month: String,
    pub suspected: usize,
    pub confirmed: usize,
    /// `None` when the month has no suspected cases.
    pub rate: Option<f64>,
}

/// Per birth month, oldest first. Records without a birth date are left out.
pub fn monthly_trend(records: &[ScreeningRecord]) -> Vec<MonthlyTrend> {
    let mut months: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for record in records {
        let Some(birth) = record.birth_date else {
            continue;
        };
        let entry = months.entry(birth.format("%Y-%m").to_string()).or_default();
        if classifier::is_suspected(record) {
            entry.0 += 1;
        }
        if classifier::is_confirmed(record) {
            entry.1 += 1;
        }
    }

    months
        .into_iter()
        .map(|(month, (suspected, confirmed))| MonthlyTrend {
            month,
            suspected,
            confirmed,
            rate: (suspected > 0).then(|| confirmed as f64 / suspected as f64),
        })
        .collect()
}

/// Grouping used for incidence figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidenceKey {
    SampleType,
    Sex,
}

impl IncidenceKey {
    fn group(self, record: &ScreeningRecord) -> Option<&'static str> {
        match self {
            IncidenceKey::SampleType => record.sample_type.map(StoredToken::token),
            IncidenceKey::Sex => record.sex.map(StoredToken::token),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incidence {
    pub group: String,
    pub total: usize,
    pub confirmed: usize,
    /// Confirmed cases per hundred records in the group.
    pub percent: f64,
}

/// Incidence of confirmed cases per group, ordered by group token. Records with no
/// value for the key are left out.
pub fn incidence_by(records: &[ScreeningRecord], key: IncidenceKey) -> Vec<Incidence> {
    let mut groups: BTreeMap<&'static str, (usize, usize)> = BTreeMap::new();
    for record in records {
        let Some(group) = key.group(record) else {
            continue;
        };
        let entry = groups.entry(group).or_default();
        entry.0 += 1;
        if classifier::is_confirmed(record) {
            entry.1 += 1;
        }
    }

    groups
        .into_iter()
        .map(|(group, (total, confirmed))| Incidence {
            group: group.to_string(),
            total,
            confirmed,
            percent: confirmed as f64 / total as f64 * 100.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RecordId, SampleType, Sex};
    use chrono::NaiveDate;

    fn record(id: u64, tsh1: Option<f64>, tsh2: Option<f64>) -> ScreeningRecord {
        let mut r = ScreeningRecord::blank(RecordId::new(id), id.to_string());
        r.tsh_neonatal = tsh1;
        r.tsh_second = tsh2;
        r
    }

    fn born(mut r: ScreeningRecord, y: i32, m: u32) -> ScreeningRecord {
        r.birth_date = NaiveDate::from_ymd_opt(y, m, 10);
        r
    }

    #[test]
    fn empty_record_set_is_all_zero() {
        let summary = ScreeningSummary::from_records(&[]);
        assert_eq!(summary.screened, 0);
        assert_eq!(summary.confirmation_rate, 0.0);
        assert_eq!(summary.mean_confirmed_tsh, None);
    }

    #[test]
    fn no_suspected_cases_gives_zero_rate() {
        let records = vec![record(1, Some(3.0), None), record(2, None, None)];
        let summary = ScreeningSummary::from_records(&records);
        assert_eq!(summary.suspected, 0);
        assert_eq!(summary.confirmation_rate, 0.0);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.normal, 1);
    }

    #[test]
    fn summary_counts_funnel() {
        let mut a = record(1, Some(18.0), Some(20.0));
        a.institution = "VICTORIA".into();
        let mut b = record(2, Some(30.0), Some(40.0));
        b.institution = "VICTORIA".into();
        let records = vec![
            a,
            b,
            record(3, Some(16.0), Some(9.0)),
            record(4, Some(15.0), None),
            record(5, Some(2.0), None),
            record(6, None, None),
        ];

        let summary = ScreeningSummary::from_records(&records);
        assert_eq!(summary.screened, 6);
        assert_eq!(summary.suspected, 4);
        assert_eq!(summary.confirmed, 2);
        assert_eq!(summary.confirmed_positive, 2);
        assert_eq!(summary.confirmed_negative, 1);
        assert_eq!(summary.needs_confirmation, 1);
        assert_eq!(summary.count(ScreeningStatus::Normal), 1);
        assert_eq!(summary.count(ScreeningStatus::Pending), 1);
        assert_eq!(summary.confirmation_rate, 0.5);
        assert_eq!(summary.mean_confirmed_tsh, Some(30.0));
        assert_eq!(summary.confirmed_institutions, 1);

        let by_status: usize = ScreeningStatus::ALL.iter().map(|&s| summary.count(s)).sum();
        assert_eq!(by_status, summary.screened);
    }

    #[test]
    fn trend_groups_by_birth_month() {
        let records = vec![
            born(record(1, Some(18.0), Some(20.0)), 2024, 2),
            born(record(2, Some(18.0), Some(3.0)), 2024, 2),
            born(record(3, Some(5.0), None), 2024, 1),
            record(4, Some(18.0), Some(20.0)),
        ];
        let trend = monthly_trend(&records);
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].month, "2024-01");
        assert_eq!(trend[0].rate, None);
        assert_eq!(trend[1].month, "2024-02");
        assert_eq!(trend[1].suspected, 2);
        assert_eq!(trend[1].confirmed, 1);
        assert_eq!(trend[1].rate, Some(0.5));
    }

    #[test]
    fn incidence_by_sample_type() {
        let mut a = record(1, Some(18.0), Some(20.0));
        a.sample_type = Some(SampleType::Cord);
        let mut b = record(2, Some(3.0), None);
        b.sample_type = Some(SampleType::Cord);
        let mut c = record(3, Some(3.0), None);
        c.sample_type = Some(SampleType::Heel);
        let d = record(4, Some(18.0), Some(20.0));

        let incidence = incidence_by(&[a, b, c, d], IncidenceKey::SampleType);
        assert_eq!(incidence.len(), 2);
        assert_eq!(incidence[0].group, "CORDON");
        assert_eq!(incidence[0].total, 2);
        assert_eq!(incidence[0].percent, 50.0);
        assert_eq!(incidence[1].group, "TALON");
        assert_eq!(incidence[1].percent, 0.0);
    }

    #[test]
    fn incidence_by_sex() {
        let mut a = record(1, Some(18.0), Some(20.0));
        a.sex = Some(Sex::Female);
        let incidence = incidence_by(&[a], IncidenceKey::Sex);
        assert_eq!(incidence[0].group, "FEMENINO");
        assert_eq!(incidence[0].percent, 100.0);
    }
}
