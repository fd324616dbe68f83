//! Operator workflows.
//!
//! Two actions change data: registering a new screening card and attaching lab results
//! to an existing one. Both validate every field first and report all failures together
//! as [`ScreeningError::Validation`], so the operator can fix a submission in one pass.

use crate::alerts::{AlertPlan, Notification};
use crate::classifier::{self, ScreeningStatus};
use crate::config::CoreConfig;
use crate::constants::ABSENT_PLACEHOLDER;
use crate::notifier::Notifier;
use crate::schema::{Field, FieldValue, RecordId, SampleType, ScreeningRecord, StoredToken};
use crate::session::Session;
use crate::store::{CsvRecordStore, StoredRecord};
use crate::validation::{
    check_birth_date, validate_date, validate_required, validate_tsh, validate_weight,
    ValidationError, ValidationErrors,
};
use crate::{ScreeningError, ScreeningResult};
use chrono::NaiveDate;
use std::sync::Arc;

/// Raw input for a new screening card, as typed by the operator.
#[derive(Debug, Clone, Default)]
pub struct NewCardForm {
    pub ficha: String,
    pub ingestion_date: String,
    pub institution: String,
    pub insurer: String,
    pub clinical_history: String,
    pub document_type: String,
    pub document_number: String,
    pub department: String,
    pub municipality: String,
    pub phone_1: String,
    pub phone_2: String,
    pub address: String,
    pub surname_1: String,
    pub surname_2: String,
    pub newborn_name: String,
    pub birth_date: String,
    pub weight: String,
    pub sex: String,
    pub premature: bool,
    pub transfused: bool,
    pub information_complete: bool,
    pub sample_adequate: bool,
    pub affiliation_type: String,
    pub sample_type: String,
    pub sample_destination: String,
    pub sample_collected_on: String,
    pub sample_rejected: bool,
    pub rejected_collected_on: String,
}

/// A stored card plus any non-blocking warnings raised while validating it.
#[derive(Debug, Clone)]
pub struct RegisteredCard {
    pub record: ScreeningRecord,
    pub warnings: Vec<String>,
}

/// Raw second-sample input. Only read when the first result calls for it.
#[derive(Debug, Clone, Default)]
pub struct SecondSampleForm {
    pub ficha: String,
    pub sample_type: String,
    pub collected_on: String,
    pub result_date: String,
    pub tsh: String,
}

/// Raw lab results for an existing card.
#[derive(Debug, Clone, Default)]
pub struct LabResultsForm {
    pub result_date: String,
    pub tsh: String,
    pub second: SecondSampleForm,
}

/// What happened when lab results were saved.
#[derive(Debug, Clone)]
pub struct LabOutcome {
    pub record: ScreeningRecord,
    pub status: ScreeningStatus,
    pub notifications: Vec<Notification>,
}

fn select<T: StoredToken>(text: &str, label: &str) -> Result<T, ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::new(label, format!("{label} is required")));
    }
    T::parse_token(text).ok_or_else(|| {
        ValidationError::new(label, format!("{label}: unknown option '{}'", text.trim()))
    })
}

fn or_placeholder(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        ABSENT_PLACEHOLDER.to_string()
    } else {
        text.to_string()
    }
}

/// Screening operations over one record store.
pub struct ScreeningService {
    cfg: Arc<CoreConfig>,
    store: CsvRecordStore,
    notifier: Notifier,
}

impl ScreeningService {
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        let notifier = Notifier::new(&cfg);
        Self::with_notifier(cfg, notifier)
    }

    /// Service with an explicit notifier, e.g. one backed by a different transport.
    pub fn with_notifier(cfg: Arc<CoreConfig>, notifier: Notifier) -> Self {
        let store = CsvRecordStore::open(cfg.records_path());
        Self {
            cfg,
            store,
            notifier,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn store(&self) -> &CsvRecordStore {
        &self.store
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Looks a card up by ficha.
    ///
    /// # Errors
    ///
    /// [`ScreeningError::FichaNotFound`] if no card has that ficha.
    pub fn find(&self, ficha: &str) -> ScreeningResult<StoredRecord> {
        self.store
            .find_by_ficha(ficha)?
            .ok_or_else(|| ScreeningError::FichaNotFound(ficha.trim().to_string()))
    }

    /// The live "requires second sample" hint for a typed first-sample TSH.
    pub fn second_sample_required(&self, tsh_text: &str) -> bool {
        classifier::second_sample_required(tsh_text)
    }

    /// Validates and stores a new screening card.
    ///
    /// # Arguments
    ///
    /// * `form` - Raw operator input.
    /// * `today` - Reference date for the stale birth date warning.
    /// * `session` - Supplies the geography table used to resolve department and
    ///   municipality names. An empty table skips that check.
    ///
    /// # Returns
    ///
    /// The stored record and any warnings.
    ///
    /// # Errors
    ///
    /// - [`ScreeningError::Validation`] with every field failure, including a duplicate ficha.
    /// - [`ScreeningError::DuplicateFicha`] if another card with the ficha was stored concurrently.
    /// - Storage errors if the card could not be written.
    pub fn register_card(
        &self,
        form: &NewCardForm,
        today: NaiveDate,
        session: &Session,
    ) -> ScreeningResult<RegisteredCard> {
        let mut errors = ValidationErrors::new();
        let mut warnings = Vec::new();

        let ficha = errors.collect(validate_required(&form.ficha, "Ficha number"));
        let institution = errors.collect(validate_required(&form.institution, "Institution"));
        let insurer = errors.collect(validate_required(&form.insurer, "ARS"));
        let document_number =
            errors.collect(validate_required(&form.document_number, "Document number"));
        let surname_1 = errors.collect(validate_required(&form.surname_1, "First surname"));
        let newborn_name = errors.collect(validate_required(&form.newborn_name, "Newborn name"));

        let document_type = errors.collect(select(&form.document_type, "Document type"));
        let sex = errors.collect(select(&form.sex, "Sex"));
        let affiliation_type = errors.collect(select(&form.affiliation_type, "Affiliation type"));
        let sample_type = errors.collect(select(&form.sample_type, "Sample type"));
        let sample_destination =
            errors.collect(select(&form.sample_destination, "Sample destination"));

        let department = errors.collect(validate_required(&form.department, "Department"));
        let municipality = errors.collect(validate_required(&form.municipality, "Municipality"));
        let geography = session.geography();
        if !geography.is_empty() {
            if let Some(department) = &department {
                match geography.department_code(department.as_str()) {
                    None => errors.push(ValidationError::new(
                        "Department",
                        format!("Department: unknown department '{department}'"),
                    )),
                    Some(code) => {
                        if let Some(municipality) = &municipality {
                            if geography
                                .municipality_code(code, municipality.as_str())
                                .is_none()
                            {
                                errors.push(ValidationError::new(
                                    "Municipality",
                                    format!(
                                        "Municipality: '{municipality}' is not in {department}"
                                    ),
                                ));
                            }
                        }
                    }
                }
            }
        }

        let ingestion_date = errors.collect(validate_date(&form.ingestion_date, "Ingestion date"));
        let birth_date = errors.collect(validate_date(&form.birth_date, "Birth date"));
        let sample_collected_on =
            errors.collect(validate_date(&form.sample_collected_on, "Sample collection date"));
        let rejected_collected_on = if form.rejected_collected_on.trim().is_empty() {
            None
        } else {
            errors.collect(validate_date(
                &form.rejected_collected_on,
                "Rejected sample collection date",
            ))
        };

        if let (Some(birth), Some(ingestion)) = (birth_date, ingestion_date) {
            let check = check_birth_date(birth, ingestion, today);
            if let Some(error) = check.error {
                errors.push(error);
            }
            warnings.extend(check.warning);
        }

        let weight = errors.collect(validate_weight(&form.weight));

        if let Some(ficha) = &ficha {
            if self.store.find_by_ficha(ficha.as_str())?.is_some() {
                errors.push(ValidationError::new(
                    "Ficha number",
                    format!("A record with ficha {ficha} already exists; load its results instead"),
                ));
            }
        }

        if !errors.is_empty() {
            return Err(ScreeningError::Validation(errors));
        }

        // Every value below was collected without error, so each Option is Some.
        let (Some(ficha), Some(institution), Some(insurer), Some(document_number)) =
            (ficha, institution, insurer, document_number)
        else {
            return Err(ScreeningError::InvalidInput("incomplete card".into()));
        };
        let (Some(surname_1), Some(newborn_name), Some(department), Some(municipality)) =
            (surname_1, newborn_name, department, municipality)
        else {
            return Err(ScreeningError::InvalidInput("incomplete card".into()));
        };

        let id = self.store.next_id()?;
        let mut record = ScreeningRecord::blank(id, ficha.as_str());
        record.ingestion_date = ingestion_date;
        record.institution = institution.into_inner();
        record.insurer = insurer.into_inner();
        record.clinical_history = form.clinical_history.trim().to_string();
        record.document_type = document_type;
        record.document_number = document_number.into_inner();
        record.city = municipality.into_inner();
        record.department = department.into_inner();
        record.phone_1 = or_placeholder(&form.phone_1);
        record.phone_2 = or_placeholder(&form.phone_2);
        record.address = form.address.trim().to_string();
        record.surname_1 = surname_1.into_inner();
        record.surname_2 = form.surname_2.trim().to_string();
        record.newborn_name = newborn_name.into_inner();
        record.birth_date = birth_date;
        record.weight_grams = weight;
        record.sex = sex;
        record.premature = form.premature;
        record.transfused = form.transfused;
        record.information_complete = form.information_complete;
        record.sample_adequate = form.sample_adequate;
        record.sample_destination = sample_destination;
        record.sample_type = sample_type;
        record.sample_collected_on = sample_collected_on;
        record.sample_rejected = form.sample_rejected;
        record.rejected_collected_on = rejected_collected_on;
        record.affiliation_type = affiliation_type;
        record.counter = Some(0);

        self.store.create(&record)?;
        tracing::info!(%id, ficha = %record.ficha_id, warnings = warnings.len(), "registered screening card");

        Ok(RegisteredCard { record, warnings })
    }

    /// Saves lab results for the card with `ficha` and alerts on a confirmed case.
    ///
    /// Second-sample fields are required, and written, only when the first result is at
    /// or above the cutoff. The update is applied against the version of the row read at
    /// lookup, so an edit made in between is reported instead of overwritten.
    ///
    /// # Errors
    ///
    /// - [`ScreeningError::FichaNotFound`] if no card has that ficha.
    /// - [`ScreeningError::Validation`] with every field failure.
    /// - [`ScreeningError::VersionConflict`] if the card changed since it was looked up.
    /// - Storage errors if the update could not be written.
    pub fn attach_lab_results(
        &self,
        ficha: &str,
        form: &LabResultsForm,
        plan: &AlertPlan,
        session: &mut Session,
    ) -> ScreeningResult<LabOutcome> {
        let stored = self.find(ficha)?;
        let id = stored.record.id.ok_or_else(|| {
            ScreeningError::InvalidInput(format!(
                "card with ficha '{}' has no numeric id and cannot be updated",
                stored.record.ficha_id
            ))
        })?;

        let mut errors = ValidationErrors::new();
        let result_date = errors.collect(validate_date(&form.result_date, "Result date"));
        let tsh = errors.collect(validate_tsh(&form.tsh, "TSH 1"));

        let needs_second = classifier::second_sample_required(&form.tsh);
        let mut second = None;
        if needs_second {
            let s = &form.second;
            let tsh_2 = errors.collect(validate_tsh(&s.tsh, "TSH 2"));
            let sample_type = errors.collect(select::<SampleType>(&s.sample_type, "Sample type 2"));
            let collected_on =
                errors.collect(validate_date(&s.collected_on, "Sample 2 collection date"));
            let result_date_2 = errors.collect(validate_date(&s.result_date, "Sample 2 result date"));
            second = Some((tsh_2, sample_type, collected_on, result_date_2));
        }

        if !errors.is_empty() {
            return Err(ScreeningError::Validation(errors));
        }

        let (Some(result_date), Some(tsh)) = (result_date, tsh) else {
            return Err(ScreeningError::InvalidInput("incomplete lab results".into()));
        };

        let mut values = vec![
            (Field::ResultDate, FieldValue::Date(result_date)),
            (Field::TshNeonatal, FieldValue::Number(tsh)),
        ];
        if let Some((Some(tsh_2), Some(sample_type), Some(collected_on), Some(result_date_2))) =
            second
        {
            values.extend([
                (
                    Field::FichaId2,
                    FieldValue::Text(or_placeholder(&form.second.ficha)),
                ),
                (
                    Field::SampleType2,
                    FieldValue::Text(sample_type.token().to_string()),
                ),
                (Field::SampleCollectedOn2, FieldValue::Date(collected_on)),
                (Field::ResultDate2, FieldValue::Date(result_date_2)),
                (Field::TshSecond, FieldValue::Number(tsh_2)),
                (Field::Counter, FieldValue::Integer(1)),
            ]);
        }

        self.store
            .update_fields_checked(id, &values, &stored.version)?;

        let record = self.reload(id)?;
        let status = classifier::classify(&record);
        tracing::info!(%id, %status, "attached lab results");

        let notifications = if status == ScreeningStatus::ConfirmedPositive {
            plan.dispatch(&self.notifier, session, &record)
        } else {
            Vec::new()
        };

        Ok(LabOutcome {
            record,
            status,
            notifications,
        })
    }

    fn reload(&self, id: RecordId) -> ScreeningResult<ScreeningRecord> {
        self.store
            .get(id)?
            .map(|stored| stored.record)
            .ok_or(ScreeningError::RecordNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geography::Geography;
    use crate::schema::Sex;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> ScreeningService {
        let cfg = CoreConfig::new(
            dir.path().join("registros.csv"),
            PathBuf::from("municipios.csv"),
            "+57".into(),
            None,
        )
        .unwrap();
        ScreeningService::new(Arc::new(cfg))
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn card(ficha: &str) -> NewCardForm {
        NewCardForm {
            ficha: ficha.into(),
            ingestion_date: "01/03/2024".into(),
            institution: "HOSPITAL VICTORIA".into(),
            insurer: "MEDIMAS".into(),
            document_type: "RC".into(),
            document_number: "1020304050".into(),
            department: "CUNDINAMARCA".into(),
            municipality: "SOACHA".into(),
            phone_1: "3130000000".into(),
            surname_1: "PEREZ".into(),
            newborn_name: "HIJO DE ANA".into(),
            birth_date: "2024-02-27".into(),
            weight: "2890".into(),
            sex: "femenino".into(),
            affiliation_type: "SUBSIDIADO".into(),
            sample_type: "CORDON".into(),
            sample_destination: "ACEPTADA".into(),
            sample_collected_on: "28-Feb-24".into(),
            ..NewCardForm::default()
        }
    }

    fn geography() -> Geography {
        Geography::from_reader(
            "cod_departamento,nombre_departamento,cod_municipio,nombre_municipio\n\
             25,CUNDINAMARCA,25754,SOACHA\n"
                .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn registers_card_with_defaults() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let session = Session::new(geography());

        let card = svc.register_card(&card("369980"), today(), &session).unwrap();
        assert_eq!(card.record.id, Some(RecordId::new(1)));
        assert!(card.warnings.is_empty());
        assert_eq!(card.record.phone_2, "0");
        assert_eq!(card.record.counter, Some(0));
        assert_eq!(card.record.sex, Some(Sex::Female));
        assert_eq!(card.record.tsh_neonatal, None);
        assert_eq!(card.record.sample_collected_on, NaiveDate::from_ymd_opt(2024, 2, 28));

        let found = svc.find("369980").unwrap();
        assert_eq!(found.record, card.record);
    }

    #[test]
    fn collects_every_validation_error() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let mut form = card("1");
        form.institution = " ".into();
        form.sex = "Seleccionar...".into();
        form.weight = "90000".into();
        form.birth_date = "2024-03-05".into();

        let err = svc
            .register_card(&form, today(), &Session::default())
            .unwrap_err();
        let ScreeningError::Validation(errors) = err else {
            panic!("expected validation errors, got {err:?}");
        };
        let messages = errors.messages();
        assert_eq!(errors.len(), 4, "{messages:?}");
        assert!(messages.contains(&"Institution is required".to_string()));
        assert!(messages.contains(&"Birth date cannot be after the ingestion date".to_string()));
        assert!(messages.iter().any(|m| m.starts_with("Weight impossible")));
        assert!(messages.iter().any(|m| m.starts_with("Sex: unknown option")));
        assert!(!svc.store().path().exists());
    }

    #[test]
    fn old_birth_date_is_only_a_warning() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let mut form = card("1");
        form.birth_date = "2022-01-01".into();
        form.ingestion_date = "2024-03-01".into();
        let card = svc
            .register_card(&form, today(), &Session::default())
            .unwrap();
        assert_eq!(card.warnings.len(), 1);
    }

    #[test]
    fn duplicate_ficha_is_a_validation_error() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        svc.register_card(&card("77"), today(), &Session::default())
            .unwrap();
        let err = svc
            .register_card(&card(" 77 "), today(), &Session::default())
            .unwrap_err();
        assert!(matches!(err, ScreeningError::Validation(e) if e.len() == 1));
    }

    #[test]
    fn unknown_municipality_is_rejected_when_geography_loaded() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let mut form = card("1");
        form.municipality = "CHIA".into();
        let err = svc
            .register_card(&form, today(), &Session::new(geography()))
            .unwrap_err();
        assert!(matches!(err, ScreeningError::Validation(_)));

        // Without a geography table the name is accepted as typed.
        svc.register_card(&form, today(), &Session::default())
            .unwrap();
    }

    #[test]
    fn normal_result_needs_no_second_sample() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let mut session = Session::default();
        svc.register_card(&card("5"), today(), &session).unwrap();

        let form = LabResultsForm {
            result_date: "2024-03-05".into(),
            tsh: "7,2".into(),
            ..LabResultsForm::default()
        };
        let outcome = svc
            .attach_lab_results("5", &form, &AlertPlan::none(), &mut session)
            .unwrap();
        assert_eq!(outcome.status, ScreeningStatus::Normal);
        assert_eq!(outcome.record.tsh_neonatal, Some(7.2));
        assert_eq!(outcome.record.counter, Some(0));
    }

    #[test]
    fn high_first_result_requires_second_sample_fields() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let mut session = Session::default();
        svc.register_card(&card("5"), today(), &session).unwrap();

        let form = LabResultsForm {
            result_date: "2024-03-05".into(),
            tsh: "18".into(),
            ..LabResultsForm::default()
        };
        let err = svc
            .attach_lab_results("5", &form, &AlertPlan::none(), &mut session)
            .unwrap_err();
        let ScreeningError::Validation(errors) = err else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 4);
        assert_eq!(svc.find("5").unwrap().record.tsh_neonatal, None);
    }

    #[test]
    fn second_sample_is_written_with_counter() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let mut session = Session::default();
        svc.register_card(&card("5"), today(), &session).unwrap();

        let form = LabResultsForm {
            result_date: "2024-03-05".into(),
            tsh: "18".into(),
            second: SecondSampleForm {
                sample_type: "TALON".into(),
                collected_on: "2024-03-06".into(),
                result_date: "2024-03-08".into(),
                tsh: "9".into(),
                ..SecondSampleForm::default()
            },
        };
        let outcome = svc
            .attach_lab_results("5", &form, &AlertPlan::none(), &mut session)
            .unwrap();
        assert_eq!(outcome.status, ScreeningStatus::ConfirmedNegative);
        assert_eq!(outcome.record.ficha_id_2, "0");
        assert_eq!(outcome.record.sample_type_2, Some(SampleType::Heel));
        assert_eq!(outcome.record.counter, Some(1));
        assert!(outcome.notifications.is_empty());
    }

    #[test]
    fn unknown_ficha_is_not_found() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let err = svc
            .attach_lab_results(
                "404",
                &LabResultsForm::default(),
                &AlertPlan::none(),
                &mut Session::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ScreeningError::FichaNotFound(f) if f == "404"));
    }

    #[test]
    fn card_with_unreadable_id_is_found_but_not_updated() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let content = "id,ficha_id,tsh_neonatal\nabc,55,\n";
        std::fs::write(svc.store().path(), content).unwrap();

        assert_eq!(svc.find("55").unwrap().record.id, None);
        let form = LabResultsForm {
            result_date: "2024-03-05".into(),
            tsh: "4".into(),
            ..LabResultsForm::default()
        };
        let err = svc
            .attach_lab_results("55", &form, &AlertPlan::none(), &mut Session::default())
            .unwrap_err();
        assert!(matches!(err, ScreeningError::InvalidInput(_)));
        assert_eq!(std::fs::read_to_string(svc.store().path()).unwrap(), content);
    }

    #[test]
    fn live_hint_matches_cutoff() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert!(svc.second_sample_required("15,0"));
        assert!(!svc.second_sample_required("abc"));
    }
}
