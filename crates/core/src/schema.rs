//! Typed screening-card schema and its text encoding.
//!
//! The record table is a flat file in which every cell is text. That representation stops
//! here: [`ScreeningRecord`] is fully typed, [`FieldValue`] is what callers hand to the
//! store when updating a row, and the encode/decode functions in this module are the only
//! place that knows about date formats, flag tokens or number formatting.
//!
//! Decoding is lenient by design of the data source. A numeric or date cell that cannot
//! be parsed decodes as absent (and TSH values are later treated as zero), an unknown
//! enum token decodes as absent, and all of these are logged at `warn` level.

use crate::constants::{FLAG_FALSE, FLAG_TRUE};
use crate::validation::{parse_decimal, validate_date};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Auto-incrementing record identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Columns of the record table, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Id,
    FichaId,
    IngestionDate,
    Institution,
    Insurer,
    ClinicalHistory,
    DocumentType,
    DocumentNumber,
    City,
    Department,
    Phone1,
    Phone2,
    Address,
    Surname1,
    Surname2,
    NewbornName,
    BirthDate,
    Weight,
    Sex,
    Premature,
    Transfused,
    InformationComplete,
    SampleAdequate,
    SampleDestination,
    SampleType,
    SampleCollectedOn,
    ResultDate,
    TshNeonatal,
    FichaId2,
    SampleType2,
    SampleCollectedOn2,
    ResultDate2,
    TshSecond,
    Counter,
    SampleRejected,
    RejectedCollectedOn,
    AffiliationType,
    RejectedResult,
    RejectedResultDate,
}

impl Field {
    pub const ALL: [Field; 39] = [
        Field::Id,
        Field::FichaId,
        Field::IngestionDate,
        Field::Institution,
        Field::Insurer,
        Field::ClinicalHistory,
        Field::DocumentType,
        Field::DocumentNumber,
        Field::City,
        Field::Department,
        Field::Phone1,
        Field::Phone2,
        Field::Address,
        Field::Surname1,
        Field::Surname2,
        Field::NewbornName,
        Field::BirthDate,
        Field::Weight,
        Field::Sex,
        Field::Premature,
        Field::Transfused,
        Field::InformationComplete,
        Field::SampleAdequate,
        Field::SampleDestination,
        Field::SampleType,
        Field::SampleCollectedOn,
        Field::ResultDate,
        Field::TshNeonatal,
        Field::FichaId2,
        Field::SampleType2,
        Field::SampleCollectedOn2,
        Field::ResultDate2,
        Field::TshSecond,
        Field::Counter,
        Field::SampleRejected,
        Field::RejectedCollectedOn,
        Field::AffiliationType,
        Field::RejectedResult,
        Field::RejectedResultDate,
    ];

    /// Column name in the persisted table.
    pub fn column(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::FichaId => "ficha_id",
            Field::IngestionDate => "fecha_ingreso",
            Field::Institution => "institucion",
            Field::Insurer => "ars",
            Field::ClinicalHistory => "historia_clinica",
            Field::DocumentType => "tipo_documento",
            Field::DocumentNumber => "numero_documento",
            Field::City => "ciudad",
            Field::Department => "departamento",
            Field::Phone1 => "telefono_1",
            Field::Phone2 => "telefono_2",
            Field::Address => "direccion",
            Field::Surname1 => "apellido_1",
            Field::Surname2 => "apellido_2",
            Field::NewbornName => "nombre_hijo",
            Field::BirthDate => "fecha_nacimiento",
            Field::Weight => "peso",
            Field::Sex => "sexo",
            Field::Premature => "prematuro",
            Field::Transfused => "transfundido",
            Field::InformationComplete => "informacion_completa",
            Field::SampleAdequate => "muestra_adecuada",
            Field::SampleDestination => "destino_muestra",
            Field::SampleType => "tipo_muestra",
            Field::SampleCollectedOn => "fecha_toma_muestra",
            Field::ResultDate => "fecha_resultado",
            Field::TshNeonatal => "tsh_neonatal",
            Field::FichaId2 => "ficha_id_2",
            Field::SampleType2 => "tipo_muestra_2",
            Field::SampleCollectedOn2 => "fecha_toma_muestra_2",
            Field::ResultDate2 => "fecha_resultado_muestra_2",
            Field::TshSecond => "resultado_muestra_2",
            Field::Counter => "contador",
            Field::SampleRejected => "muestra_rechazada",
            Field::RejectedCollectedOn => "fecha_toma_rechazada",
            Field::AffiliationType => "tipo_vinculacion",
            Field::RejectedResult => "resultado_rechazada",
            Field::RejectedResultDate => "fecha_resultado_rechazada",
        }
    }

    /// Looks a field up by its column name.
    pub fn from_column(name: &str) -> Option<Field> {
        let name = name.trim();
        Field::ALL.iter().copied().find(|f| f.column() == name)
    }

    /// Canonical header row.
    pub fn header() -> Vec<&'static str> {
        Field::ALL.iter().map(|f| f.column()).collect()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// A typed cell value, as passed to the store for partial updates.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Integer(u64),
    Date(NaiveDate),
    Flag(bool),
    Empty,
}

impl FieldValue {
    /// Text form written to the table.
    pub fn encode(&self) -> String {
        match self {
            FieldValue::Text(s) => s.trim().to_string(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Integer(n) => n.to_string(),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Flag(true) => FLAG_TRUE.to_string(),
            FieldValue::Flag(false) => FLAG_FALSE.to_string(),
            FieldValue::Empty => String::new(),
        }
    }

    fn text(s: &str) -> Self {
        if s.trim().is_empty() {
            FieldValue::Empty
        } else {
            FieldValue::Text(s.to_string())
        }
    }

    fn opt<T>(value: Option<T>, wrap: impl FnOnce(T) -> FieldValue) -> Self {
        value.map(wrap).unwrap_or(FieldValue::Empty)
    }

    fn token<T: StoredToken>(value: Option<T>) -> Self {
        Self::opt(value, |t| FieldValue::Text(t.token().to_string()))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::text(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::text(&value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Flag(value)
    }
}

/// Enumerations persisted as fixed upper-case tokens.
pub trait StoredToken: Sized + Copy + 'static {
    const ALL: &'static [Self];

    fn token(self) -> &'static str;

    /// Case-insensitive parse of a stored or typed token.
    fn parse_token(text: &str) -> Option<Self> {
        let text = text.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.token().eq_ignore_ascii_case(text))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DocumentType {
    /// Citizenship card
    Cc,
    /// Foreigner card
    Ce,
    Passport,
    /// Civil birth registry
    Rc,
    /// Identity card (minors)
    Ti,
}

impl StoredToken for DocumentType {
    const ALL: &'static [Self] = &[
        DocumentType::Cc,
        DocumentType::Ce,
        DocumentType::Passport,
        DocumentType::Rc,
        DocumentType::Ti,
    ];

    fn token(self) -> &'static str {
        match self {
            DocumentType::Cc => "CC",
            DocumentType::Ce => "CE",
            DocumentType::Passport => "PA",
            DocumentType::Rc => "RC",
            DocumentType::Ti => "TI",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Sex {
    Male,
    Female,
    Indeterminate,
}

impl StoredToken for Sex {
    const ALL: &'static [Self] = &[Sex::Male, Sex::Female, Sex::Indeterminate];

    fn token(self) -> &'static str {
        match self {
            Sex::Male => "MASCULINO",
            Sex::Female => "FEMENINO",
            Sex::Indeterminate => "INDETERMINADO",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SampleType {
    Cord,
    Heel,
    Vein,
}

impl StoredToken for SampleType {
    const ALL: &'static [Self] = &[SampleType::Cord, SampleType::Heel, SampleType::Vein];

    fn token(self) -> &'static str {
        match self {
            SampleType::Cord => "CORDON",
            SampleType::Heel => "TALON",
            SampleType::Vein => "VENA",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SampleDestination {
    Accepted,
    Rejected,
}

impl StoredToken for SampleDestination {
    const ALL: &'static [Self] = &[SampleDestination::Accepted, SampleDestination::Rejected];

    fn token(self) -> &'static str {
        match self {
            SampleDestination::Accepted => "ACEPTADA",
            SampleDestination::Rejected => "RECHAZADA",
        }
    }
}

/// Health-system affiliation regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AffiliationType {
    Contributory,
    Subsidised,
    Linked,
    Private,
    Special,
}

impl StoredToken for AffiliationType {
    const ALL: &'static [Self] = &[
        AffiliationType::Contributory,
        AffiliationType::Subsidised,
        AffiliationType::Linked,
        AffiliationType::Private,
        AffiliationType::Special,
    ];

    fn token(self) -> &'static str {
        match self {
            AffiliationType::Contributory => "CONTRIBUTIVO",
            AffiliationType::Subsidised => "SUBSIDIADO",
            AffiliationType::Linked => "VINCULADO",
            AffiliationType::Private => "PARTICULAR",
            AffiliationType::Special => "ESPECIAL",
        }
    }
}

/// One newborn screening card.
///
/// Sample-1 and sample-2 results are empty when the card is created and are attached
/// later by a partial update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreeningRecord {
    /// `None` when the stored id cell is not a number. Such rows are still read and
    /// classified, but cannot be addressed by id.
    pub id: Option<RecordId>,
    pub ficha_id: String,
    pub ingestion_date: Option<NaiveDate>,
    pub institution: String,
    pub insurer: String,
    pub clinical_history: String,
    pub document_type: Option<DocumentType>,
    pub document_number: String,
    pub city: String,
    pub department: String,
    pub phone_1: String,
    pub phone_2: String,
    pub address: String,
    pub surname_1: String,
    pub surname_2: String,
    pub newborn_name: String,
    pub birth_date: Option<NaiveDate>,
    pub weight_grams: Option<f64>,
    pub sex: Option<Sex>,
    pub premature: bool,
    pub transfused: bool,
    pub information_complete: bool,
    pub sample_adequate: bool,
    pub sample_destination: Option<SampleDestination>,
    pub sample_type: Option<SampleType>,
    pub sample_collected_on: Option<NaiveDate>,
    pub result_date: Option<NaiveDate>,
    pub tsh_neonatal: Option<f64>,
    pub ficha_id_2: String,
    pub sample_type_2: Option<SampleType>,
    pub sample_collected_on_2: Option<NaiveDate>,
    pub result_date_2: Option<NaiveDate>,
    pub tsh_second: Option<f64>,
    pub counter: Option<u64>,
    pub sample_rejected: bool,
    pub rejected_collected_on: Option<NaiveDate>,
    pub affiliation_type: Option<AffiliationType>,
    pub rejected_result: String,
    pub rejected_result_date: Option<NaiveDate>,
}

impl ScreeningRecord {
    /// A card with only its identity set.
    pub fn blank(id: RecordId, ficha_id: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            ficha_id: ficha_id.into().trim().to_string(),
            ingestion_date: None,
            institution: String::new(),
            insurer: String::new(),
            clinical_history: String::new(),
            document_type: None,
            document_number: String::new(),
            city: String::new(),
            department: String::new(),
            phone_1: String::new(),
            phone_2: String::new(),
            address: String::new(),
            surname_1: String::new(),
            surname_2: String::new(),
            newborn_name: String::new(),
            birth_date: None,
            weight_grams: None,
            sex: None,
            premature: false,
            transfused: false,
            information_complete: false,
            sample_adequate: false,
            sample_destination: None,
            sample_type: None,
            sample_collected_on: None,
            result_date: None,
            tsh_neonatal: None,
            ficha_id_2: String::new(),
            sample_type_2: None,
            sample_collected_on_2: None,
            result_date_2: None,
            tsh_second: None,
            counter: None,
            sample_rejected: false,
            rejected_collected_on: None,
            affiliation_type: None,
            rejected_result: String::new(),
            rejected_result_date: None,
        }
    }

    /// Typed value of one column.
    pub fn value(&self, field: Field) -> FieldValue {
        match field {
            Field::Id => FieldValue::opt(self.id.map(RecordId::get), FieldValue::Integer),
            Field::FichaId => FieldValue::text(&self.ficha_id),
            Field::IngestionDate => FieldValue::opt(self.ingestion_date, FieldValue::Date),
            Field::Institution => FieldValue::text(&self.institution),
            Field::Insurer => FieldValue::text(&self.insurer),
            Field::ClinicalHistory => FieldValue::text(&self.clinical_history),
            Field::DocumentType => FieldValue::token(self.document_type),
            Field::DocumentNumber => FieldValue::text(&self.document_number),
            Field::City => FieldValue::text(&self.city),
            Field::Department => FieldValue::text(&self.department),
            Field::Phone1 => FieldValue::text(&self.phone_1),
            Field::Phone2 => FieldValue::text(&self.phone_2),
            Field::Address => FieldValue::text(&self.address),
            Field::Surname1 => FieldValue::text(&self.surname_1),
            Field::Surname2 => FieldValue::text(&self.surname_2),
            Field::NewbornName => FieldValue::text(&self.newborn_name),
            Field::BirthDate => FieldValue::opt(self.birth_date, FieldValue::Date),
            Field::Weight => FieldValue::opt(self.weight_grams, FieldValue::Number),
            Field::Sex => FieldValue::token(self.sex),
            Field::Premature => FieldValue::Flag(self.premature),
            Field::Transfused => FieldValue::Flag(self.transfused),
            Field::InformationComplete => FieldValue::Flag(self.information_complete),
            Field::SampleAdequate => FieldValue::Flag(self.sample_adequate),
            Field::SampleDestination => FieldValue::token(self.sample_destination),
            Field::SampleType => FieldValue::token(self.sample_type),
            Field::SampleCollectedOn => FieldValue::opt(self.sample_collected_on, FieldValue::Date),
            Field::ResultDate => FieldValue::opt(self.result_date, FieldValue::Date),
            Field::TshNeonatal => FieldValue::opt(self.tsh_neonatal, FieldValue::Number),
            Field::FichaId2 => FieldValue::text(&self.ficha_id_2),
            Field::SampleType2 => FieldValue::token(self.sample_type_2),
            Field::SampleCollectedOn2 => {
                FieldValue::opt(self.sample_collected_on_2, FieldValue::Date)
            }
            Field::ResultDate2 => FieldValue::opt(self.result_date_2, FieldValue::Date),
            Field::TshSecond => FieldValue::opt(self.tsh_second, FieldValue::Number),
            Field::Counter => FieldValue::opt(self.counter, FieldValue::Integer),
            Field::SampleRejected => FieldValue::Flag(self.sample_rejected),
            Field::RejectedCollectedOn => {
                FieldValue::opt(self.rejected_collected_on, FieldValue::Date)
            }
            Field::AffiliationType => FieldValue::token(self.affiliation_type),
            Field::RejectedResult => FieldValue::text(&self.rejected_result),
            Field::RejectedResultDate => {
                FieldValue::opt(self.rejected_result_date, FieldValue::Date)
            }
        }
    }

    /// Encodes every column, in canonical order.
    pub fn encode(&self) -> Vec<(Field, String)> {
        Field::ALL
            .iter()
            .map(|&field| (field, self.value(field).encode()))
            .collect()
    }

    /// Decodes a row given a cell accessor.
    ///
    /// Every row decodes. A non-numeric `id` cell leaves [`id`](Self::id) empty.
    pub fn decode<'a>(cell: impl Fn(Field) -> &'a str) -> Self {
        let id = match cell(Field::Id).parse::<RecordId>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(raw = cell(Field::Id), "row has a non-numeric id");
                None
            }
        };

        let text = |f: Field| cell(f).trim().to_string();
        let date = |f: Field| decode_date(f, cell(f));
        let number = |f: Field| decode_number(f, cell(f));
        let flag = |f: Field| decode_flag(cell(f));

        Self {
            id,
            ficha_id: text(Field::FichaId),
            ingestion_date: date(Field::IngestionDate),
            institution: text(Field::Institution),
            insurer: text(Field::Insurer),
            clinical_history: text(Field::ClinicalHistory),
            document_type: decode_token(Field::DocumentType, cell(Field::DocumentType)),
            document_number: text(Field::DocumentNumber),
            city: text(Field::City),
            department: text(Field::Department),
            phone_1: text(Field::Phone1),
            phone_2: text(Field::Phone2),
            address: text(Field::Address),
            surname_1: text(Field::Surname1),
            surname_2: text(Field::Surname2),
            newborn_name: text(Field::NewbornName),
            birth_date: date(Field::BirthDate),
            weight_grams: number(Field::Weight),
            sex: decode_token(Field::Sex, cell(Field::Sex)),
            premature: flag(Field::Premature),
            transfused: flag(Field::Transfused),
            information_complete: flag(Field::InformationComplete),
            sample_adequate: flag(Field::SampleAdequate),
            sample_destination: decode_token(
                Field::SampleDestination,
                cell(Field::SampleDestination),
            ),
            sample_type: decode_token(Field::SampleType, cell(Field::SampleType)),
            sample_collected_on: date(Field::SampleCollectedOn),
            result_date: date(Field::ResultDate),
            tsh_neonatal: number(Field::TshNeonatal),
            ficha_id_2: text(Field::FichaId2),
            sample_type_2: decode_token(Field::SampleType2, cell(Field::SampleType2)),
            sample_collected_on_2: date(Field::SampleCollectedOn2),
            result_date_2: date(Field::ResultDate2),
            tsh_second: number(Field::TshSecond),
            counter: number(Field::Counter).map(|n| n.max(0.0) as u64),
            sample_rejected: flag(Field::SampleRejected),
            rejected_collected_on: date(Field::RejectedCollectedOn),
            affiliation_type: decode_token(Field::AffiliationType, cell(Field::AffiliationType)),
            rejected_result: text(Field::RejectedResult),
            rejected_result_date: date(Field::RejectedResultDate),
        }
    }

    /// The id as text, or `?` for a row whose id cell is unreadable.
    pub fn id_label(&self) -> String {
        self.id.map_or_else(|| "?".to_string(), |id| id.to_string())
    }

    /// Full name as shown on alerts: given name then surnames.
    pub fn display_name(&self) -> String {
        [&self.newborn_name, &self.surname_1, &self.surname_2]
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn decode_date(field: Field, raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    // Timestamps such as "2024-03-01 00:00:00" keep only the date part.
    let date_part = raw.split_whitespace().next().unwrap_or(raw);
    let parsed = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .or_else(|| validate_date(date_part, field.column()).ok());
    if parsed.is_none() {
        tracing::warn!(column = field.column(), raw, "unreadable date treated as absent");
    }
    parsed
}

fn decode_number(field: Field, raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return None;
    }
    let parsed = parse_decimal(raw);
    if parsed.is_none() {
        tracing::warn!(column = field.column(), raw, "non-numeric value treated as absent");
    }
    parsed
}

fn decode_flag(raw: &str) -> bool {
    let raw = raw.trim();
    raw.eq_ignore_ascii_case(FLAG_TRUE) || raw.eq_ignore_ascii_case("true") || raw == "1"
}

fn decode_token<T: StoredToken>(field: Field, raw: &str) -> Option<T> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = T::parse_token(raw);
    if parsed.is_none() {
        tracing::warn!(column = field.column(), raw, "unknown token treated as absent");
    }
    parsed
}
