//! # Tamiz Core
//!
//! Core logic for congenital hypothyroidism newborn screening.
//!
//! This crate contains the domain rules and the file-backed storage behind them:
//! - Field validators and the typed screening-card schema
//! - The CSV record store (single-writer lock, per-row version stamps)
//! - Two-stage TSH classification and reporting aggregates
//! - SMS alerts for confirmed cases, simulated or through a transport
//! - The register-card and attach-lab-results workflows
//!
//! **No UI concerns**: argument parsing and printing belong in `tamiz-cli`.

pub mod alerts;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod error;
pub mod geography;
pub mod notifier;
pub mod reporting;
pub mod schema;
pub mod session;
pub mod store;
pub mod validation;
pub mod workflow;

pub use config::{CoreConfig, SmsCredentials};
pub use error::{ScreeningError, ScreeningResult};
pub use schema::{Field, FieldValue, RecordId, ScreeningRecord};
pub use store::{CsvRecordStore, RowVersion, StoredRecord};
pub use classifier::ScreeningStatus;
pub use session::Session;
pub use workflow::ScreeningService;
