use crate::schema::RecordId;
use crate::validation::ValidationErrors;

#[derive(Debug, thiserror::Error)]
pub enum ScreeningError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Validation(ValidationErrors),
    #[error("no record with ficha '{0}'")]
    FichaNotFound(String),
    #[error("no record with id {0}")]
    RecordNotFound(RecordId),
    #[error("a record with ficha '{0}' already exists")]
    DuplicateFicha(String),
    #[error("record {id} was modified since it was read")]
    VersionConflict { id: RecordId },
    #[error("failed to read record store: {0}")]
    StoreRead(std::io::Error),
    #[error("failed to write record store: {0}")]
    StoreWrite(std::io::Error),
    #[error("malformed record store: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to load geography table: {0}")]
    Geography(String),
}

pub type ScreeningResult<T> = std::result::Result<T, ScreeningError>;
