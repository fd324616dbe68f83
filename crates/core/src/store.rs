//! Flat-file record store.
//!
//! Screening cards live in a single CSV table whose header names the columns (see
//! [`Field`]). The store keeps the raw text of every row and only ever rewrites the cells
//! it is asked to change, so rows and cells it does not touch keep their exact bytes.
//! Columns the schema does not know about are carried through unchanged.
//!
//! ## Write discipline
//!
//! - A missing file is an empty store. `create` writes the header before the first row.
//! - `create` appends a single row.
//! - Updates are a read-modify-write of the whole table, written to a sibling temporary
//!   file and renamed into place.
//! - Every mutating operation holds the store's writer lock for its whole
//!   read-modify-write, so concurrent updates through one store are serialised.
//! - Each row has a [`RowVersion`] (SHA-256 of its cells). `update_fields_checked`
//!   refuses to write if the row changed since the caller read it, which also catches
//!   edits made by another process between lookup and save.

use crate::schema::{Field, FieldValue, RecordId, ScreeningRecord};
use crate::{ScreeningError, ScreeningResult};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Optimistic-concurrency stamp of one stored row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowVersion(String);

impl RowVersion {
    fn of(cells: &[String]) -> Self {
        let mut hasher = Sha256::new();
        for cell in cells {
            hasher.update(cell.as_bytes());
            hasher.update([0x1f]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RowVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

/// A decoded record together with the version of the row it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub record: ScreeningRecord,
    pub version: RowVersion,
}

/// Raw table contents.
struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn column_index(&self, field: Field) -> Option<usize> {
        self.header.iter().position(|h| h.trim() == field.column())
    }

    fn cell<'a>(&self, row: &'a [String], field: Field) -> &'a str {
        self.column_index(field)
            .and_then(|i| row.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }

    fn decode(&self, row: &[String]) -> ScreeningRecord {
        ScreeningRecord::decode(|field| self.cell(row, field))
    }

    fn stored(&self, row: &[String]) -> StoredRecord {
        StoredRecord {
            record: self.decode(row),
            version: RowVersion::of(row),
        }
    }

    fn row_id(&self, row: &[String]) -> Option<RecordId> {
        self.cell(row, Field::Id).parse().ok()
    }

    fn has_all_columns(&self) -> bool {
        Field::ALL.iter().all(|&f| self.column_index(f).is_some())
    }

    /// Index of `field`, appending the column (empty in every row) if it is missing.
    fn ensure_column(&mut self, field: Field) -> usize {
        if let Some(i) = self.column_index(field) {
            return i;
        }
        self.header.push(field.column().to_string());
        let width = self.header.len();
        for row in &mut self.rows {
            if row.len() < width {
                row.resize(width, String::new());
            }
        }
        width - 1
    }

    /// Cells of `record` laid out in this table's column order.
    fn layout(&self, record: &ScreeningRecord) -> Vec<String> {
        self.header
            .iter()
            .map(|h| {
                Field::from_column(h)
                    .map(|f| record.value(f).encode())
                    .unwrap_or_default()
            })
            .collect()
    }
}

/// CSV-backed store for [`ScreeningRecord`]s.
#[derive(Debug)]
pub struct CsvRecordStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvRecordStore {
    /// Opens a store at `path`. The file is not created until the first record is written.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded data is `()`, so a panic in another writer leaves nothing to repair.
        self.write_lock.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Reads the whole table. `None` if the file does not exist or has no header.
    fn load(&self) -> ScreeningResult<Option<Table>> {
        if !self.path.is_file() {
            return Ok(None);
        }

        let file = File::open(&self.path).map_err(ScreeningError::StoreRead)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let header: Vec<String> = reader
            .headers()
            .map_err(read_error)?
            .iter()
            .map(String::from)
            .collect();
        if header.iter().all(|h| h.trim().is_empty()) {
            return Ok(None);
        }

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.map_err(read_error)?;
            let mut row: Vec<String> = record.iter().map(String::from).collect();
            if row.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            if row.len() < header.len() {
                row.resize(header.len(), String::new());
            }
            rows.push(row);
        }

        tracing::debug!(path = %self.path.display(), rows = rows.len(), "loaded record table");
        Ok(Some(Table { header, rows }))
    }

    /// Rewrites the whole table atomically.
    fn save(&self, table: &Table) -> ScreeningResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(ScreeningError::StoreWrite)?;
        }

        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("records.csv");
        let tmp_path = self.path.with_file_name(format!(".{file_name}.tmp"));

        let saved = write_table(&tmp_path, table)
            .and_then(|()| fs::rename(&tmp_path, &self.path).map_err(ScreeningError::StoreWrite));
        if saved.is_err() {
            match fs::remove_file(&tmp_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    path = %tmp_path.display(),
                    error = %e,
                    "could not remove temporary record table"
                ),
            }
        }
        saved
    }

    /// Returns the identifier the next created record should use.
    ///
    /// `1` for an absent or empty table, otherwise one more than the largest id. If any id
    /// is not a number the result is `max(row_count, largest numeric id) + 1`, which never
    /// collides with an id already present.
    pub fn next_id(&self) -> ScreeningResult<RecordId> {
        let Some(table) = self.load()? else {
            return Ok(RecordId::new(1));
        };
        Ok(next_id_in(&table))
    }

    /// Appends a new record.
    ///
    /// # Errors
    ///
    /// - [`ScreeningError::DuplicateFicha`] if a row with the same trimmed ficha exists.
    /// - [`ScreeningError::InvalidInput`] if the record's id or ficha is unusable.
    /// - [`ScreeningError::StoreRead`]/[`ScreeningError::StoreWrite`]/[`ScreeningError::Csv`]
    ///   on I/O failure. Nothing is reported as saved unless the write succeeded.
    pub fn create(&self, record: &ScreeningRecord) -> ScreeningResult<()> {
        let ficha = record.ficha_id.trim();
        if ficha.is_empty() {
            return Err(ScreeningError::InvalidInput("ficha cannot be empty".into()));
        }
        let Some(id) = record.id else {
            return Err(ScreeningError::InvalidInput(
                "a new record needs a numeric id".into(),
            ));
        };

        let _guard = self.lock();

        match self.load()? {
            None => {
                let header = Field::header().into_iter().map(String::from).collect();
                let mut table = Table {
                    header,
                    rows: Vec::new(),
                };
                let row = table.layout(record);
                table.rows.push(row);
                self.save(&table)?;
            }
            Some(mut table) => {
                for row in &table.rows {
                    if table.cell(row, Field::FichaId).trim() == ficha {
                        return Err(ScreeningError::DuplicateFicha(ficha.to_string()));
                    }
                    if table.row_id(row) == Some(id) {
                        return Err(ScreeningError::InvalidInput(format!(
                            "record id {id} is already in use"
                        )));
                    }
                }

                if table.has_all_columns() {
                    self.append(&table.layout(record))?;
                } else {
                    for field in Field::ALL {
                        table.ensure_column(field);
                    }
                    let row = table.layout(record);
                    table.rows.push(row);
                    self.save(&table)?;
                }
            }
        }

        tracing::info!(%id, ficha, "created screening record");
        Ok(())
    }

    fn append(&self, row: &[String]) -> ScreeningResult<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(ScreeningError::StoreWrite)?;

        // Make sure the new row starts on its own line.
        let len = file.metadata().map_err(ScreeningError::StoreRead)?.len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1)).map_err(ScreeningError::StoreRead)?;
            file.read_exact(&mut last).map_err(ScreeningError::StoreRead)?;
            if last[0] != b'\n' {
                file.write_all(b"\n").map_err(ScreeningError::StoreWrite)?;
            }
        }

        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        writer.write_record(row).map_err(write_error)?;
        writer.flush().map_err(ScreeningError::StoreWrite)
    }

    /// Finds the first record whose trimmed ficha equals the trimmed `ficha`.
    pub fn find_by_ficha(&self, ficha: &str) -> ScreeningResult<Option<StoredRecord>> {
        let ficha = ficha.trim();
        let Some(table) = self.load()? else {
            return Ok(None);
        };
        Ok(table
            .rows
            .iter()
            .find(|row| table.cell(row, Field::FichaId).trim() == ficha)
            .map(|row| table.stored(row)))
    }

    /// Fetches a record by id.
    pub fn get(&self, id: RecordId) -> ScreeningResult<Option<StoredRecord>> {
        let Some(table) = self.load()? else {
            return Ok(None);
        };
        Ok(table
            .rows
            .iter()
            .find(|row| table.row_id(row) == Some(id))
            .map(|row| table.stored(row)))
    }

    /// Every record, in table order, including rows whose id is unreadable.
    pub fn list(&self) -> ScreeningResult<Vec<ScreeningRecord>> {
        let Some(table) = self.load()? else {
            return Ok(Vec::new());
        };
        Ok(table.rows.iter().map(|row| table.decode(row)).collect())
    }

    /// Overwrites the named fields of the row(s) with `id`, leaving everything else as is.
    ///
    /// # Errors
    ///
    /// [`ScreeningError::RecordNotFound`] if no row has `id`; the file is not touched.
    pub fn update_fields(&self, id: RecordId, values: &[(Field, FieldValue)]) -> ScreeningResult<()> {
        self.update(id, values, None).map(|_| ())
    }

    /// Like [`update_fields`](Self::update_fields), but only if the row still has version
    /// `expected`. Returns the row's new version.
    ///
    /// # Errors
    ///
    /// [`ScreeningError::VersionConflict`] if the row changed since it was read.
    pub fn update_fields_checked(
        &self,
        id: RecordId,
        values: &[(Field, FieldValue)],
        expected: &RowVersion,
    ) -> ScreeningResult<RowVersion> {
        self.update(id, values, Some(expected))
    }

    fn update(
        &self,
        id: RecordId,
        values: &[(Field, FieldValue)],
        expected: Option<&RowVersion>,
    ) -> ScreeningResult<RowVersion> {
        if values.iter().any(|(field, _)| *field == Field::Id) {
            return Err(ScreeningError::InvalidInput(
                "record id cannot be changed".into(),
            ));
        }

        let _guard = self.lock();

        let mut table = self.load()?.ok_or(ScreeningError::RecordNotFound(id))?;
        let targets: Vec<usize> = (0..table.rows.len())
            .filter(|&i| table.row_id(&table.rows[i]) == Some(id))
            .collect();
        let Some(&first) = targets.first() else {
            return Err(ScreeningError::RecordNotFound(id));
        };

        if let Some(expected) = expected {
            if RowVersion::of(&table.rows[first]) != *expected {
                tracing::warn!(%id, "rejected update of a row changed since it was read");
                return Err(ScreeningError::VersionConflict { id });
            }
        }

        for (field, value) in values {
            let column = table.ensure_column(*field);
            let encoded = value.encode();
            for &i in &targets {
                table.rows[i][column] = encoded.clone();
            }
        }

        self.save(&table)?;

        let columns: Vec<&str> = values.iter().map(|(f, _)| f.column()).collect();
        tracing::info!(%id, ?columns, "updated screening record");
        Ok(RowVersion::of(&table.rows[first]))
    }

    /// Writes the selected columns of every record matching `predicate` as CSV.
    ///
    /// Cells are copied verbatim from the store. Returns the number of rows written.
    pub fn export<W: io::Write>(
        &self,
        writer: W,
        columns: &[Field],
        predicate: impl Fn(&ScreeningRecord) -> bool,
    ) -> ScreeningResult<usize> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(columns.iter().map(|f| f.column()))?;

        let mut written = 0;
        if let Some(table) = self.load()? {
            for row in &table.rows {
                if !predicate(&table.decode(row)) {
                    continue;
                }
                out.write_record(columns.iter().map(|&f| table.cell(row, f)))?;
                written += 1;
            }
        }

        out.flush().map_err(ScreeningError::StoreWrite)?;
        Ok(written)
    }
}

fn write_table(path: &Path, table: &Table) -> ScreeningResult<()> {
    let file = File::create(path).map_err(ScreeningError::StoreWrite)?;
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
    writer.write_record(&table.header).map_err(write_error)?;
    for row in &table.rows {
        writer.write_record(row).map_err(write_error)?;
    }
    writer.flush().map_err(ScreeningError::StoreWrite)
}

/// I/O failures underneath the CSV reader are storage errors, not malformed data.
fn read_error(err: csv::Error) -> ScreeningError {
    if let csv::ErrorKind::Io(e) = err.kind() {
        return ScreeningError::StoreRead(io::Error::new(e.kind(), e.to_string()));
    }
    ScreeningError::Csv(err)
}

fn write_error(err: csv::Error) -> ScreeningError {
    if let csv::ErrorKind::Io(e) = err.kind() {
        return ScreeningError::StoreWrite(io::Error::new(e.kind(), e.to_string()));
    }
    ScreeningError::Csv(err)
}

fn next_id_in(table: &Table) -> RecordId {
    if table.rows.is_empty() {
        return RecordId::new(1);
    }

    let mut max = 0u64;
    let mut corrupt = table.column_index(Field::Id).is_none();
    for row in &table.rows {
        match table.cell(row, Field::Id).trim().parse::<u64>() {
            Ok(id) => max = max.max(id),
            Err(_) => corrupt = true,
        }
    }

    if corrupt {
        tracing::warn!("record table has non-numeric ids");
        RecordId::new(max.max(table.rows.len() as u64) + 1)
    } else {
        RecordId::new(max + 1)
    }
}
