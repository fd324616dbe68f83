//! Department and municipality reference table.
//!
//! Backs the cascading department/municipality selection and resolves a selected name
//! back to its code. The table is read once and never written.

use crate::{ScreeningError, ScreeningResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct GeographyRow {
    cod_departamento: String,
    nombre_departamento: String,
    cod_municipio: String,
    nombre_municipio: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Department {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Municipality {
    pub code: String,
    pub name: String,
    pub department_code: String,
}

/// In-memory geography lookup.
#[derive(Debug, Clone, Default)]
pub struct Geography {
    departments: BTreeMap<String, String>,
    municipalities: Vec<Municipality>,
}

impl Geography {
    /// Loads the table from `path`.
    ///
    /// A missing file gives an empty table. Rows with a blank code or name, or that do
    /// not deserialise, are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`ScreeningError::Geography`] if the file exists but cannot be opened or
    /// has no usable header.
    pub fn load(path: &Path) -> ScreeningResult<Self> {
        if !path.is_file() {
            tracing::warn!(path = %path.display(), "geography table not found; name resolution disabled");
            return Ok(Self::default());
        }

        let file = std::fs::File::open(path).map_err(|e| ScreeningError::Geography(e.to_string()))?;
        Self::from_reader(file)
    }

    /// Builds the table from CSV text.
    pub fn from_reader<R: std::io::Read>(reader: R) -> ScreeningResult<Self> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        reader
            .headers()
            .map_err(|e| ScreeningError::Geography(e.to_string()))?;

        let mut geography = Self::default();
        for (index, result) in reader.deserialize::<GeographyRow>().enumerate() {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!(row = index + 1, error = %e, "skipping malformed geography row");
                    continue;
                }
            };
            if [
                &row.cod_departamento,
                &row.nombre_departamento,
                &row.cod_municipio,
                &row.nombre_municipio,
            ]
            .iter()
            .any(|v| v.is_empty())
            {
                tracing::warn!(row = index + 1, "skipping incomplete geography row");
                continue;
            }

            geography
                .departments
                .entry(row.cod_departamento.clone())
                .or_insert(row.nombre_departamento);
            geography.municipalities.push(Municipality {
                code: row.cod_municipio,
                name: row.nombre_municipio,
                department_code: row.cod_departamento,
            });
        }

        Ok(geography)
    }

    pub fn is_empty(&self) -> bool {
        self.departments.is_empty()
    }

    /// Unique departments sorted by name.
    pub fn departments(&self) -> Vec<Department> {
        let mut departments: Vec<Department> = self
            .departments
            .iter()
            .map(|(code, name)| Department {
                code: code.clone(),
                name: name.clone(),
            })
            .collect();
        departments.sort_by(|a, b| a.name.cmp(&b.name));
        departments
    }

    /// Municipalities of one department sorted by name.
    pub fn municipalities(&self, department_code: &str) -> Vec<&Municipality> {
        let department_code = department_code.trim();
        let mut found: Vec<&Municipality> = self
            .municipalities
            .iter()
            .filter(|m| m.department_code == department_code)
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    pub fn department_code(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        self.departments
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(code, _)| code.as_str())
    }

    pub fn department_name(&self, code: &str) -> Option<&str> {
        self.departments.get(code.trim()).map(String::as_str)
    }

    /// Code of the municipality called `name` within the given department.
    pub fn municipality_code(&self, department_code: &str, name: &str) -> Option<&str> {
        let (department_code, name) = (department_code.trim(), name.trim());
        self.municipalities
            .iter()
            .find(|m| m.department_code == department_code && m.name == name)
            .map(|m| m.code.as_str())
    }

    pub fn municipality(&self, code: &str) -> Option<&Municipality> {
        let code = code.trim();
        self.municipalities.iter().find(|m| m.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TABLE: &str = "\
cod_departamento,nombre_departamento,cod_municipio,nombre_municipio
11,BOGOTA D.C.,11001,BOGOTA D.C.
25,CUNDINAMARCA,25754,SOACHA
25,CUNDINAMARCA,25175,CHIA
05,ANTIOQUIA,05001,MEDELLIN
25,CUNDINAMARCA,,SIN CODIGO
";

    fn table() -> Geography {
        Geography::from_reader(TABLE.as_bytes()).unwrap()
    }

    #[test]
    fn departments_are_unique_and_sorted_by_name() {
        let names: Vec<String> = table().departments().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["ANTIOQUIA", "BOGOTA D.C.", "CUNDINAMARCA"]);
    }

    #[test]
    fn codes_keep_leading_zeros() {
        let geo = table();
        assert_eq!(geo.department_code("ANTIOQUIA"), Some("05"));
        assert_eq!(geo.municipality_code("05", "MEDELLIN"), Some("05001"));
        assert_eq!(geo.department_name("05"), Some("ANTIOQUIA"));
    }

    #[test]
    fn municipalities_are_filtered_by_department() {
        let geo = table();
        let names: Vec<&str> = geo.municipalities("25").iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["CHIA", "SOACHA"]);
        assert!(geo.municipalities("99").is_empty());
    }

    #[test]
    fn municipality_name_is_scoped_to_department() {
        let geo = table();
        assert_eq!(geo.municipality_code("11", "SOACHA"), None);
        assert_eq!(geo.municipality("25754").unwrap().department_code, "25");
    }

    #[test]
    fn incomplete_rows_are_skipped() {
        let geo = table();
        assert!(geo.municipalities("25").iter().all(|m| m.name != "SIN CODIGO"));
    }

    #[test]
    fn missing_file_is_empty_table() {
        let dir = TempDir::new().unwrap();
        let geo = Geography::load(&dir.path().join("municipios.csv")).unwrap();
        assert!(geo.is_empty());
        assert!(geo.departments().is_empty());
    }

    #[test]
    fn loads_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("municipios.csv");
        std::fs::write(&path, TABLE).unwrap();
        assert_eq!(Geography::load(&path).unwrap().departments().len(), 3);
    }
}
