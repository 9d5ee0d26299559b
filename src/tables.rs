use std::{collections::HashMap, fs, path::Path};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::StartupError;

/// Ordered class labels; position `i` is the label of model output `i`.
#[derive(Debug, Clone)]
pub struct ClassNames(Vec<String>);

impl ClassNames {
    pub fn new(labels: Vec<String>) -> Self {
        ClassNames(labels)
    }

    /// Loads a JSON list of strings. An empty list is rejected.
    pub fn load(path: &Path) -> Result<Self, StartupError> {
        let labels: Vec<String> = read_json(path)?;
        if labels.is_empty() {
            return Err(StartupError::EmptyClassTable(path.to_path_buf()));
        }
        Ok(ClassNames(labels))
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Care instructions attached to a diagnosis. Missing fields read as empty lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiseaseInfo {
    #[serde(default)]
    pub treatment: Vec<String>,
    #[serde(default)]
    pub first_aid: Vec<String>,
    #[serde(default)]
    pub prevention: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DiseaseTable(HashMap<String, DiseaseInfo>);

impl DiseaseTable {
    pub fn new(entries: HashMap<String, DiseaseInfo>) -> Self {
        DiseaseTable(entries)
    }

    pub fn load(path: &Path) -> Result<Self, StartupError> {
        Ok(DiseaseTable(read_json(path)?))
    }

    /// Returns the record for `label`, or an empty record when there is none.
    pub fn lookup(&self, label: &str) -> DiseaseInfo {
        self.0.get(label).cloned().unwrap_or_default()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StartupError> {
    let raw = fs::read_to_string(path).map_err(|source| StartupError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| StartupError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn json_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_class_names_keep_order() {
        let file = json_file(r#"["Anthrax", "Healthy", "Mastitis"]"#);
        let names = ClassNames::load(file.path()).unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(names.get(0), Some("Anthrax"));
        assert_eq!(names.get(2), Some("Mastitis"));
        assert_eq!(names.get(3), None);
    }

    #[test]
    fn test_empty_class_table_is_rejected() {
        let file = json_file("[]");
        assert!(matches!(
            ClassNames::load(file.path()),
            Err(StartupError::EmptyClassTable(_))
        ));
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let file = json_file(r#"{"not": "a list"}"#);
        assert!(matches!(
            ClassNames::load(file.path()),
            Err(StartupError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let err = DiseaseTable::load(Path::new("/nonexistent/disease_info.json")).unwrap_err();
        assert!(matches!(err, StartupError::Read { .. }));
    }

    #[test]
    fn test_disease_lookup() {
        let file = json_file(
            r#"{
                "Mastitis": {
                    "treatment": ["Intramammary antibiotics"],
                    "firstAid": ["Strip the affected quarter"],
                    "prevention": ["Teat dipping"],
                    "severity": "moderate"
                },
                "Bloat": {"treatment": ["Stomach tube"]}
            }"#,
        );
        let table = DiseaseTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 2);

        let mastitis = table.lookup("Mastitis");
        assert_eq!(mastitis.first_aid, vec!["Strip the affected quarter"]);

        let bloat = table.lookup("Bloat");
        assert_eq!(bloat.treatment, vec!["Stomach tube"]);
        assert!(bloat.first_aid.is_empty());
        assert!(bloat.prevention.is_empty());

        assert!(!table.contains("Healthy"));
        assert_eq!(table.lookup("Healthy"), DiseaseInfo::default());
    }

    #[test]
    fn test_disease_info_serializes_camel_case() {
        let info = DiseaseInfo {
            first_aid: vec!["Isolate the animal".into()],
            ..Default::default()
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["firstAid"][0], "Isolate the animal");
        assert!(value.get("first_aid").is_none());
    }
}
