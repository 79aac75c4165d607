//! LOINC code records and the sources they are loaded from.
//!
//! Records come from `loinc-codes.json` when it exists, otherwise from a small
//! built-in sample set. `convert_csv` produces that JSON file from the
//! official `Loinc.csv` distribution.

use std::collections::HashSet;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// One terminology entry. `code` is the join key against vector files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoincCode {
    pub code: String,
    pub display_name: String,
    pub long_common_name: String,
    pub short_name: String,
    pub component: String,
    pub property: String,
    pub time_aspect: String,
    pub system: String,
    pub scale_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_type: Option<String>,
    pub class_name: String,
    pub version_last_changed: String,
}

impl LoincCode {
    /// Text embedded when vectors are generated on the fly.
    pub fn searchable_text(&self) -> String {
        [
            self.display_name.as_str(),
            self.long_common_name.as_str(),
            self.short_name.as_str(),
            self.component.as_str(),
            self.system.as_str(),
            self.property.as_str(),
            self.class_name.as_str(),
        ]
        .join(" ")
        .to_lowercase()
    }

    /// Text embedded by the batch importer.
    pub fn embedding_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.display_name, self.long_common_name, self.component, self.system
        )
        .to_lowercase()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codes file is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("record #{0} has an empty code")]
    EmptyCode(usize),

    #[error("duplicate code {0}")]
    DuplicateCode(String),
}

/// Load codes from `path`, falling back to the built-in samples when the
/// file does not exist.
pub fn load_codes(path: &Path) -> Result<Vec<LoincCode>, RecordError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            log::info!("No codes file at {}, using sample LOINC data", path.display());
            return Ok(sample_codes());
        }
        Err(err) => return Err(err.into()),
    };

    let now = Instant::now();
    let codes: Vec<LoincCode> = serde_json::from_slice(&data)?;
    validate_codes(&codes)?;

    log::info!(
        "Loaded {} LOINC codes from {} in {}ms",
        codes.len(),
        path.display(),
        now.elapsed().as_millis()
    );
    Ok(codes)
}

/// Identifiers must be non-empty and unique within a corpus.
pub fn validate_codes(codes: &[LoincCode]) -> Result<(), RecordError> {
    let mut seen = HashSet::with_capacity(codes.len());
    for (idx, code) in codes.iter().enumerate() {
        if code.code.trim().is_empty() {
            return Err(RecordError::EmptyCode(idx + 1));
        }
        if !seen.insert(code.code.as_str()) {
            return Err(RecordError::DuplicateCode(code.code.clone()));
        }
    }
    Ok(())
}

/// Row of the official `Loinc.csv`. Only the columns we map are read.
#[derive(Debug, Deserialize)]
struct LoincRow {
    #[serde(rename = "LOINC_NUM")]
    loinc_num: String,
    #[serde(rename = "COMPONENT")]
    component: String,
    #[serde(rename = "PROPERTY")]
    property: String,
    #[serde(rename = "TIME_ASPCT")]
    time_aspect: String,
    #[serde(rename = "SYSTEM")]
    system: String,
    #[serde(rename = "SCALE_TYP")]
    scale_type: String,
    #[serde(rename = "METHOD_TYP", default)]
    method_type: String,
    #[serde(rename = "CLASS")]
    class: String,
    #[serde(rename = "VersionLastChanged", default)]
    version_last_changed: String,
    #[serde(rename = "SHORTNAME", default)]
    short_name: String,
    #[serde(rename = "LONG_COMMON_NAME", default)]
    long_common_name: String,
    #[serde(rename = "DisplayName", default)]
    display_name: String,
    #[serde(rename = "STATUS", default)]
    status: String,
}

impl From<LoincRow> for LoincCode {
    fn from(row: LoincRow) -> Self {
        let display_name = if row.display_name.is_empty() {
            row.long_common_name.clone()
        } else {
            row.display_name
        };

        LoincCode {
            code: row.loinc_num,
            display_name,
            long_common_name: row.long_common_name,
            short_name: row.short_name,
            component: row.component,
            property: row.property,
            time_aspect: row.time_aspect,
            system: row.system,
            scale_type: row.scale_type,
            method_type: Some(row.method_type),
            class_name: row.class,
            version_last_changed: row.version_last_changed,
        }
    }
}

/// Convert `Loinc.csv` into the codes JSON file, keeping ACTIVE rows only.
///
/// Returns the number of codes written.
pub fn convert_csv(csv_path: &Path, json_path: &Path) -> Result<usize, RecordError> {
    let mut reader = csv::Reader::from_path(csv_path)?;

    let mut total = 0usize;
    let mut codes = vec![];
    for row in reader.deserialize::<LoincRow>() {
        let row = row?;
        total += 1;
        if row.status == "ACTIVE" {
            codes.push(LoincCode::from(row));
        }
    }
    log::info!("Found {total} LOINC codes, {} active", codes.len());

    validate_codes(&codes)?;

    let dir = json_path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, &codes)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(json_path).map_err(|e| e.error)?;

    log::info!("Saved {} codes to {}", codes.len(), json_path.display());
    Ok(codes.len())
}

#[allow(clippy::too_many_arguments)]
fn sample(
    code: &str,
    name: &str,
    short_name: &str,
    component: &str,
    property: &str,
    system: &str,
    method_type: &str,
    class_name: &str,
) -> LoincCode {
    LoincCode {
        code: code.to_string(),
        display_name: name.to_string(),
        long_common_name: name.to_string(),
        short_name: short_name.to_string(),
        component: component.to_string(),
        property: property.to_string(),
        time_aspect: "Pt".to_string(),
        system: system.to_string(),
        scale_type: "Qn".to_string(),
        method_type: Some(method_type.to_string()),
        class_name: class_name.to_string(),
        version_last_changed: "2.73".to_string(),
    }
}

/// Built-in fallback corpus used when no codes file has been imported.
pub fn sample_codes() -> Vec<LoincCode> {
    vec![
        sample(
            "2339-0",
            "Glucose [Mass/volume] in Blood",
            "Glucose SerPl-mCnc",
            "Glucose",
            "MCnc",
            "Ser/Plas",
            "",
            "CHEM",
        ),
        sample(
            "2093-3",
            "Cholesterol [Mass/volume] in Serum or Plasma",
            "Cholesterol SerPl-mCnc",
            "Cholesterol",
            "MCnc",
            "Ser/Plas",
            "",
            "CHEM",
        ),
        sample(
            "789-8",
            "Erythrocytes [#/volume] in Blood by Automated count",
            "RBC # Bld Auto",
            "Erythrocytes",
            "NCnc",
            "Bld",
            "Automated count",
            "HEM/BC",
        ),
        sample(
            "6298-4",
            "Potassium [Moles/volume] in Blood",
            "Potassium Bld-sCnc",
            "Potassium",
            "SCnc",
            "Bld",
            "",
            "CHEM",
        ),
        sample(
            "718-7",
            "Hemoglobin [Mass/volume] in Blood",
            "Hemoglobin Bld-mCnc",
            "Hemoglobin",
            "MCnc",
            "Bld",
            "",
            "HEM/BC",
        ),
        sample(
            "4548-4",
            "Hemoglobin A1c/Hemoglobin.total in Blood",
            "Hemoglobin A1c/Hemoglobin.total Bld-mFr",
            "Hemoglobin A1c/Hemoglobin.total",
            "MFr",
            "Bld",
            "",
            "CHEM",
        ),
        sample(
            "33743-4",
            "Thyroid stimulating hormone [Units/volume] in Serum or Plasma",
            "TSH SerPl-cCnc",
            "Thyroid stimulating hormone",
            "CCnc",
            "Ser/Plas",
            "",
            "CHEM",
        ),
        sample(
            "2951-2",
            "Sodium [Moles/volume] in Serum or Plasma",
            "Sodium SerPl-sCnc",
            "Sodium",
            "SCnc",
            "Ser/Plas",
            "",
            "CHEM",
        ),
        sample(
            "777-3",
            "Platelets [#/volume] in Blood by Automated count",
            "Platelets # Bld Auto",
            "Platelets",
            "NCnc",
            "Bld",
            "Automated count",
            "HEM/BC",
        ),
        sample(
            "6690-2",
            "Leukocytes [#/volume] in Blood by Automated count",
            "WBC # Bld Auto",
            "Leukocytes",
            "NCnc",
            "Bld",
            "Automated count",
            "HEM/BC",
        ),
    ]
}
