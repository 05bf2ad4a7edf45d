use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const IMPORT_SECTION_KEY: &str = "setup.import";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    /// Recompute on the caller's connection before returning.
    Inline,
    /// Recompute on a background thread with its own connection.
    Detached,
}

/// Tunables for the spreadsheet import, stored as the `setup.import` settings
/// section. Missing keys fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportConfig {
    pub default_max_marks: i64,
    pub default_header_row: u32,
    pub header_scan_rows: u32,
    pub header_probe_row: u32,
    pub header_probe_min_matches: usize,
    pub metadata_rows: u32,
    pub metadata_value_column: u32,
    pub metadata_label_column: u32,
    pub aggregation_mode: AggregationMode,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            default_max_marks: 300,
            default_header_row: 8,
            header_scan_rows: 20,
            header_probe_row: 8,
            header_probe_min_matches: 5,
            metadata_rows: 6,
            // Column I holds values, column H their labels.
            metadata_value_column: 9,
            metadata_label_column: 8,
            aggregation_mode: AggregationMode::Inline,
        }
    }
}

impl ImportConfig {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let mut current = serde_json::to_value(ImportConfig::default())?;
        if let Some(saved) = db::settings_get_json(conn, IMPORT_SECTION_KEY)? {
            if let Some(saved_obj) = saved.as_object() {
                // Malformed historical values must not block imports.
                if let Err(e) = merge_patch(&mut current, saved_obj) {
                    tracing::warn!(error = %e, "ignoring invalid saved import settings");
                    current = serde_json::to_value(ImportConfig::default())?;
                }
            }
        }
        Ok(serde_json::from_value(current)?)
    }

    /// Validates `patch` against the current section and persists the result.
    pub fn update(conn: &Connection, patch: &Map<String, Value>) -> Result<Self, String> {
        let current = ImportConfig::load(conn).map_err(|e| e.to_string())?;
        let mut value = serde_json::to_value(current).map_err(|e| e.to_string())?;
        merge_patch(&mut value, patch)?;
        let updated: ImportConfig = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        db::settings_set_json(conn, IMPORT_SECTION_KEY, &value).map_err(|e| e.to_string())?;
        Ok(updated)
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match k.as_str() {
            "defaultMaxMarks" => {
                obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 10_000)?));
            }
            "defaultHeaderRow" | "headerScanRows" | "headerProbeRow" => {
                obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 200)?));
            }
            "headerProbeMinMatches" => {
                obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 21)?));
            }
            "metadataRows" => {
                obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 50)?));
            }
            "metadataValueColumn" | "metadataLabelColumn" => {
                obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 200)?));
            }
            "aggregationMode" => {
                let s = v
                    .as_str()
                    .ok_or_else(|| format!("{} must be string", k))?
                    .trim()
                    .to_ascii_lowercase();
                if s != "inline" && s != "detached" {
                    return Err("aggregationMode must be one of: inline, detached".into());
                }
                obj.insert(k.clone(), Value::String(s));
            }
            _ => return Err(format!("unknown import field: {}", k)),
        }
    }
    Ok(())
}
