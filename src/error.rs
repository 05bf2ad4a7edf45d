use serde_json::{json, Value};

/// Failures that abort an import before any row is reconciled.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("could not read spreadsheet {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("test name not found in the metadata block and no testId was supplied")]
    MissingTestMetadata,

    #[error("test not found: {0}")]
    TestNotFound(String),

    #[error("missing required columns: {}", missing.join(", "))]
    MissingColumns {
        missing: Vec<String>,
        found: Vec<String>,
    },

    #[error("no data rows below header row {header_row}")]
    EmptySheet { header_row: u32 },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::Unreadable { .. } => "unreadable_file",
            ImportError::MissingTestMetadata => "missing_test_metadata",
            ImportError::TestNotFound(_) => "test_not_found",
            ImportError::MissingColumns { .. } => "missing_columns",
            ImportError::EmptySheet { .. } => "empty_sheet",
            ImportError::Store(_) => "db_failed",
        }
    }

    /// HTTP-style status hint for the host: 400 when the upload itself is
    /// malformed, 500 otherwise.
    pub fn status(&self) -> u16 {
        match self {
            ImportError::Unreadable { .. }
            | ImportError::MissingColumns { .. }
            | ImportError::EmptySheet { .. } => 400,
            ImportError::MissingTestMetadata
            | ImportError::TestNotFound(_)
            | ImportError::Store(_) => 500,
        }
    }

    pub fn details(&self) -> Value {
        let mut d = json!({ "status": self.status() });
        match self {
            ImportError::MissingColumns { missing, found } => {
                d["missing"] = json!(missing);
                d["found"] = json!(found);
            }
            ImportError::TestNotFound(id) => {
                d["testId"] = json!(id);
            }
            ImportError::EmptySheet { header_row } => {
                d["headerRow"] = json!(header_row);
            }
            ImportError::Unreadable { path, .. } => {
                d["path"] = json!(path);
            }
            ImportError::MissingTestMetadata | ImportError::Store(_) => {}
        }
        d
    }
}
