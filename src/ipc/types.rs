use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::db;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    /// Database file of the selected workspace, used to open extra
    /// connections for detached work.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.workspace.as_deref().map(db::db_path)
    }
}
