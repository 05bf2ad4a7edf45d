//! Exam-results spreadsheet import and per-subtopic backlog aggregation,
//! served to a host application over line-delimited JSON on stdin/stdout.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod grid;
pub mod import;
pub mod ipc;
pub mod layout;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod store;
pub mod syllabus;
