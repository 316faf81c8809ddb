//! Data models for stagelab-ingest
//!
//! - Session: one user's ingestion run against a collection
//! - Item: one image tracked through upload, analysis and commit
//! - Classification and filename-parsing results
//! - Subjects and the log records written at commit

pub mod classification;
pub mod item;
pub mod session;
pub mod subject;

pub use classification::{ClassificationResult, ParsedFilenameInfo, Stage};
pub use item::{Item, SourceData, SourceFile, StatusCounts};
pub use session::Session;
pub use subject::{NewLogRecord, Subject};
