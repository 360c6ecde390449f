//! Analysis engine for college administrative exports: schedules, lesson
//! topics, student grades, attendance and homework.

pub mod analyzers;
pub mod columns;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod models;
pub mod normalize;
pub mod policy;
pub mod report;
pub mod store;

pub use engine::{run, run_and_store, run_tag, AnalysisOptions, EngineError};
pub use models::{Period, ReportKind, ReportResult};
