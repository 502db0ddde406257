pub mod auth;
pub mod batch;
pub mod config;
pub mod gdpr;
pub mod models;
pub mod partner;
pub mod poller;
pub mod repository;
pub mod schedule;

pub use config::ReporterConfig;
pub use gdpr::{compile_result, GdprReportService};
pub use models::CompiledResult;
