pub mod app_error;
pub mod archive;
pub mod change_report;
pub mod config;
pub mod db;
pub mod diff;
pub mod hashing;
pub mod ingest;
pub mod ledger;
pub mod object_store;
pub mod object_store_s3;
pub mod paths;
pub mod reconstruct;
pub mod service;
pub mod timestamp;
pub mod types;

pub use app_error::AppError;
