pub mod client;
pub mod config;
pub mod form;

pub use client::{ImportClient, ImportError};
pub use config::ImportConfig;
pub use form::{FormError, PlanTripForm, UploadImportRequest};
