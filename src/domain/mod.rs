//! Domain layer - Experiment entities, validation and storage ports

pub mod error;
pub mod experiment;

pub use error::DomainError;
