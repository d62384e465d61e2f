//! Infrastructure layer - Engine services and external integrations

pub mod experiment;
pub mod logging;
pub mod observability;
pub mod services;
