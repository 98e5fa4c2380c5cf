//! converge-plugins: idempotent resource plugins over `converge-core`.
//!
//! Each plugin takes a parameter record, reconciles one declared resource
//! against a collaborator (the cloud API or a crontab) and returns a single
//! result record.

pub mod clients;
pub mod error;
pub mod output;
pub mod params;
pub mod plugins;
pub mod validation;

pub use error::{ErrorInfo, PluginError, Result};
pub use output::{Outcome, PluginResult};
pub use params::{CommonParams, State};
