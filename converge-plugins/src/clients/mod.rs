//! Collaborators the plugins talk to.
//!
//! - cloud: the provider API contracts used by `vpc` and `dns`
//! - fixture: a provider simulated in a local JSON file
//! - crontab: the system crontab or a cron.d file

pub mod cloud;
pub mod crontab;
pub mod fixture;

pub use cloud::{DnsApi, VpcApi};
pub use crontab::{CronFile, CrontabStore, SystemCrontab};
pub use fixture::FixtureCloud;
