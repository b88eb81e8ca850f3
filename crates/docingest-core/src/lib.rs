pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod filing;
pub mod fsops;
pub mod hasher;
pub mod ledger;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod resolver;
pub mod review;
pub mod scanner;
pub mod storage;

pub use config::AppConfig;
pub use engine::{Confirmed, IngestEngine, JobDetail, Promoted, StartupReport};
pub use error::{Error, Result};
pub use progress::{ProgressReporter, SilentReporter};
