pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod grouping;
pub mod inventory;
pub mod keeper;
pub mod plan;
pub mod progress;
pub mod record;

pub use config::AppConfig;
pub use engine::{default_log_path, DedupeEngine, PlanRun};
pub use error::Error;
pub use executor::{ExecutionReport, ExecutionSummary, RestoreSummary};
pub use progress::{ProgressReporter, SilentReporter};
