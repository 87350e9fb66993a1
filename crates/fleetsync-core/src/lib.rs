pub mod catalog;
pub mod config;
pub mod entities;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod runlog;
pub mod steps;

pub use config::Config;
pub use error::{Result, SyncError};
pub use pipeline::{CronReport, ReportStatus, StepReport, SyncPipeline};
pub use steps::Step;
