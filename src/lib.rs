pub mod classify;
pub mod config;
pub mod dispatch;
pub mod emails;
pub mod report;
pub mod rules;
pub mod webhook;

pub use classify::{classify, Classification};
pub use config::{Config, HttpMethod, RuleOperator, TargetConfig, TargetMode, ValidationRule};
pub use dispatch::{run_target, ProgressEvent, ResultRecord};
pub use emails::EmailItem;
pub use webhook::{WaitOutcome, WebhookServer};
