pub mod aggregator;
pub mod artifact;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod domain_utils;
pub mod export;
pub mod logger;
pub mod maintenance;
pub mod period;
pub mod suffixes;
pub mod whois;

pub use artifact::{ArtifactError, SchemaPolicy};
pub use classifier::{Category, ClassifiedRecord, Classifier};
pub use period::{Month, Period};
