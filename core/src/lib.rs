pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod matcher;
pub mod preprocess;
pub mod ranker;
pub mod record;
pub mod store;

pub use config::Config;
pub use descriptor::{Descriptor, DescriptorSet, MatchResult};
pub use engine::{Engine, SearchOutcome, Stats};
pub use error::{Result, SearchError};
pub use extract::{Extractor, GradientGridExtractor};
pub use indexer::IndexReport;
pub use matcher::Matcher;
pub use store::DescriptorStore;
