pub mod archive;
pub mod download;
pub mod downloaders;
pub mod error;
pub mod extractors;
pub mod job;
pub mod options;
pub mod pool;
pub mod probe;
pub mod progress;
pub mod proxy;
pub mod resolver;
pub(crate) mod utils;
