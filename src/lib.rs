pub mod config;
pub mod error;
pub mod estimate;
pub mod events;
pub mod format;
pub mod options;
pub mod paginate;
pub mod reader;
pub mod registry;
pub mod service;
pub mod stream;
pub mod summary;
pub mod transform;
pub mod tree;

pub use config::{load_config, EngineConfig};
pub use error::{ContextError, Result};
pub use options::{BuildOptions, OutputFormat};
pub use paginate::{Chunk, LineRange};
pub use service::{ContextService, ContextServiceBuilder};
pub use stream::Stream;
pub use summary::ContextSummary;
