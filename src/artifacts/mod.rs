pub mod discovery;
pub mod parser;

pub use discovery::{LookmlFile, ProjectDiscovery};
pub use parser::{ArtifactParser, ParsedFile};
