/// Services module
/// Process execution machinery: line readers, sessions, the registry that
/// tracks them and the multiplexer that merges their output.

pub mod line_reader;
pub mod multiplexer;
pub mod process_tree;
pub mod registry;
pub mod session;

pub use line_reader::LineReader;
pub use multiplexer::{multiplex, MultiplexStats};
pub use registry::SessionRegistry;
pub use session::{ExitOutcome, ProcessSession, SessionStreams};
