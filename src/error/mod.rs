//! Error types for the agent runtime.

mod node_error;
mod runtime_error;

pub use node_error::NodeError;
pub use runtime_error::{RuntimeError, RuntimeResult};
