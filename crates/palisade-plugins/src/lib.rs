//! Plugin subsystem for the palisade MCP server.
//!
//! - **Dispatcher** (`dispatcher`): tool → plugin routing with cached
//!   schemas and collision detection
//! - **Echo** (`echo`): the reference plugin exercising the pipeline

pub mod dispatcher;
pub mod echo;

pub use dispatcher::{DispatchError, ToolDispatcher};
pub use echo::EchoPlugin;
