//! TCP scenario engine
//!
//! Runs declarative request/response scenarios (think, custom functions,
//! loops and send-and-await steps) over one persistent TCP connection per
//! run, reporting latency and outcomes as events.

pub mod cli;
pub mod commands;
pub mod common;
pub mod engine;
pub mod script;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use engine::{Engine, EngineEvent, ExecutionContext, FunctionRegistry};
pub use script::{load_script, Script};
