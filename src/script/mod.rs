//! Scenario scripts
//!
//! The declarative input of the engine: target configuration plus one or
//! more flows of steps, loaded from YAML or JSON.

mod loader;
mod types;

pub use loader::{load_script, parse_script, ScriptFormat};
pub use types::*;
