//! Scenario execution engine
//!
//! Compiles declarative flows into executable steps and runs them against a
//! single transport connection per run, emitting timing and outcome events.

pub mod compiler;
pub mod connection;
pub mod context;
pub mod correlator;
pub mod events;
pub mod payload;
pub mod pipeline;
pub mod registry;

pub use compiler::{CompiledStep, Step, StepCompiler};
pub use connection::{Connection, ConnectionEvent, Connector, TcpConnector};
pub use context::ExecutionContext;
pub use events::{EngineEvent, EventSink, EventStream};
pub use payload::{Encoding, Payload};
pub use pipeline::{Engine, RunFailure, RunResult, Scenario};
pub use registry::{FunctionRegistry, Predicate, Processor};
