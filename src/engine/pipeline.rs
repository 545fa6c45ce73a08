//! Pipeline executor
//!
//! A [`Scenario`] is a flow compiled once. Each call to [`Scenario::run`] is
//! one run: connect, announce, then execute the steps strictly in order,
//! stopping at the first failure.

use std::sync::Arc;

use crate::common::config::default_read_buffer;
use crate::common::Error;
use crate::script::{ScenarioSpec, ScriptConfig};

use super::compiler::{CompiledStep, StepCompiler};
use super::connection::{self, Connector, TcpConnector};
use super::context::ExecutionContext;
use super::events::EventSink;
use super::registry::FunctionRegistry;

/// Failed run: the error plus the context as of the failing step
#[derive(Debug)]
pub struct RunFailure {
    pub context: ExecutionContext,
    pub error: Error,
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run {} failed: {}", self.context.run_id(), self.error)
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Outcome of one run
pub type RunResult = std::result::Result<ExecutionContext, RunFailure>;

/// Compiles scenarios against shared, read-only configuration
pub struct Engine {
    config: ScriptConfig,
    registry: FunctionRegistry,
    connector: Arc<dyn Connector>,
}

impl Engine {
    /// Create an engine that connects over TCP
    pub fn new(config: ScriptConfig, registry: FunctionRegistry) -> Self {
        Self {
            config,
            registry,
            connector: Arc::new(TcpConnector::new(default_read_buffer())),
        }
    }

    /// Replace the connector used to open run connections
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Script configuration scenarios are compiled against
    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Compile a scenario whose runs report to `events`
    pub fn create_scenario(&self, spec: &ScenarioSpec, events: EventSink) -> Scenario {
        let compiler = StepCompiler::new(&self.config, &self.registry, events.clone());
        let steps = compiler.compile_flow(&spec.flow);
        tracing::debug!(
            scenario = spec.name.as_deref().unwrap_or("<unnamed>"),
            steps = steps.len(),
            "compiled scenario"
        );

        Scenario {
            name: spec.name.clone(),
            steps,
            host: self.config.target.clone(),
            port: self.config.tcp.port,
            connector: Arc::clone(&self.connector),
            events,
        }
    }
}

/// A compiled scenario, runnable any number of times and concurrently
pub struct Scenario {
    name: Option<String>,
    steps: Vec<CompiledStep>,
    host: String,
    port: u16,
    connector: Arc<dyn Connector>,
    events: EventSink,
}

impl Scenario {
    /// Scenario name as given in the script
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Number of top-level steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Execute one run with a fresh context
    pub async fn run(&self, mut context: ExecutionContext) -> RunResult {
        let run_id = context.run_id().to_string();

        if let Err(error) = connection::establish(
            self.connector.as_ref(),
            &self.host,
            self.port,
            &mut context,
            &self.events,
        )
        .await
        {
            return Err(RunFailure { context, error });
        }

        for (index, step) in self.steps.iter().enumerate() {
            if let Err(error) = step.run(&mut context).await {
                tracing::debug!(run_id = %run_id, step = index, error = %error, "run aborted");
                return Err(RunFailure { context, error });
            }
        }

        tracing::trace!(run_id = %run_id, "run complete");
        Ok(context)
    }
}
