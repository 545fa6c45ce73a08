//! Per-run execution context
//!
//! Created fresh for every scenario run and owned by that run alone. Holds
//! the run's connection, its identifier and the variables written by
//! function and loop steps.

use serde_json::{Map, Value};

use crate::common::{Error, Result};

use super::connection::Connection;

/// Mutable state threaded through one scenario run
pub struct ExecutionContext {
    /// Unique identifier of this run
    run_id: String,
    /// Scenario variables
    vars: Map<String, Value>,
    /// Connection attached by the lifecycle step
    connection: Option<Connection>,
}

impl ExecutionContext {
    /// Create a context with a fresh random run identifier
    pub fn new() -> Self {
        Self::with_run_id(uuid::Uuid::new_v4().to_string())
    }

    /// Create a context with a caller-chosen run identifier
    pub fn with_run_id(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            vars: Map::new(),
            connection: None,
        }
    }

    /// Seed the context with initial variables
    pub fn with_vars(mut self, vars: Map<String, Value>) -> Self {
        self.vars = vars;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// All scenario variables
    pub fn vars(&self) -> &Map<String, Value> {
        &self.vars
    }

    /// Look up a scenario variable
    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Set a scenario variable, returning the previous value
    pub fn set_var(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.vars.insert(name.into(), value)
    }

    /// Append to a list variable, creating it if needed
    ///
    /// A non-list value under `name` is replaced by a one-element list.
    pub fn push_var(&mut self, name: &str, value: Value) {
        match self.vars.get_mut(name) {
            Some(Value::Array(items)) => items.push(value),
            _ => {
                self.vars.insert(name.to_string(), Value::Array(vec![value]));
            }
        }
    }

    /// Whether a connection has been attached
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Attach the run's connection
    ///
    /// A run owns exactly one connection; attaching a second one is an error.
    pub fn attach_connection(&mut self, connection: Connection) -> Result<()> {
        if self.connection.is_some() {
            return Err(Error::Internal(format!(
                "run {} already has a connection",
                self.run_id
            )));
        }
        self.connection = Some(connection);
        Ok(())
    }

    /// Mutable access to the attached connection
    pub fn connection_mut(&mut self) -> Result<&mut Connection> {
        let run_id = &self.run_id;
        self.connection.as_mut().ok_or_else(|| Error::NotConnected {
            run_id: run_id.clone(),
        })
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("vars", &self.vars)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}
