//! Script loading
//!
//! Reads YAML or JSON scripts from disk and applies user settings and
//! command-line overrides to the script configuration.

use std::path::Path;
use std::time::Duration;

use crate::common::config::Settings;
use crate::common::{Error, Result};

use super::types::{LoopSpec, ScenarioSpec, Script, StepSpec, ThinkSpec};

/// Supported script formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFormat {
    Yaml,
    Json,
}

impl ScriptFormat {
    /// Pick a format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(Error::ScriptFormat(path.display().to_string())),
        }
    }
}

/// Load and parse a script file
pub fn load_script(path: &Path) -> Result<Script> {
    let format = ScriptFormat::from_path(path)?;
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    parse_script(&content, format, &path.display().to_string())
}

/// Parse script text; `origin` names the source in error messages
pub fn parse_script(content: &str, format: ScriptFormat, origin: &str) -> Result<Script> {
    let script: Script = match format {
        ScriptFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| Error::script_parse(origin, e))?
        }
        ScriptFormat::Json => {
            serde_json::from_str(content).map_err(|e| Error::script_parse(origin, e))?
        }
    };

    if script.scenarios.is_empty() {
        return Err(Error::NoScenarios);
    }

    check_think(script.config.defaults.think.seconds, "config.defaults.think", origin)?;
    for (index, scenario) in script.scenarios.iter().enumerate() {
        let label = match &scenario.name {
            Some(name) => format!("think step in scenario '{}'", name),
            None => format!("think step in scenario {}", index + 1),
        };
        check_flow(&scenario.flow, &label, origin)?;
    }
    Ok(script)
}

/// Think durations must be representable as a wait
fn check_think(seconds: Option<f64>, what: &str, origin: &str) -> Result<()> {
    match seconds {
        Some(secs) if Duration::try_from_secs_f64(secs).is_err() => Err(Error::script_parse(
            origin,
            format!("{} must be a non-negative number of seconds, got {}", what, secs),
        )),
        _ => Ok(()),
    }
}

fn check_flow(flow: &[StepSpec], what: &str, origin: &str) -> Result<()> {
    for step in flow {
        match step {
            StepSpec::Think(ThinkSpec { seconds }) => check_think(*seconds, what, origin)?,
            StepSpec::Loop(LoopSpec { steps, .. }) => check_flow(steps, what, origin)?,
            _ => {}
        }
    }
    Ok(())
}

impl Script {
    /// Fill gaps in the script configuration from user settings
    pub fn apply_settings(&mut self, settings: &Settings) {
        if self.config.defaults.think.seconds.is_none() {
            self.config.defaults.think.seconds = settings.defaults.think_secs;
        }
    }

    /// Override the target host and/or port
    pub fn override_target(&mut self, target: Option<String>, port: Option<u16>) {
        if let Some(target) = target {
            self.config.target = target;
        }
        if let Some(port) = port {
            self.config.tcp.port = port;
        }
    }

    /// Find a scenario by name
    pub fn scenario(&self, name: &str) -> Result<&ScenarioSpec> {
        self.scenarios
            .iter()
            .find(|s| s.name.as_deref() == Some(name))
            .ok_or_else(|| Error::ScenarioNotFound(name.to_string()))
    }
}
