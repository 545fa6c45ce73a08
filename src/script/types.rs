//! Script configuration types
//!
//! Defines the data structures for deserializing YAML/JSON scenario scripts.

use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::engine::payload::{Encoding, Payload};

/// A complete script: shared configuration plus one or more scenarios
#[derive(Deserialize, Debug, Clone)]
pub struct Script {
    /// Target and defaults shared by every scenario
    pub config: ScriptConfig,
    /// Scenarios defined by the script
    #[serde(default)]
    pub scenarios: Vec<ScenarioSpec>,
}

/// Script-level configuration
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ScriptConfig {
    /// Host to connect to
    pub target: String,
    /// Transport settings
    pub tcp: TcpConfig,
    /// Per-step-kind defaults
    #[serde(default)]
    pub defaults: StepDefaults,
}

/// TCP transport settings
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TcpConfig {
    /// Port on the target host
    pub port: u16,
}

/// Per-step-kind defaults
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StepDefaults {
    /// Defaults for think steps
    #[serde(default)]
    pub think: ThinkDefaults,
}

/// Defaults for think steps
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ThinkDefaults {
    /// Think duration used when a step gives none
    #[serde(default)]
    pub seconds: Option<f64>,
}

/// A named, ordered flow of steps
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ScenarioSpec {
    /// Optional scenario name
    #[serde(default)]
    pub name: Option<String>,
    /// Steps executed in order
    #[serde(default)]
    pub flow: Vec<StepSpec>,
}

/// One step of a flow
///
/// Scripts describe steps as objects keyed by `loop`, `log`, `think`,
/// `function` or `send`. When several keys are present the first match in
/// that order wins; objects with none of them become [`StepSpec::Noop`].
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "RawStep")]
pub enum StepSpec {
    /// Repeat a nested flow
    Loop(LoopSpec),
    /// Marker step with an optional message
    Log(Option<String>),
    /// Pause for a duration
    Think(ThinkSpec),
    /// Invoke a registered processor by name
    Function(String),
    /// Send a payload and await one response
    Send(SendSpec),
    /// Unrecognized step shape
    Noop,
}

/// Loop step settings
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSpec {
    /// Nested flow run on every iteration
    pub steps: Vec<StepSpec>,
    /// Iteration count, negative meaning "bounded by `while_true`"
    pub count: i64,
    /// Context variable bound on every iteration
    pub loop_value: String,
    /// Values to iterate over
    pub over: Option<OverSpec>,
    /// Registered predicate consulted before each iteration
    pub while_true: Option<String>,
}

/// Default loop variable name
pub const DEFAULT_LOOP_VALUE: &str = "$loopCount";

/// Source of values for an `over` loop
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum OverSpec {
    /// Inline list of values
    Values(Vec<Value>),
    /// Name of a context variable holding a list
    Variable(String),
}

/// Think step settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThinkSpec {
    /// Explicit duration; falls back to the configured default
    pub seconds: Option<f64>,
}

/// Send step settings
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "RawSend")]
pub struct SendSpec {
    /// Payload to send
    pub payload: Payload,
    /// Byte encoding the payload text is interpreted under
    pub encoding: Encoding,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSend {
    Full {
        payload: Payload,
        #[serde(default)]
        encoding: Encoding,
    },
    Text(String),
}

impl From<RawSend> for SendSpec {
    fn from(raw: RawSend) -> Self {
        match raw {
            RawSend::Full { payload, encoding } => Self { payload, encoding },
            RawSend::Text(text) => Self {
                payload: Payload::Text(text),
                encoding: Encoding::default(),
            },
        }
    }
}

/// Every recognized key of a step object, before dispatch
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    #[serde(default, rename = "loop")]
    loop_steps: Option<Vec<StepSpec>>,
    #[serde(default, deserialize_with = "present")]
    log: Option<Option<Value>>,
    #[serde(default, deserialize_with = "present")]
    think: Option<Option<f64>>,
    #[serde(default)]
    function: Option<String>,
    #[serde(default)]
    send: Option<SendSpec>,
    #[serde(default)]
    count: Option<i64>,
    #[serde(default)]
    loop_value: Option<String>,
    #[serde(default)]
    over: Option<OverSpec>,
    #[serde(default)]
    while_true: Option<String>,
}

/// Distinguishes a key given as `null` from a missing key
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl From<RawStep> for StepSpec {
    fn from(raw: RawStep) -> Self {
        if let Some(steps) = raw.loop_steps {
            return StepSpec::Loop(LoopSpec {
                steps,
                count: raw.count.unwrap_or(-1),
                loop_value: raw
                    .loop_value
                    .unwrap_or_else(|| DEFAULT_LOOP_VALUE.to_string()),
                over: raw.over,
                while_true: raw.while_true,
            });
        }

        if let Some(message) = raw.log {
            return StepSpec::Log(message.and_then(|v| match v {
                Value::Null => None,
                Value::String(s) => Some(s),
                other => Some(other.to_string()),
            }));
        }

        if let Some(seconds) = raw.think {
            return StepSpec::Think(ThinkSpec { seconds });
        }

        if let Some(name) = raw.function {
            return StepSpec::Function(name);
        }

        if let Some(send) = raw.send {
            return StepSpec::Send(send);
        }

        StepSpec::Noop
    }
}

impl fmt::Display for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepSpec::Loop(spec) => {
                write!(f, "loop ({} steps", spec.steps.len())?;
                match (&spec.over, spec.count, &spec.while_true) {
                    (Some(OverSpec::Values(values)), _, _) => {
                        write!(f, ", over {} values", values.len())?
                    }
                    (Some(OverSpec::Variable(name)), _, _) => write!(f, ", over ${}", name)?,
                    (None, count, _) if count >= 0 => write!(f, ", {} times", count)?,
                    (None, _, Some(predicate)) => write!(f, ", while {}", predicate)?,
                    (None, _, None) => write!(f, ", no bound")?,
                }
                write!(f, ", as {})", spec.loop_value)
            }
            StepSpec::Log(Some(message)) => write!(f, "log \"{}\"", message),
            StepSpec::Log(None) => write!(f, "log"),
            StepSpec::Think(ThinkSpec { seconds: Some(s) }) => write!(f, "think {}s", s),
            StepSpec::Think(ThinkSpec { seconds: None }) => write!(f, "think (default)"),
            StepSpec::Function(name) => write!(f, "function {}", name),
            StepSpec::Send(spec) => write!(f, "send {} ({})", spec.payload, spec.encoding),
            StepSpec::Noop => write!(f, "noop"),
        }
    }
}
