//! Step compiler and loop expander
//!
//! Turns each [`StepSpec`] into an executable [`Step`] exactly once. Names
//! are resolved against the registry here; an unknown name compiles to a
//! pass-through rather than an error. Compilation performs no I/O.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::common::Result;
use crate::script::{LoopSpec, OverSpec, ScriptConfig, StepSpec};

use super::context::ExecutionContext;
use super::correlator::SendStep;
use super::events::EventSink;
use super::registry::{FunctionRegistry, Predicate, Processor};

/// One executable unit of a scenario
#[async_trait]
pub trait Step: Send + Sync {
    /// Run against the context, which the next step receives afterwards
    async fn run(&self, context: &mut ExecutionContext) -> Result<()>;
}

/// A compiled step
pub type CompiledStep = Box<dyn Step>;

/// Compiles step specifications against shared configuration
pub struct StepCompiler<'a> {
    config: &'a ScriptConfig,
    registry: &'a FunctionRegistry,
    events: EventSink,
}

impl<'a> StepCompiler<'a> {
    pub fn new(config: &'a ScriptConfig, registry: &'a FunctionRegistry, events: EventSink) -> Self {
        Self {
            config,
            registry,
            events,
        }
    }

    /// Compile a whole flow, preserving order
    pub fn compile_flow(&self, flow: &[StepSpec]) -> Vec<CompiledStep> {
        flow.iter().map(|spec| self.compile(spec)).collect()
    }

    /// Compile one step
    pub fn compile(&self, spec: &StepSpec) -> CompiledStep {
        match spec {
            StepSpec::Loop(spec) => self.compile_loop(spec),
            StepSpec::Log(message) => Box::new(LogStep {
                message: message.clone(),
            }),
            StepSpec::Think(think) => {
                let seconds = think
                    .seconds
                    .or(self.config.defaults.think.seconds)
                    .unwrap_or(0.0);
                Box::new(ThinkStep {
                    duration: Duration::try_from_secs_f64(seconds).unwrap_or_default(),
                })
            }
            StepSpec::Function(name) => Box::new(FunctionStep {
                name: name.clone(),
                processor: self.registry.processor(name),
                events: self.events.clone(),
            }),
            StepSpec::Send(spec) => Box::new(SendStep::new(spec.clone(), self.events.clone())),
            StepSpec::Noop => Box::new(NoopStep),
        }
    }

    /// Compile a loop: the body is compiled once and reused every iteration
    fn compile_loop(&self, spec: &LoopSpec) -> CompiledStep {
        let body = self.compile_flow(&spec.steps);

        let bound = if let Some(over) = &spec.over {
            LoopBound::Over(over.clone())
        } else if spec.count >= 0 {
            LoopBound::Count(spec.count as u64)
        } else {
            let predicate = spec
                .while_true
                .as_deref()
                .and_then(|name| self.registry.predicate(name));
            if predicate.is_none() {
                tracing::debug!(
                    predicate = spec.while_true.as_deref().unwrap_or(""),
                    "unbounded loop without a resolvable predicate will not iterate"
                );
            }
            LoopBound::While(predicate)
        };

        Box::new(LoopStep {
            body,
            bound,
            variable: spec.loop_value.clone(),
        })
    }
}

/// Yields once and passes the context through
struct LogStep {
    message: Option<String>,
}

#[async_trait]
impl Step for LogStep {
    async fn run(&self, context: &mut ExecutionContext) -> Result<()> {
        if let Some(message) = &self.message {
            tracing::debug!(run_id = context.run_id(), "{}", message);
        }
        tokio::task::yield_now().await;
        Ok(())
    }
}

/// Suspends the run for a fixed duration
struct ThinkStep {
    duration: Duration,
}

#[async_trait]
impl Step for ThinkStep {
    async fn run(&self, _context: &mut ExecutionContext) -> Result<()> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// Invokes a registered processor; never fails the pipeline
struct FunctionStep {
    name: String,
    processor: Option<Arc<dyn Processor>>,
    events: EventSink,
}

#[async_trait]
impl Step for FunctionStep {
    async fn run(&self, context: &mut ExecutionContext) -> Result<()> {
        let Some(processor) = &self.processor else {
            tracing::trace!(function = %self.name, "function not registered, skipping");
            return Ok(());
        };

        // Processors report their own failures through the event channel
        if let Err(e) = processor.call(context, &self.events).await {
            tracing::debug!(function = %self.name, error = %e, "function returned an error");
        }
        Ok(())
    }
}

/// Identity step for unrecognized step shapes
struct NoopStep;

#[async_trait]
impl Step for NoopStep {
    async fn run(&self, _context: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }
}

enum LoopBound {
    Over(OverSpec),
    Count(u64),
    While(Option<Arc<dyn Predicate>>),
}

/// Repeats a compiled body
struct LoopStep {
    body: Vec<CompiledStep>,
    bound: LoopBound,
    variable: String,
}

impl LoopStep {
    async fn run_body(&self, context: &mut ExecutionContext) -> Result<()> {
        for step in &self.body {
            step.run(context).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Step for LoopStep {
    async fn run(&self, context: &mut ExecutionContext) -> Result<()> {
        match &self.bound {
            LoopBound::Over(over) => {
                let values = match over {
                    OverSpec::Values(values) => values.clone(),
                    OverSpec::Variable(name) => match context.var(name) {
                        Some(Value::Array(values)) => values.clone(),
                        _ => {
                            tracing::debug!(variable = %name, "loop variable is not a list");
                            Vec::new()
                        }
                    },
                };
                for value in values {
                    context.set_var(self.variable.as_str(), value);
                    self.run_body(context).await?;
                }
            }
            LoopBound::Count(count) => {
                for index in 0..*count {
                    context.set_var(self.variable.as_str(), Value::from(index));
                    self.run_body(context).await?;
                }
            }
            LoopBound::While(Some(predicate)) => {
                let mut index: u64 = 0;
                while predicate.test(context).await {
                    context.set_var(self.variable.as_str(), Value::from(index));
                    self.run_body(context).await?;
                    index += 1;
                }
            }
            LoopBound::While(None) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::engine::events::{self, EngineEvent};
    use crate::script::{StepDefaults, TcpConfig, ThinkDefaults, ThinkSpec};
    use serde_json::json;
    use std::time::Instant;

    fn config() -> ScriptConfig {
        ScriptConfig {
            target: "127.0.0.1".into(),
            tcp: TcpConfig { port: 9 },
            defaults: StepDefaults::default(),
        }
    }

    fn step(value: Value) -> StepSpec {
        serde_json::from_value(value).unwrap()
    }

    fn recording_registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry.register_fn("record", |ctx, _| {
            let value = ctx.var("item").cloned().unwrap_or(Value::Null);
            ctx.push_var("seen", value);
            Ok(())
        });
        registry
    }

    #[tokio::test]
    async fn test_log_yields_once() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let config = config();
        let registry = FunctionRegistry::new();
        let (sink, mut stream) = events::channel();
        let compiler = StepCompiler::new(&config, &registry, sink);
        let compiled = compiler.compile(&step(json!({"log": "hello"})));

        // Single-threaded runtime: the spawned task only runs if the step yields
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        let mut ctx = ExecutionContext::with_run_id("r1");
        compiled.run(&mut ctx).await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert!(ctx.vars().is_empty());
        assert!(stream.drain().is_empty());
    }

    #[tokio::test]
    async fn test_over_preserves_order() {
        let config = config();
        let registry = recording_registry();
        let (sink, _stream) = events::channel();
        let compiler = StepCompiler::new(&config, &registry, sink);

        let compiled = compiler.compile(&step(json!({
            "loop": [{"function": "record"}],
            "over": ["a", "b", "c"],
            "loopValue": "item"
        })));

        let mut ctx = ExecutionContext::with_run_id("r1");
        compiled.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.var("seen"), Some(&json!(["a", "b", "c"])));
    }

    #[tokio::test]
    async fn test_over_context_variable() {
        let config = config();
        let registry = recording_registry();
        let (sink, _stream) = events::channel();
        let compiler = StepCompiler::new(&config, &registry, sink);

        let compiled = compiler.compile(&step(json!({
            "loop": [{"function": "record"}],
            "over": "ids",
            "loopValue": "item"
        })));

        let mut ctx = ExecutionContext::with_run_id("r1");
        ctx.set_var("ids", json!([1, 2]));
        compiled.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.var("seen"), Some(&json!([1, 2])));

        let mut ctx = ExecutionContext::with_run_id("r2");
        ctx.set_var("ids", json!("not a list"));
        compiled.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.var("seen"), None);
    }

    #[tokio::test]
    async fn test_count_binds_index() {
        let config = config();
        let registry = recording_registry();
        let (sink, _stream) = events::channel();
        let compiler = StepCompiler::new(&config, &registry, sink);

        let compiled = compiler.compile(&step(json!({
            "loop": [{"function": "record"}],
            "count": 3,
            "loopValue": "item"
        })));

        let mut ctx = ExecutionContext::with_run_id("r1");
        compiled.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.var("seen"), Some(&json!([0, 1, 2])));
    }

    #[tokio::test]
    async fn test_count_zero_never_runs_body() {
        let config = config();
        let registry = recording_registry();
        let (sink, _stream) = events::channel();
        let compiler = StepCompiler::new(&config, &registry, sink);

        let compiled = compiler.compile(&step(json!({
            "loop": [{"function": "record"}],
            "count": 0
        })));

        let mut ctx = ExecutionContext::with_run_id("r1");
        compiled.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.var("seen"), None);
    }

    #[tokio::test]
    async fn test_while_predicate_rechecked_each_iteration() {
        let config = config();
        let mut registry = recording_registry();
        registry.register_predicate_fn("underThree", |ctx| {
            ctx.var("seen")
                .and_then(Value::as_array)
                .map_or(true, |seen| seen.len() < 3)
        });
        let (sink, _stream) = events::channel();
        let compiler = StepCompiler::new(&config, &registry, sink);

        let compiled = compiler.compile(&step(json!({
            "loop": [{"function": "record"}],
            "whileTrue": "underThree",
            "loopValue": "item"
        })));

        let mut ctx = ExecutionContext::with_run_id("r1");
        compiled.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.var("seen"), Some(&json!([0, 1, 2])));
    }

    #[tokio::test]
    async fn test_unresolvable_predicate_runs_zero_times() {
        let config = config();
        let registry = recording_registry();
        let (sink, _stream) = events::channel();
        let compiler = StepCompiler::new(&config, &registry, sink);

        for spec in [
            json!({"loop": [{"function": "record"}]}),
            json!({"loop": [{"function": "record"}], "whileTrue": "missing"}),
            // A processor is not a predicate
            json!({"loop": [{"function": "record"}], "whileTrue": "record"}),
        ] {
            let compiled = compiler.compile(&step(spec));
            let mut ctx = ExecutionContext::with_run_id("r1");
            compiled.run(&mut ctx).await.unwrap();
            assert_eq!(ctx.var("seen"), None);
        }
    }

    #[tokio::test]
    async fn test_nested_loops() {
        let config = config();
        let mut registry = FunctionRegistry::new();
        registry.register_fn("tick", |ctx, _| {
            ctx.push_var("ticks", json!(1));
            Ok(())
        });
        let (sink, _stream) = events::channel();
        let compiler = StepCompiler::new(&config, &registry, sink);

        let compiled = compiler.compile(&step(json!({
            "loop": [
                {"loop": [{"function": "tick"}], "count": 3, "loopValue": "inner"}
            ],
            "count": 2,
            "loopValue": "outer"
        })));

        let mut ctx = ExecutionContext::with_run_id("r1");
        compiled.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.var("ticks").and_then(Value::as_array).map(Vec::len), Some(6));
        assert_eq!(ctx.var("outer"), Some(&json!(1)));
        assert_eq!(ctx.var("inner"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_body_failure_aborts_loop() {
        let config = config();
        let registry = recording_registry();
        let (sink, mut stream) = events::channel();
        let compiler = StepCompiler::new(&config, &registry, sink);

        // The send has no connection to use, so the first iteration fails
        let compiled = compiler.compile(&step(json!({
            "loop": [{"function": "record"}, {"send": "ping"}],
            "count": 5,
            "loopValue": "item"
        })));

        let mut ctx = ExecutionContext::with_run_id("r1");
        let err = compiled.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected { .. }));
        assert_eq!(ctx.var("seen"), Some(&json!([0])));
        assert!(matches!(stream.drain().as_slice(), [EngineEvent::Error { .. }]));
    }

    #[tokio::test]
    async fn test_function_errors_are_not_propagated() {
        let config = config();
        let mut registry = FunctionRegistry::new();
        registry.register_fn("explode", |ctx, _| {
            ctx.set_var("ran", json!(true));
            Err(Error::Internal("boom".into()))
        });
        let (sink, mut stream) = events::channel();
        let compiler = StepCompiler::new(&config, &registry, sink);

        let mut ctx = ExecutionContext::with_run_id("r1");
        compiler
            .compile(&StepSpec::Function("explode".into()))
            .run(&mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.var("ran"), Some(&json!(true)));
        assert!(stream.drain().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_function_passes_through() {
        let config = config();
        let registry = FunctionRegistry::new();
        let (sink, mut stream) = events::channel();
        let compiler = StepCompiler::new(&config, &registry, sink);

        let mut ctx = ExecutionContext::with_run_id("r1");
        ctx.set_var("keep", json!("me"));
        compiler
            .compile(&StepSpec::Function("nobody".into()))
            .run(&mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.vars().len(), 1);
        assert_eq!(ctx.var("keep"), Some(&json!("me")));
        assert!(stream.drain().is_empty());
    }

    #[tokio::test]
    async fn test_think_uses_script_default() {
        let mut config = config();
        config.defaults = StepDefaults {
            think: ThinkDefaults {
                seconds: Some(0.02),
            },
        };
        let registry = FunctionRegistry::new();
        let (sink, mut stream) = events::channel();
        let compiler = StepCompiler::new(&config, &registry, sink);

        let compiled = compiler.compile(&StepSpec::Think(ThinkSpec { seconds: None }));
        let mut ctx = ExecutionContext::with_run_id("r1");
        let started = Instant::now();
        compiled.run(&mut ctx).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(stream.drain().is_empty());
    }

    #[tokio::test]
    async fn test_negative_think_does_not_wait() {
        let config = config();
        let registry = FunctionRegistry::new();
        let (sink, _stream) = events::channel();
        let compiler = StepCompiler::new(&config, &registry, sink);

        let compiled = compiler.compile(&StepSpec::Think(ThinkSpec {
            seconds: Some(-1.0),
        }));
        let mut ctx = ExecutionContext::with_run_id("r1");
        compiled.run(&mut ctx).await.unwrap();
    }
}
