//! CLI command handling
//!
//! Loads scripts, drives concurrent runs and formats output.

pub mod report;

use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use futures_util::future::join_all;

use crate::commands::Commands;
use crate::common::config::Settings;
use crate::common::{paths, Error, Result};
use crate::engine::{events, Engine, ExecutionContext, FunctionRegistry, Scenario, TcpConnector};
use crate::script::{load_script, LoopSpec, ScenarioSpec, Script, StepSpec};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            script,
            scenario,
            runs,
            target,
            port,
            json,
        } => {
            let settings = Settings::load()?;
            let mut loaded = load_script(&script)?;
            loaded.apply_settings(&settings);
            loaded.override_target(target, port);

            let selected = select_scenarios(&loaded, scenario.as_deref())?;
            run_scenarios(&loaded, selected, &settings, runs.max(1), json).await
        }

        Commands::Check { script } => check(&script),

        Commands::Config => {
            match paths::config_path() {
                Some(path) if path.exists() => println!("Settings file: {}", path.display()),
                Some(path) => println!("Settings file: {} (not present)", path.display()),
                None => println!("Settings file: unavailable on this platform"),
            }

            let settings = Settings::load()?;
            println!();
            println!("Effective settings:");
            match settings.defaults.think_secs {
                Some(secs) => println!("  defaults.think_secs         = {}", secs),
                None => println!("  defaults.think_secs         = (unset, 0)"),
            }
            println!(
                "  connection.read_buffer_bytes = {}",
                settings.connection.read_buffer_bytes
            );
            println!("  logging.file                = {}", settings.logging.file);
            Ok(())
        }
    }
}

/// Processors available to scripts run from the command line
pub fn builtin_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry.register_fn("dumpContext", |ctx, _events| {
        tracing::info!(
            run_id = %ctx.run_id(),
            vars = %serde_json::Value::Object(ctx.vars().clone()),
            "context"
        );
        Ok(())
    });
    registry
}

fn select_scenarios<'a>(script: &'a Script, name: Option<&str>) -> Result<Vec<&'a ScenarioSpec>> {
    match name {
        Some(name) => Ok(vec![script.scenario(name)?]),
        None => Ok(script.scenarios.iter().collect()),
    }
}

async fn run_scenarios(
    script: &Script,
    selected: Vec<&ScenarioSpec>,
    settings: &Settings,
    runs: usize,
    json: bool,
) -> Result<()> {
    let engine = Engine::new(script.config.clone(), builtin_registry()).with_connector(Arc::new(
        TcpConnector::new(settings.connection.read_buffer_bytes),
    ));

    let config = engine.config();
    let (sink, stream) = events::channel();
    let scenarios: Vec<Arc<Scenario>> = selected
        .into_iter()
        .map(|spec| Arc::new(engine.create_scenario(spec, sink.clone())))
        .collect();
    // The collector finishes once every compiled scenario is dropped
    drop(sink);

    if !json {
        println!(
            "Running {} run(s) of {} scenario(s) against {}:{}",
            runs,
            scenarios.len(),
            config.target,
            config.tcp.port
        );
    }

    let collector = tokio::spawn(report::collect(stream));

    let handles = (0..runs).map(|index| {
        let scenario = Arc::clone(&scenarios[index % scenarios.len()]);
        tokio::spawn(async move {
            let name = scenario.name().unwrap_or("<unnamed>").to_string();
            (name, scenario.run(ExecutionContext::new()).await)
        })
    });
    let results = join_all(handles).await;
    drop(scenarios);

    let mut failed = 0;
    for result in results {
        match result {
            Ok((scenario, Ok(context))) => {
                tracing::debug!(%scenario, run_id = %context.run_id(), "run succeeded");
            }
            Ok((scenario, Err(failure))) => {
                failed += 1;
                tracing::warn!(
                    %scenario,
                    run_id = %failure.context.run_id(),
                    error = %failure.error,
                    "run failed"
                );
            }
            Err(e) => {
                failed += 1;
                tracing::error!(error = %e, "run task aborted");
            }
        }
    }

    let mut summary = collector
        .await
        .map_err(|e| Error::Internal(format!("summary collector failed: {}", e)))?;
    summary.runs = runs;
    summary.failed_runs = failed;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        report::print_summary(&summary);
    }

    if failed > 0 {
        Err(Error::RunsFailed {
            failed,
            total: runs,
        })
    } else {
        Ok(())
    }
}

/// Load and compile a script, then print its step tree
fn check(path: &Path) -> Result<()> {
    let script = load_script(path)?;
    let engine = Engine::new(script.config.clone(), builtin_registry());
    let (sink, _stream) = events::channel();

    println!(
        "{} {} (target {}:{})",
        "✓".green().bold(),
        path.display(),
        engine.config().target,
        engine.config().tcp.port
    );
    if !engine.registry().is_empty() {
        println!("Functions: {}", engine.registry().names().join(", "));
    }

    for (index, spec) in script.scenarios.iter().enumerate() {
        let compiled = engine.create_scenario(spec, sink.clone());
        let name = compiled
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("scenario {}", index + 1));
        if compiled.is_empty() {
            println!("\n{} {}", name.cyan(), "(no steps)".dimmed());
        } else {
            println!("\n{} ({} steps)", name.cyan(), compiled.len());
        }
        print_flow(&spec.flow, engine.registry(), "", 1);
    }
    println!();

    Ok(())
}

fn print_flow(flow: &[StepSpec], registry: &FunctionRegistry, prefix: &str, depth: usize) {
    let indent = "  ".repeat(depth);
    for (index, step) in flow.iter().enumerate() {
        let number = format!("{}{}", prefix, index + 1);
        let line = format!("{}{}. {}", indent, number, step);

        match step {
            StepSpec::Function(name) if registry.processor(name).is_none() => {
                println!("{} {}", line, "(not registered, skipped)".dimmed());
            }
            StepSpec::Noop => println!("{}", line.dimmed()),
            StepSpec::Loop(LoopSpec {
                steps,
                count,
                over,
                while_true,
                ..
            }) => {
                let unresolved = over.is_none()
                    && *count < 0
                    && while_true
                        .as_deref()
                        .map_or(true, |name| registry.predicate(name).is_none());
                if unresolved {
                    println!("{} {}", line, "(no registered predicate, never runs)".yellow());
                } else {
                    println!("{}", line);
                }
                print_flow(steps, registry, &format!("{}.", number), depth + 1);
            }
            _ => println!("{}", line),
        }
    }
}
