//! FP-021: CLI subcommands: init, validate, compile, plan, debug, schema.

use crate::core::builder::Flow;
use crate::core::error::Error;
use crate::core::executor;
use crate::core::options::{CompileOptions, DebugFlag};
use crate::core::parser::{self, FlowFile};
use crate::core::types::ReferencePlan;
use crate::debug::{Debugger, Report};
use crate::plan::Plan;
use crate::planner::{CommandPlanner, Planner, PlannerResponse, SearchPlanner};
use clap::Subcommand;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new flow file
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a flow file without compiling it
    Validate {
        /// Path to the flow file
        #[arg(short, long, default_value = "flow.yaml")]
        file: PathBuf,
    },

    /// Compile a flow into a PDDL domain and problem
    Compile {
        /// Path to the flow file
        #[arg(short, long, default_value = "flow.yaml")]
        file: PathBuf,

        /// Write domain.pddl and problem.pddl here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Compile, call a planner, and print the lifted plan
    Plan {
        /// Path to the flow file
        #[arg(short, long, default_value = "flow.yaml")]
        file: PathBuf,

        /// Planner command line with {domain}, {problem} and {plan}
        /// placeholders (default: built-in search)
        #[arg(short, long)]
        planner: Option<String>,

        /// Planner timeout in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Check a reference plan for soundness, validity or optimality
    Debug {
        /// Path to the flow file
        #[arg(short, long, default_value = "flow.yaml")]
        file: PathBuf,

        /// SOUND, VALID or OPTIMAL
        #[arg(long, default_value = "SOUND")]
        flag: DebugFlag,

        /// Reference plan file (default: the flow's own reference)
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// Planner command line with {domain}, {problem} and {plan}
        /// placeholders (default: built-in search)
        #[arg(short, long)]
        planner: Option<String>,

        /// Planner timeout in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Exit non-zero unless the reference passes (for CI)
        #[arg(long)]
        check: bool,
    },

    /// Print the JSON Schema of the flow file format
    Schema,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Compile { file, out } => cmd_compile(&file, out.as_deref()),
        Commands::Plan {
            file,
            planner,
            timeout,
            json,
        } => cmd_plan(&file, planner.as_deref(), Duration::from_secs(timeout), json),
        Commands::Debug {
            file,
            flag,
            reference,
            planner,
            timeout,
            json,
            check,
        } => cmd_debug(
            &file,
            flag,
            reference.as_deref(),
            planner.as_deref(),
            Duration::from_secs(timeout),
            json,
            check,
        ),
        Commands::Schema => {
            println!("{}", flow_schema()?);
            Ok(())
        }
    }
}

const TEMPLATE: &str = r#"version: "1.0"
flow:
  name: my-flow
  operators:
    - name: FindErrors
      inputs:
        - parameters: [db_link]
      outputs:
        outcomes:
          - parameters: [errors]
    - name: FixErrors
      inputs:
        - parameters: [errors]
  goal_items:
    - goals:
        goal_name: FixErrors
options:
  goal_type: AND_AND
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let flow_path = path.join("flow.yaml");
    if flow_path.exists() {
        return Err(format!("{} already exists", flow_path.display()));
    }
    std::fs::create_dir_all(path).map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&flow_path, TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", flow_path.display(), e))?;

    println!("Initialized flow at {}", path.display());
    println!("  Created: {}", flow_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let (flow, _) = parse_and_validate(file)?;
    println!(
        "OK: {} ({} operators, {} data items, {} goal group(s))",
        flow.name,
        flow.operators.len(),
        flow.data_items().len(),
        flow.goal_items.len()
    );
    Ok(())
}

/// Parse and validate a flow file, printing every validation error.
fn parse_and_validate(file: &Path) -> Result<(Flow, CompileOptions), String> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
    match parser::load_flow(&content) {
        Ok(loaded) => Ok(loaded),
        Err(Error::Validation(errors)) => {
            for e in &errors {
                eprintln!("  ERROR: {}", e);
            }
            Err(format!("{} validation error(s)", errors.len()))
        }
        Err(e) => Err(e.to_string()),
    }
}

fn cmd_compile(file: &Path, out: Option<&Path>) -> Result<(), String> {
    let (flow, options) = parse_and_validate(file)?;
    let problem = crate::compiler::compile(&flow, &options).map_err(|e| e.to_string())?;
    match out {
        Some(dir) => {
            let (domain, prob) = executor::write_problem(&problem, dir).map_err(|e| e.to_string())?;
            println!(
                "Compiled {} ({} actions)",
                flow.name,
                problem.domain.actions.len()
            );
            println!("  Wrote: {}", domain.display());
            println!("  Wrote: {}", prob.display());
            println!("  Fingerprint: {}", problem.fingerprint());
        }
        None => {
            println!("{}", problem.domain_text());
            println!("{}", problem.problem_text());
        }
    }
    Ok(())
}

/// The planner a command line selects.
fn select_planner(template: Option<&str>) -> Box<dyn Planner> {
    match template {
        Some(t) => Box::new(CommandPlanner::new(t)),
        None => Box::new(SearchPlanner::new()),
    }
}

#[derive(Serialize)]
struct PlanReport<'a> {
    flow: &'a str,
    fingerprint: String,
    plan: Option<&'a Plan>,
    planner_response: &'a PlannerResponse,
}

fn cmd_plan(file: &Path, planner: Option<&str>, timeout: Duration, json: bool) -> Result<(), String> {
    let (flow, options) = parse_and_validate(file)?;
    let planner = select_planner(planner);
    let outcome =
        executor::plan_flow(&flow, &options, planner.as_ref(), timeout).map_err(|e| e.to_string())?;

    if json {
        let report = PlanReport {
            flow: &flow.name,
            fingerprint: outcome.problem.fingerprint(),
            plan: outcome.plan.as_ref(),
            planner_response: &outcome.response,
        };
        let text = serde_json::to_string_pretty(&report).map_err(|e| format!("JSON error: {}", e))?;
        println!("{}", text);
    }

    let Some(plan) = &outcome.plan else {
        return Err(no_plan_reason(&outcome.response));
    };
    if !json {
        println!(
            "Plan: {} ({} steps, {:.2}s)",
            flow.name,
            plan.len(),
            outcome.duration.as_secs_f64()
        );
        println!();
        println!("{}", plan);
    }
    Ok(())
}

fn no_plan_reason(response: &PlannerResponse) -> String {
    if response.is_timeout {
        "no plan found: planner timed out".to_string()
    } else if let Some(e) = &response.error {
        format!("no plan found: {}", e)
    } else {
        "no plan found".to_string()
    }
}

fn load_reference(path: &Path) -> Result<ReferencePlan, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_yaml_ng::from_str(&content).map_err(|e| format!("invalid reference plan {}: {}", path.display(), e))
}

fn cmd_debug(
    file: &Path,
    flag: DebugFlag,
    reference: Option<&Path>,
    planner: Option<&str>,
    timeout: Duration,
    json: bool,
    check: bool,
) -> Result<(), String> {
    let (flow, options) = parse_and_validate(file)?;
    let reference = match reference {
        Some(path) => load_reference(path)?,
        None => flow
            .reference
            .clone()
            .ok_or("no reference plan: pass --reference or set flow.reference")?,
    };
    let planner = select_planner(planner);
    let report = Debugger::new(planner.as_ref(), timeout)
        .debug(&flow, &options, &reference, flag)
        .map_err(|e| e.to_string())?;

    if json {
        let text = serde_json::to_string_pretty(&report).map_err(|e| format!("JSON error: {}", e))?;
        println!("{}", text);
    } else {
        print_report(&report, flag);
    }

    match report.determination {
        Some(true) => Ok(()),
        Some(false) if check => Err(format!("reference plan is not {}", flag)),
        None if check => Err(no_plan_reason(&report.planner_response)),
        _ => Ok(()),
    }
}

/// Display a debug report to stdout.
fn print_report(report: &Report, flag: DebugFlag) {
    match report.determination {
        Some(d) => println!("{}: {}", flag, d),
        None => println!("{}: unknown ({})", flag, no_plan_reason(&report.planner_response)),
    }
    for e in &report.invalid_steps {
        println!("  INVALID: {}", e);
    }
    if report.plan_diff_str.is_empty() {
        return;
    }
    println!();
    for line in &report.plan_diff_str {
        println!("  {}", line);
    }
}

/// JSON Schema of the flow file format.
fn flow_schema() -> Result<String, String> {
    let schema = schemars::schema_for!(FlowFile);
    serde_json::to_string_pretty(&schema).map_err(|e| format!("JSON error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
version: "1.0"
flow:
  name: errors
  operators:
    - name: FindErrors
      inputs:
        - parameters: [db_link]
      outputs:
        outcomes:
          - parameters: [errors]
    - name: FixErrors
      inputs:
        - parameters: [errors]
  goal_items:
    - goals:
        goal_name: FixErrors
  reference:
    plan:
      - name: ask
        parameters: [db_link]
      - name: FixErrors
        parameters: [errors]
"#;

    fn write_flow(dir: &Path, yaml: &str) -> PathBuf {
        let path = dir.join("flow.yaml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn test_fp021_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("test-project");
        cmd_init(&sub).unwrap();
        assert!(sub.join("flow.yaml").exists());
        cmd_validate(&sub.join("flow.yaml")).unwrap();
    }

    #[test]
    fn test_fp021_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("flow.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_fp021_validate_valid() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_flow(dir.path(), BASIC);
        cmd_validate(&file).unwrap();
    }

    #[test]
    fn test_fp021_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_flow(
            dir.path(),
            r#"
version: "1.0"
flow:
  name: broken
  operators:
    - name: Fix
  goal_items:
    - goals:
        goal_name: Ghost
"#,
        );
        let err = cmd_validate(&file).unwrap_err();
        assert!(err.contains("validation error(s)"));
    }

    #[test]
    fn test_fp021_validate_missing_file() {
        let err = cmd_validate(Path::new("/nonexistent/flow.yaml")).unwrap_err();
        assert!(err.contains("cannot read"));
    }

    #[test]
    fn test_fp021_compile_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_flow(dir.path(), BASIC);
        let out = dir.path().join("out");
        cmd_compile(&file, Some(&out)).unwrap();
        let domain = std::fs::read_to_string(out.join("domain.pddl")).unwrap();
        assert!(domain.contains("(define (domain errors)"));
        assert!(out.join("problem.pddl").exists());
    }

    #[test]
    fn test_fp021_plan_with_search() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_flow(dir.path(), BASIC);
        cmd_plan(&file, None, Duration::from_secs(60), false).unwrap();
        cmd_plan(&file, None, Duration::from_secs(60), true).unwrap();
    }

    #[test]
    fn test_fp021_plan_without_solution_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_flow(dir.path(), BASIC);
        let err = cmd_plan(&file, Some("exit 12"), Duration::from_secs(10), false).unwrap_err();
        assert!(err.contains("no plan found"));
    }

    #[test]
    fn test_fp021_debug_check() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_flow(dir.path(), BASIC);
        let t = Duration::from_secs(60);
        cmd_debug(&file, DebugFlag::Sound, None, None, t, false, false).unwrap();
        let err = cmd_debug(&file, DebugFlag::Sound, None, None, t, true, true).unwrap_err();
        assert!(err.contains("not SOUND"));
    }

    #[test]
    fn test_fp021_debug_reference_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_flow(dir.path(), BASIC);
        let reference = dir.path().join("reference.yaml");
        std::fs::write(
            &reference,
            r#"
plan:
  - name: ask
    parameters: [db_link]
  - name: FindErrors
    parameters: [db_link]
  - name: FixErrors
    parameters: [errors]
"#,
        )
        .unwrap();
        let t = Duration::from_secs(60);
        cmd_debug(&file, DebugFlag::Sound, Some(&reference), None, t, false, true).unwrap();
    }

    #[test]
    fn test_fp021_schema() {
        let schema = flow_schema().unwrap();
        assert!(schema.contains("\"FlowFile\""));
        assert!(schema.contains("goal_items"));
    }

    #[test]
    fn test_fp021_dispatch_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("dispatch-test");
        dispatch(Commands::Init { path: sub.clone() }).unwrap();
        assert!(sub.join("flow.yaml").exists());
    }

    #[test]
    fn test_fp021_dispatch_validate() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_flow(dir.path(), BASIC);
        dispatch(Commands::Validate { file }).unwrap();
    }

    #[test]
    fn test_fp021_dispatch_plan() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_flow(dir.path(), BASIC);
        dispatch(Commands::Plan {
            file,
            planner: None,
            timeout: 60,
            json: false,
        })
        .unwrap();
    }
}
