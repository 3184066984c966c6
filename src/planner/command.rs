//! External planner invoked through the shell.
//!
//! The command line is a template: `{domain}`, `{problem}` and `{plan}` are
//! replaced by paths inside a scratch directory. Plans are read back from
//! `{plan}`, `{plan}.1`, `{plan}.2` … in the Fast Downward format.

use super::{Planner, PlannerResponse, RawPlan};
use crate::compiler::CompiledProblem;
use crate::core::error::PlannerError;
use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Exit codes a Fast Downward style search uses for unsolvable problems.
const NO_SOLUTION_CODES: [i32; 3] = [10, 11, 12];

const POLL_INTERVAL: Duration = Duration::from_millis(20);

const PLAN_FILE: &str = "sas_plan";

/// Runs an external planner binary via `bash -c`.
#[derive(Debug, Clone)]
pub struct CommandPlanner {
    template: String,
}

impl CommandPlanner {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Command line for one scratch directory.
    pub fn command_line(&self, dir: &Path) -> String {
        self.template
            .replace("{domain}", &dir.join("domain.pddl").display().to_string())
            .replace("{problem}", &dir.join("problem.pddl").display().to_string())
            .replace("{plan}", &dir.join(PLAN_FILE).display().to_string())
    }

    fn run(&self, problem: &CompiledProblem, timeout: Duration) -> Result<PlannerResponse, String> {
        let dir = tempfile::tempdir().map_err(|e| format!("scratch dir: {}", e))?;
        let path = dir.path();
        fs::write(path.join("domain.pddl"), problem.domain_text())
            .map_err(|e| format!("write domain: {}", e))?;
        fs::write(path.join("problem.pddl"), problem.problem_text())
            .map_err(|e| format!("write problem: {}", e))?;

        let stdout_path = path.join("stdout.log");
        let stderr_path = path.join("stderr.log");
        let stdout = File::create(&stdout_path).map_err(|e| format!("stdout log: {}", e))?;
        let stderr = File::create(&stderr_path).map_err(|e| format!("stderr log: {}", e))?;

        let line = self.command_line(path);
        tracing::debug!(command = %line, "spawning planner");
        let mut child = Command::new("bash")
            .arg("-c")
            .arg(&line)
            .current_dir(path)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| format!("failed to spawn bash: {}", e))?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().map_err(|e| format!("wait error: {}", e))? {
                break status;
            }
            if started.elapsed() > timeout {
                if let Err(e) = child.kill() {
                    tracing::warn!(error = %e, "failed to kill planner");
                }
                if let Err(e) = child.wait() {
                    tracing::warn!(error = %e, "failed to reap planner");
                }
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "planner killed");
                return Ok(PlannerResponse::timeout());
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let planner_output = fs::read_to_string(&stdout_path).unwrap_or_default();
        let planner_error = fs::read_to_string(&stderr_path).unwrap_or_default();
        let code = status.code().unwrap_or(-1);

        let mut response = if NO_SOLUTION_CODES.contains(&code) {
            PlannerResponse::no_solution()
        } else {
            let plans = read_plans(path)?;
            if plans.is_empty() {
                if status.success() {
                    PlannerResponse::no_solution()
                } else {
                    PlannerResponse::failed(PlannerError::RanError(format!("exit code {}", code)))
                }
            } else {
                PlannerResponse::solved(plans)
            }
        };
        response.planner_output = planner_output;
        response.planner_error = planner_error;
        Ok(response)
    }
}

impl Planner for CommandPlanner {
    fn name(&self) -> &str {
        "command"
    }

    fn plan(&self, problem: &CompiledProblem, timeout: Duration) -> PlannerResponse {
        self.run(problem, timeout)
            .unwrap_or_else(|e| PlannerResponse::failed(PlannerError::RanError(e)))
    }
}

/// Read every plan file the planner left in `dir`.
fn read_plans(dir: &Path) -> Result<Vec<RawPlan>, String> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .map_err(|e| format!("read {}: {}", dir.display(), e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(PLAN_FILE))
        })
        .collect();
    files.sort();
    let mut plans = Vec::with_capacity(files.len());
    for file in files {
        let text = fs::read_to_string(&file).map_err(|e| format!("read {}: {}", file.display(), e))?;
        plans.push(parse_plan_text(&text).map_err(|e| e.to_string())?);
    }
    Ok(plans)
}

/// Parse one plan file: `(action args)` lines and a `; cost = N` trailer.
pub fn parse_plan_text(text: &str) -> Result<RawPlan, PlannerError> {
    let mut actions = Vec::new();
    let mut cost = None;
    for line in text.lines().map(str::trim) {
        if line.starts_with('(') {
            actions.push(line.to_string());
        } else if let Some(rest) = line.strip_prefix(';') {
            if let Some(value) = rest.trim().strip_prefix("cost =") {
                let digits: String = value.trim().chars().take_while(char::is_ascii_digit).collect();
                cost = Some(
                    digits
                        .parse::<u64>()
                        .map_err(|_| PlannerError::ParseError(line.to_string()))?,
                );
            }
        }
    }
    let cost = cost.ok_or_else(|| PlannerError::ParseError("missing cost line".into()))?;
    Ok(RawPlan { cost, actions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::compiler::tests::basic_chain;
    use crate::core::options::CompileOptions;

    fn problem() -> CompiledProblem {
        compile(&basic_chain(), &CompileOptions::default()).unwrap()
    }

    #[test]
    fn test_fp017_parse_plan_text() {
        let plan = parse_plan_text("(ask db_link)\n(finderrors db_link)\n; cost = 100001 (general cost)\n").unwrap();
        assert_eq!(plan.cost, 100001);
        assert_eq!(plan.actions, vec!["(ask db_link)", "(finderrors db_link)"]);
        assert!(matches!(parse_plan_text("(a)\n"), Err(PlannerError::ParseError(_))));
    }

    #[test]
    fn test_fp017_command_line_placeholders() {
        let planner = CommandPlanner::new("fd {domain} {problem} --plan-file {plan}");
        let line = planner.command_line(Path::new("/tmp/x"));
        assert_eq!(line, "fd /tmp/x/domain.pddl /tmp/x/problem.pddl --plan-file /tmp/x/sas_plan");
    }

    #[test]
    fn test_fp017_command_reads_plans() {
        let planner = CommandPlanner::new(
            "test -s {domain} && printf '(b)\\n; cost = 9 (general cost)\\n' > {plan}.1 \
             && printf '(a)\\n; cost = 4 (general cost)\\n' > {plan}.2 && echo done",
        );
        let response = planner.plan(&problem(), Duration::from_secs(10));
        assert!(response.error.is_none(), "{:?}", response.error);
        assert_eq!(response.list_of_plans.len(), 2);
        assert_eq!(response.best().unwrap().actions, vec!["(a)"]);
        assert_eq!(response.planner_output.trim(), "done");
    }

    #[test]
    fn test_fp017_command_no_solution_exit_code() {
        let response = CommandPlanner::new("echo unsolvable >&2; exit 12").plan(&problem(), Duration::from_secs(10));
        assert!(response.is_no_solution);
        assert!(response.planner_error.contains("unsolvable"));
    }

    #[test]
    fn test_fp017_command_failure_and_timeout() {
        let failed = CommandPlanner::new("exit 3").plan(&problem(), Duration::from_secs(10));
        assert_eq!(failed.error, Some(PlannerError::RanError("exit code 3".into())));

        let slow = CommandPlanner::new("sleep 5").plan(&problem(), Duration::from_millis(100));
        assert!(slow.is_timeout);
    }

    #[test]
    fn test_fp017_timeout_kills_and_reaps_planner() {
        let started = std::time::Instant::now();
        let slow = CommandPlanner::new("sleep 30").plan(&problem(), Duration::from_millis(200));
        assert!(slow.is_timeout);
        assert!(slow.list_of_plans.is_empty());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
