//! Session simulator
//!
//! Drives a [`Workbench`] over a scripted backend with a seeded random mix
//! of runs, dropped, duplicated and late completions, scenario switches and
//! query group edits, and checks the cache invariants after every step.

use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};
use scx_artifact::{ArtifactRef, VersionedName};
use scx_core::{
    CompletionOutcome, ExecutionResult, History, QueryGroup, Scenario, ScenarioId, Workbench,
    WorkbenchConfig,
};
use scx_test_utils::{scenario, setup_workbench_with, FakeBackend};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

const PLAIN_SCRIPT: &str = "analysis.py";
const ARTIFACT_SCRIPT: &str = "charts.py";
const FLAKY_SCRIPT: &str = "remote.py";

const BASE_NAMES: [&str; 4] = ["chart.html", "report.csv", "plot.png", "summary.json"];
const BASE_EPOCH: i64 = 1_700_000_000;

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Total operations to execute
    pub total_operations: u64,
    /// Number of scenarios to switch between
    pub scenarios: usize,
    /// Relative weight of each operation kind
    pub operation_distribution: OperationDistribution,
    /// Stop conditions
    pub stop_on_first_violation: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            total_operations: 10_000,
            scenarios: 3,
            operation_distribution: OperationDistribution::default(),
            stop_on_first_violation: false,
        }
    }
}

/// Relative weights for operation generation
#[derive(Debug, Clone, Serialize)]
pub struct OperationDistribution {
    pub run_script: u32,
    pub begin: u32,
    pub complete: u32,
    pub duplicate_completion: u32,
    pub timer_fires: u32,
    pub late_completion: u32,
    pub switch_scenario: u32,
    pub add_files: u32,
    pub remove_file: u32,
}

impl Default for OperationDistribution {
    fn default() -> Self {
        Self {
            run_script: 20,
            begin: 15,
            complete: 12,
            duplicate_completion: 5,
            timer_fires: 5,
            late_completion: 5,
            switch_scenario: 10,
            add_files: 18,
            remove_file: 10,
        }
    }
}

impl OperationDistribution {
    fn weights(&self) -> [u32; 9] {
        [
            self.run_script,
            self.begin,
            self.complete,
            self.duplicate_completion,
            self.timer_fires,
            self.late_completion,
            self.switch_scenario,
            self.add_files,
            self.remove_file,
        ]
    }
}

/// Which backend behavior a simulated run hits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScriptKind {
    Plain,
    WithArtifacts,
    TransportError,
}

/// All operations the simulator can generate
#[derive(Debug, Clone, Serialize)]
pub enum SimulatedOperation {
    /// Full run through the workbench
    RunScript { kind: ScriptKind, files: Vec<String> },
    /// Begin without driving the backend
    Begin,
    /// Terminal event for the active scenario
    Complete { files: Vec<String> },
    /// Same terminal event delivered twice
    DuplicateCompletion,
    /// The backend never answered; the safety deadline elapses
    TimerFires,
    /// Terminal event for a run that was already finalized
    LateCompletion,
    SwitchScenario { scenario: usize },
    AddFiles { query: String, files: Vec<String> },
    RemoveFile,
}

impl SimulatedOperation {
    fn kind(&self) -> &'static str {
        match self {
            Self::RunScript { .. } => "RunScript",
            Self::Begin => "Begin",
            Self::Complete { .. } => "Complete",
            Self::DuplicateCompletion => "DuplicateCompletion",
            Self::TimerFires => "TimerFires",
            Self::LateCompletion => "LateCompletion",
            Self::SwitchScenario { .. } => "SwitchScenario",
            Self::AddFiles { .. } => "AddFiles",
            Self::RemoveFile => "RemoveFile",
        }
    }
}

/// Types of invariant checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InvariantCheck {
    SingleRunningSlot,
    CompletionReplacesInPlace,
    CompletionAppends,
    BusyScenarioRejectsBegin,
    EmptyGroupRemoved,
    ViewNamesUnique,
    OtherScenariosUntouched,
}

/// A violation detected during simulation
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub operation_index: u64,
    pub operation: SimulatedOperation,
    pub check: InvariantCheck,
    pub details: String,
}

/// Statistics collected during simulation
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationStats {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub rejected_operations: u64,
    pub operations_by_type: HashMap<String, u64>,
}

impl OperationStats {
    fn record(&mut self, operation: &SimulatedOperation, result: &Result<String, String>) {
        self.total_operations += 1;
        *self
            .operations_by_type
            .entry(operation.kind().to_string())
            .or_insert(0) += 1;
        match result {
            Ok(_) => self.successful_operations += 1,
            Err(_) => self.rejected_operations += 1,
        }
    }
}

/// Final report from the simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    pub config: SimulatorConfig,
    pub stats: OperationStats,
    pub violations: Vec<Violation>,
    pub final_records: usize,
    pub final_groups: usize,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate a text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== SCX Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Scenarios: {}\n", self.config.scenarios));
        report.push_str(&format!("Total Operations: {}\n", self.stats.total_operations));
        report.push_str(&format!("Successful: {}\n", self.stats.successful_operations));
        report.push_str(&format!("Rejected: {}\n", self.stats.rejected_operations));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));
        report.push_str(&format!("Final Records: {}\n", self.final_records));
        report.push_str(&format!("Final Groups: {}\n", self.final_groups));

        let mut kinds: Vec<_> = self.stats.operations_by_type.iter().collect();
        kinds.sort();
        report.push_str("\n=== Operations ===\n");
        for (kind, count) in kinds {
            report.push_str(&format!("{kind}: {count}\n"));
        }

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!(
                    "{}. #{} {:?} {:?}: {}\n",
                    i + 1,
                    v.operation_index,
                    v.check,
                    v.operation,
                    v.details
                ));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        report
    }
}

/// Per-scenario state captured before an operation
struct Snapshot {
    histories: HashMap<ScenarioId, History>,
    groups: HashMap<ScenarioId, Vec<QueryGroup>>,
}

impl Snapshot {
    fn capture(workbench: &Workbench, scenarios: &[Scenario]) -> Self {
        Self {
            histories: scenarios
                .iter()
                .map(|s| (s.id.clone(), workbench.executions().history(&s.id)))
                .collect(),
            groups: scenarios
                .iter()
                .map(|s| (s.id.clone(), workbench.organizer().groups(&s.id)))
                .collect(),
        }
    }
}

/// Records violations for the operation being executed
struct Checker<'a> {
    operation_index: u64,
    operation: &'a SimulatedOperation,
    violations: Vec<Violation>,
}

impl Checker<'_> {
    fn check(&mut self, ok: bool, check: InvariantCheck, details: impl FnOnce() -> String) {
        if !ok {
            let details = details();
            tracing::error!(index = self.operation_index, ?check, %details, "invariant violated");
            self.violations.push(Violation {
                operation_index: self.operation_index,
                operation: self.operation.clone(),
                check,
                details,
            });
        }
    }
}

/// Run the SCX simulator
pub async fn run_simulator(config: SimulatorConfig) -> SimulatorReport {
    let backend = Arc::new(FakeBackend::new());
    backend.script_transport_error(FLAKY_SCRIPT, "connection reset by peer");

    // Expiry is driven explicitly; keep the real timer out of the way.
    let workbench_config = WorkbenchConfig::new().with_safety_timeout(Duration::from_secs(86_400));
    let workbench = setup_workbench_with(workbench_config, backend.clone());

    let scenarios: Vec<Scenario> = (0..config.scenarios.max(1))
        .map(|i| scenario(&format!("s{i}")))
        .collect();
    workbench.set_active_scenario(Some(scenarios[0].clone()));

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut stats = OperationStats::default();
    let mut violations = Vec::new();

    for i in 0..config.total_operations {
        let operation = generate_operation(&mut rng, &config, &workbench);
        let before = Snapshot::capture(&workbench, &scenarios);
        let target = match operation {
            SimulatedOperation::SwitchScenario { .. } => None,
            _ => workbench.scenarios().active_id(),
        };

        let mut checker = Checker {
            operation_index: i,
            operation: &operation,
            violations: Vec::new(),
        };
        let result =
            execute_operation(&workbench, &backend, &scenarios, &operation, &before, &mut checker)
                .await;
        check_invariants(&workbench, &scenarios, &before, target.as_ref(), &mut checker);

        stats.record(&operation, &result);
        let failed = !checker.violations.is_empty();
        violations.append(&mut checker.violations);
        if failed && config.stop_on_first_violation {
            break;
        }
    }

    let final_records = scenarios
        .iter()
        .map(|s| workbench.executions().history(&s.id).len())
        .sum();
    let final_groups = scenarios
        .iter()
        .map(|s| workbench.organizer().groups(&s.id).len())
        .sum();

    SimulatorReport {
        config,
        stats,
        violations,
        final_records,
        final_groups,
    }
}

/// Generate a random operation based on the distribution
fn generate_operation(
    rng: &mut StdRng,
    config: &SimulatorConfig,
    workbench: &Workbench,
) -> SimulatedOperation {
    let weights = config.operation_distribution.weights();
    let total: u32 = weights.iter().sum::<u32>().max(1);
    let mut roll = rng.random_range(0..total);
    let mut choice = weights.len() - 1;
    for (idx, w) in weights.iter().enumerate() {
        if roll < *w {
            choice = idx;
            break;
        }
        roll -= w;
    }

    match choice {
        0 => {
            let kind = match rng.random_range(0..4) {
                0 => ScriptKind::Plain,
                1 => ScriptKind::TransportError,
                _ => ScriptKind::WithArtifacts,
            };
            let files = if kind == ScriptKind::WithArtifacts {
                generate_files(rng)
            } else {
                Vec::new()
            };
            SimulatedOperation::RunScript { kind, files }
        }
        1 => SimulatedOperation::Begin,
        2 => SimulatedOperation::Complete {
            files: if rng.random_bool(0.4) {
                generate_files(rng)
            } else {
                Vec::new()
            },
        },
        3 => SimulatedOperation::DuplicateCompletion,
        4 => SimulatedOperation::TimerFires,
        5 => SimulatedOperation::LateCompletion,
        6 => SimulatedOperation::SwitchScenario {
            scenario: rng.random_range(0..config.scenarios.max(1)),
        },
        7 => {
            // Reusing a query text and timestamp merges into its group.
            let existing = workbench
                .scenarios()
                .active_id()
                .map(|id| workbench.organizer().groups(&id))
                .unwrap_or_default();
            let query = if !existing.is_empty() && rng.random_bool(0.3) {
                existing[rng.random_range(0..existing.len())].query_text.clone()
            } else {
                format!("query {}", rng.random_range(0..1_000u32))
            };
            SimulatedOperation::AddFiles {
                query,
                files: generate_files(rng),
            }
        }
        _ => SimulatedOperation::RemoveFile,
    }
}

fn generate_files(rng: &mut StdRng) -> Vec<String> {
    let count = rng.random_range(1..=3);
    (0..count)
        .map(|_| {
            let base = BASE_NAMES[rng.random_range(0..BASE_NAMES.len())];
            let (stem, ext) = base.split_once('.').unwrap_or((base, ""));
            if rng.random_bool(0.15) {
                base.to_string()
            } else {
                let epoch = BASE_EPOCH + rng.random_range(0..10_000i64);
                let seq = rng.random_range(1..=3u32);
                format!("{stem}_{epoch}_{seq}.{ext}")
            }
        })
        .collect()
}

fn result_with(files: &[String]) -> ExecutionResult {
    let now = Utc::now();
    ExecutionResult::success("simulated").with_artifacts(
        files
            .iter()
            .map(|f| ArtifactRef::new(f.clone(), now))
            .collect(),
    )
}

/// Execute against the workbench, checking operation-local expectations
async fn execute_operation(
    workbench: &Workbench,
    backend: &FakeBackend,
    scenarios: &[Scenario],
    operation: &SimulatedOperation,
    before: &Snapshot,
    checker: &mut Checker<'_>,
) -> Result<String, String> {
    let Some(active) = workbench.scenarios().active_id() else {
        return Err("no active scenario".to_string());
    };
    let history_before = before.histories.get(&active).cloned().unwrap_or_else(|| Arc::from(Vec::new()));
    let running_before = history_before.iter().find(|r| r.is_running).cloned();
    let executions = workbench.executions();

    match operation {
        SimulatedOperation::RunScript { kind, files } => {
            let path = match kind {
                ScriptKind::Plain => PLAIN_SCRIPT,
                ScriptKind::WithArtifacts => {
                    let names: Vec<&str> = files.iter().map(String::as_str).collect();
                    backend.script_output(ARTIFACT_SCRIPT, "charts", &names);
                    ARTIFACT_SCRIPT
                }
                ScriptKind::TransportError => FLAKY_SCRIPT,
            };
            let query = format!("run {}", checker.operation_index);
            match workbench.run_script(&active, path, Some(&query)).await {
                Ok(record) => {
                    checker.check(
                        running_before.is_none(),
                        InvariantCheck::BusyScenarioRejectsBegin,
                        || "run accepted while another was running".to_string(),
                    );
                    Ok(format!("return code {:?}", record.return_code))
                }
                Err(e) => {
                    checker.check(
                        running_before.is_some(),
                        InvariantCheck::BusyScenarioRejectsBegin,
                        || format!("idle scenario rejected run: {e}"),
                    );
                    Err(e.to_string())
                }
            }
        }
        SimulatedOperation::Begin => match executions.begin_execution(&active, "job.py") {
            Ok(id) => {
                checker.check(
                    running_before.is_none(),
                    InvariantCheck::BusyScenarioRejectsBegin,
                    || "begin accepted while another was running".to_string(),
                );
                Ok(id.to_string())
            }
            Err(e) => {
                checker.check(
                    running_before.is_some(),
                    InvariantCheck::BusyScenarioRejectsBegin,
                    || format!("idle scenario rejected begin: {e}"),
                );
                Err(e.to_string())
            }
        },
        SimulatedOperation::Complete { files } => {
            let outcome = workbench
                .complete_active_execution(result_with(files))
                .await
                .ok_or_else(|| "no active scenario".to_string())?;
            check_completion(workbench, &active, &history_before, running_before.as_ref().map(|r| r.id), outcome, checker);
            Ok(format!("{outcome:?}"))
        }
        SimulatedOperation::DuplicateCompletion => {
            let first = executions.complete_execution(&active, ExecutionResult::success("first"));
            check_completion(workbench, &active, &history_before, running_before.as_ref().map(|r| r.id), first, checker);

            let len = executions.history(&active).len();
            let second = executions.complete_execution(&active, ExecutionResult::success("again"));
            checker.check(
                second == CompletionOutcome::Appended { index: len },
                InvariantCheck::CompletionAppends,
                || format!("duplicate completion produced {second:?} with {len} records"),
            );
            Ok(format!("{first:?} then {second:?}"))
        }
        SimulatedOperation::TimerFires => {
            let Some(running) = running_before else {
                return Err("nothing running".to_string());
            };
            let expired = executions.expire(&active, running.id);
            let history = executions.history(&active);
            checker.check(
                expired
                    && history.len() == history_before.len()
                    && history.iter().any(|r| r.id == running.id && r.timed_out()),
                InvariantCheck::CompletionReplacesInPlace,
                || "safety expiry did not finalize the running record in place".to_string(),
            );
            Ok("expired".to_string())
        }
        SimulatedOperation::LateCompletion => {
            let Some(finished) = history_before.iter().rev().find(|r| !r.is_running) else {
                return Err("no finished run".to_string());
            };
            let outcome = executions.complete_execution_for(
                &active,
                finished.id,
                ExecutionResult::failure(1, "late"),
            );
            let len = history_before.len();
            checker.check(
                outcome == CompletionOutcome::Appended { index: len },
                InvariantCheck::CompletionAppends,
                || format!("late completion produced {outcome:?} with {len} records"),
            );
            Ok(format!("{outcome:?}"))
        }
        SimulatedOperation::SwitchScenario { scenario } => {
            let next = scenarios[*scenario % scenarios.len()].clone();
            workbench.set_active_scenario(Some(next.clone()));
            Ok(next.id.to_string())
        }
        SimulatedOperation::AddFiles { query, files } => {
            // Existing groups are matched by query text and their own timestamp.
            let timestamp = before
                .groups
                .get(&active)
                .and_then(|groups| groups.iter().find(|g| &g.query_text == query))
                .map_or_else(Utc::now, |g| g.timestamp);
            workbench
                .add_query_files_active(query, files.iter().cloned(), Some(timestamp))
                .map(|id| id.short())
                .ok_or_else(|| "no group created".to_string())
        }
        SimulatedOperation::RemoveFile => {
            let groups = before.groups.get(&active).cloned().unwrap_or_default();
            let Some(group) = groups.first() else {
                return Err("no groups".to_string());
            };
            let Some(file) = group.filenames.last() else {
                return Err("empty group".to_string());
            };
            let organizer = workbench.organizer();
            organizer.remove_files_from_query_group(&group.query_id, [file.as_str()]);

            if group.filenames.len() == 1 {
                let gone = organizer
                    .groups(&active)
                    .iter()
                    .all(|g| g.query_id != group.query_id);
                let lookup = organizer.find_query_group_by_file_in(&active, file);
                checker.check(
                    gone && lookup.map_or(true, |g| g.query_id != group.query_id),
                    InvariantCheck::EmptyGroupRemoved,
                    || format!("group {} survived losing its last file", group.query_id),
                );
            }
            Ok(file.clone())
        }
    }
}

fn check_completion(
    workbench: &Workbench,
    scenario_id: &ScenarioId,
    history_before: &History,
    running_before: Option<scx_core::ExecutionId>,
    outcome: CompletionOutcome,
    checker: &mut Checker<'_>,
) {
    let history = workbench.executions().history(scenario_id);
    match running_before {
        Some(id) => {
            let index = outcome.index();
            let in_place = outcome == CompletionOutcome::Replaced { index }
                && history.len() == history_before.len()
                && history.get(index).is_some_and(|r| r.id == id && !r.is_running);
            checker.check(in_place, InvariantCheck::CompletionReplacesInPlace, || {
                format!("expected in-place completion, got {outcome:?}")
            });
        }
        None => {
            let index = history_before.len();
            checker.check(
                outcome == CompletionOutcome::Appended { index } && history.len() == index + 1,
                InvariantCheck::CompletionAppends,
                || format!("expected append at {index}, got {outcome:?}"),
            );
        }
    }
}

/// Cross-scenario invariants checked after every operation
fn check_invariants(
    workbench: &Workbench,
    scenarios: &[Scenario],
    before: &Snapshot,
    target: Option<&ScenarioId>,
    checker: &mut Checker<'_>,
) {
    for scenario in scenarios {
        let id = &scenario.id;
        let history = workbench.executions().history(id);
        let running = history.iter().filter(|r| r.is_running).count();
        checker.check(running <= 1, InvariantCheck::SingleRunningSlot, || {
            format!("{running} running records in {id}")
        });

        let groups = workbench.organizer().groups(id);
        checker.check(
            groups.iter().all(|g| !g.is_empty()),
            InvariantCheck::EmptyGroupRemoved,
            || format!("empty raw group in {id}"),
        );

        let view = workbench.organizer().materialized(id);
        let mut seen = HashSet::new();
        let duplicate = view
            .iter()
            .flat_map(|g| g.artifacts.iter())
            .map(|a| VersionedName::parse(&a.filename).canonical().to_string())
            .find(|name| !seen.insert(name.clone()));
        checker.check(duplicate.is_none(), InvariantCheck::ViewNamesUnique, || {
            format!("{id} shows {} twice", duplicate.clone().unwrap_or_default())
        });

        if Some(id) != target {
            let untouched = before.histories.get(id).is_some_and(|h| *h == history)
                && before.groups.get(id).is_some_and(|g| *g == groups);
            checker.check(untouched, InvariantCheck::OtherScenariosUntouched, || {
                format!("{id} changed by an operation on another scenario")
            });
        }
    }
}
