//! End-to-end flows through the workbench against a scripted backend

use chrono::Utc;
use pretty_assertions::assert_eq;
use scx_core::{
    ExecutionError, ExecutionResult, JsonFileSelectionStore, ScenarioId, SelectionStore, Workbench,
    WorkbenchConfig, ABNORMAL_RETURN_CODE,
};
use scx_test_utils::{
    output_with_artifacts, scenario, setup_workbench, setup_workbench_with, FakeBackend,
};
use std::sync::Arc;
use std::time::Duration;

fn sid(id: &str) -> ScenarioId {
    ScenarioId::new(id)
}

#[tokio::test]
async fn run_script_records_and_groups_artifacts() {
    let backend = Arc::new(FakeBackend::new());
    backend.script_output(
        "revenue.py",
        "done",
        &["out/chart_1700000000_1.html", "out/table_1700000000_1.csv"],
    );
    let wb = setup_workbench(backend.clone());
    wb.set_active_scenario(Some(scenario("s1")));

    let record = wb
        .run_script_active("revenue.py", Some("find revenue"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(record.return_code, Some(0));
    assert_eq!(record.stdout, "done");
    assert_eq!(record.artifacts.len(), 2);

    let group = wb
        .organizer()
        .find_query_group_by_file("chart_1700000000_1.html")
        .unwrap();
    assert_eq!(group.query_text, "find revenue");
    assert_eq!(group.scenario_id, sid("s1"));
    assert!(wb.files().is_cached(&sid("s1")));
}

#[tokio::test]
async fn transport_error_becomes_terminal_record() {
    let backend = Arc::new(FakeBackend::new());
    backend.script_transport_error("flaky.py", "connection reset");
    let wb = setup_workbench(backend);

    let record = wb.run_script(&sid("s1"), "flaky.py", None).await.unwrap();

    assert_eq!(record.return_code, Some(ABNORMAL_RETURN_CODE));
    assert!(record.stderr.contains("connection reset"));
    assert!(!wb.executions().is_running(&sid("s1")));
    assert_eq!(wb.executions().history(&sid("s1")).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn hanging_backend_is_finalized_by_safety_timer() {
    let backend = Arc::new(FakeBackend::new());
    backend.hang_on("stuck.py");
    let wb = Arc::new(setup_workbench(backend));

    let runner = Arc::clone(&wb);
    let run = tokio::spawn(async move { runner.run_script(&sid("s1"), "stuck.py", None).await });

    tokio::time::sleep(Duration::from_secs(66)).await;

    let history = wb.executions().history(&sid("s1"));
    assert_eq!(history.len(), 1);
    assert!(!history[0].is_running);
    assert_eq!(history[0].return_code, Some(-1));
    assert!(history[0].timed_out());

    // The scenario is usable again while the hung call is still pending.
    assert!(wb.begin_active_execution("next.py").is_none());
    assert!(wb.executions().begin_execution(&sid("s1"), "next.py").is_ok());
    run.abort();
}

#[tokio::test]
async fn busy_scenario_rejects_second_run() {
    let backend = Arc::new(FakeBackend::new());
    let wb = setup_workbench(backend.clone());
    wb.set_active_scenario(Some(scenario("s1")));

    wb.begin_active_execution("first.py").unwrap().unwrap();
    let err = wb.run_script(&sid("s1"), "second.py", None).await.unwrap_err();

    assert!(matches!(err, ExecutionError::AlreadyRunning { .. }));
    assert_eq!(backend.run_calls(), 0);
}

#[tokio::test]
async fn scenario_switch_preserves_state() {
    let backend = Arc::new(FakeBackend::new());
    backend.script_output("a.py", "from s1", &["plot_1700000000_1.png"]);
    let wb = setup_workbench(backend);

    wb.set_active_scenario(Some(scenario("s1")));
    wb.run_script_active("a.py", Some("plot")).await.unwrap().unwrap();
    let s1_history = wb.executions().history(&sid("s1"));
    let s1_groups = wb.organizer().groups(&sid("s1"));

    wb.set_active_scenario(Some(scenario("s2")));
    wb.complete_active_execution(ExecutionResult::success("from s2"))
        .await
        .unwrap();
    assert_eq!(wb.executions().history(&sid("s2")).len(), 1);

    wb.set_active_scenario(Some(scenario("s1")));
    assert_eq!(wb.executions().history(&sid("s1")), s1_history);
    assert_eq!(wb.organizer().groups(&sid("s1")), s1_groups);
}

#[tokio::test]
async fn switching_to_cold_scenario_hydrates_in_background() {
    let backend = Arc::new(FakeBackend::new());
    backend.add_file("s2", "input.csv");
    let wb = setup_workbench(backend.clone());
    let mut listener = wb.files().listen(&sid("s2"));
    assert!(!wb.files().is_cached(&sid("s2")));

    wb.set_active_scenario(Some(scenario("s2")));

    let list = tokio::time::timeout(Duration::from_secs(5), listener.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(list.len(), 1);
    assert!(wb.files().is_cached(&sid("s2")));
    assert_eq!(backend.list_calls(), 1);

    // Already cached: switching back and forth does not reload.
    wb.set_active_scenario(Some(scenario("s1")));
    wb.set_active_scenario(Some(scenario("s2")));
    tokio::task::yield_now().await;
    assert!(listener.try_recv().is_none());
}

#[tokio::test]
async fn completion_with_artifacts_republishes_file_list() {
    let backend = Arc::new(FakeBackend::new());
    let wb = setup_workbench(backend.clone());
    wb.set_active_scenario(Some(scenario("s1")));
    assert!(wb.files().files(&sid("s1")).await.unwrap().is_empty());

    let mut listener = wb.files().listen(&sid("s1"));
    assert!(listener.recv().await.unwrap().is_empty());

    backend.add_file("s1", "chart_1700000000_1.html");
    wb.begin_active_execution("charts.py").unwrap().unwrap();
    let output = output_with_artifacts("done", &["chart_1700000000_1.html"]);
    wb.complete_active_execution(ExecutionResult::from_output(output, Utc::now()))
        .await
        .unwrap();

    let published = listener.try_recv().unwrap();
    assert!(published.find("chart_1700000000_1.html").is_some());
    assert_eq!(wb.files().snapshot(&sid("s1")).unwrap().len(), 1);
}

#[tokio::test]
async fn active_operations_without_selection_are_noops() {
    let wb = setup_workbench(Arc::new(FakeBackend::new()));

    assert!(wb.run_script_active("a.py", None).await.is_none());
    assert!(wb.begin_active_execution("a.py").is_none());
    assert!(wb
        .complete_active_execution(ExecutionResult::success("x"))
        .await
        .is_none());
    assert!(wb.add_query_files_active("q", ["a.csv"], None).is_none());
}

#[tokio::test]
async fn delete_artifact_updates_files_and_groups() {
    let backend = Arc::new(FakeBackend::new());
    backend.add_file("s1", "chart_1700000000_1.html");
    let wb = setup_workbench(backend.clone());
    wb.set_active_scenario(Some(scenario("s1")));
    let id = wb
        .add_query_files_active("q", ["chart_1700000000_1.html"], None)
        .unwrap();

    let files = wb
        .delete_artifact(&sid("s1"), "chart_1700000000_1.html")
        .await
        .unwrap();

    assert!(files.is_empty());
    assert_eq!(backend.delete_calls(), 1);
    assert!(wb.organizer().groups(&sid("s1")).iter().all(|g| g.query_id != id));
    assert!(wb
        .organizer()
        .find_query_group_by_file("chart_1700000000_1.html")
        .is_none());
}

#[tokio::test]
async fn delete_artifact_clears_file_from_every_group() {
    let backend = Arc::new(FakeBackend::new());
    backend.add_file("s1", "a.csv");
    let wb = setup_workbench(backend);
    let at = |secs| chrono::DateTime::from_timestamp(secs, 0);
    wb.organizer().add_query_files("q1", ["a.csv", "b.csv"], at(1), &sid("s1"));
    wb.organizer().add_query_files("q2", ["a.csv"], at(2), &sid("s1"));

    wb.delete_artifact(&sid("s1"), "a.csv").await.unwrap();

    assert!(wb.organizer().find_query_group_by_file_in(&sid("s1"), "a.csv").is_none());
    let view = wb.organizer().materialized(&sid("s1"));
    let names: Vec<&str> = view
        .iter()
        .flat_map(|g| g.artifacts.iter().map(|a| a.filename.as_str()))
        .collect();
    assert_eq!(names, vec!["b.csv"]);
}

#[tokio::test]
async fn failed_delete_keeps_group() {
    let backend = Arc::new(FakeBackend::new());
    let wb = setup_workbench(backend);
    wb.set_active_scenario(Some(scenario("s1")));
    wb.add_query_files_active("q", ["missing.csv"], None).unwrap();

    assert!(wb.delete_artifact(&sid("s1"), "missing.csv").await.is_err());
    assert!(wb.organizer().find_query_group_by_file("missing.csv").is_some());
}

#[tokio::test]
async fn restore_selection_uses_live_scenarios() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("selection.json");
    JsonFileSelectionStore::new(&path).save(Some(&sid("s2")));

    let backend = Arc::new(FakeBackend::with_scenarios(vec![scenario("s1"), scenario("s2")]));
    backend.add_file("s2", "input.csv");
    let config = WorkbenchConfig::new().with_selection_path(&path);
    let wb = Workbench::from_config(config, backend.clone()).unwrap();

    let restored = wb.restore_selection().await.unwrap().unwrap();
    assert_eq!(restored.id, sid("s2"));
    assert_eq!(wb.files().snapshot(&sid("s2")).unwrap().len(), 1);

    backend.set_scenarios(vec![scenario("s1")]);
    let wb = Workbench::from_config(
        WorkbenchConfig::new().with_selection_path(&path),
        backend,
    )
    .unwrap();
    assert!(wb.restore_selection().await.unwrap().is_none());
    assert_eq!(JsonFileSelectionStore::new(&path).load(), None);
}

#[tokio::test]
async fn clear_scenario_leaves_others() {
    let backend = Arc::new(FakeBackend::new());
    let wb = setup_workbench(backend);
    wb.run_script(&sid("s1"), "a.py", None).await.unwrap();
    wb.run_script(&sid("s2"), "b.py", None).await.unwrap();

    wb.clear_scenario(&sid("s1")).await;
    assert!(wb.executions().history(&sid("s1")).is_empty());
    assert_eq!(wb.executions().history(&sid("s2")).len(), 1);

    wb.clear_all_data();
    assert!(wb.executions().history(&sid("s2")).is_empty());
}

#[tokio::test]
async fn stop_execution_reaches_backend() {
    let backend = Arc::new(FakeBackend::new());
    let wb = setup_workbench(backend.clone());
    let ack = wb.stop_execution().await.unwrap();
    assert_eq!(ack.message, "stop requested");
    assert_eq!(backend.stop_calls(), 1);
}

#[test]
fn invalid_config_is_rejected() {
    let config = WorkbenchConfig::new().with_safety_timeout(Duration::ZERO);
    let result = Workbench::new(
        config,
        Arc::new(FakeBackend::new()),
        Arc::new(scx_core::MemorySelectionStore::new()),
    );
    assert!(result.is_err());

    let wb = setup_workbench_with(
        WorkbenchConfig::new().with_max_cached_scenarios(2),
        Arc::new(FakeBackend::new()),
    );
    assert_eq!(wb.config().file_cache.max_scenarios, Some(2));
}
