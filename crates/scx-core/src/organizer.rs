//! Query groups of produced files
//!
//! Every query that produced files gets a [`QueryGroup`] in its scenario.
//! Raw groups keep every filename ever added; the materialized view shown
//! to the UI keeps only the latest version of each canonical name across
//! all of a scenario's groups.

use crate::types::ScenarioId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scx_artifact::{
    file_name, latest_versions, uses_arrival_fallback, ArtifactRef, QueryId, VersionKey,
};
use scx_notify::{Listener, Notifier, Subscription};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Files produced by one query, as recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryGroup {
    /// Stable group identifier
    pub query_id: QueryId,
    /// Query text that produced the files
    pub query_text: String,
    /// Query time
    pub timestamp: DateTime<Utc>,
    /// Owning scenario
    pub scenario_id: ScenarioId,
    /// Unique filenames in order of first arrival
    pub filenames: Vec<String>,
}

impl QueryGroup {
    /// Whether the group references `filename` (full path or bare name)
    #[must_use]
    pub fn contains(&self, filename: &str) -> bool {
        self.filenames.iter().any(|f| same_file(f, filename))
    }

    /// Number of filenames
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    /// Whether the group has no files
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }
}

/// A group as presented: deduplicated artifacts only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedGroup {
    pub query_id: QueryId,
    pub query_text: String,
    pub timestamp: DateTime<Utc>,
    pub scenario_id: ScenarioId,
    pub artifacts: Vec<ArtifactRef>,
}

/// Immutable materialized view of one scenario
pub type GroupView = Arc<[MaterializedGroup]>;

fn same_file(stored: &str, wanted: &str) -> bool {
    stored == wanted || file_name(stored) == file_name(wanted)
}

fn empty_view() -> GroupView {
    Arc::from(Vec::new())
}

#[derive(Default)]
struct ScenarioGroups {
    /// Creation order
    groups: Vec<QueryGroup>,
    /// First arrival of each filename in this scenario
    arrivals: HashMap<String, DateTime<Utc>>,
}

impl ScenarioGroups {
    fn position(&self, query_id: &QueryId) -> Option<usize> {
        self.groups.iter().position(|g| g.query_id == *query_id)
    }

    fn note_arrivals<'a>(&mut self, filenames: impl IntoIterator<Item = &'a String>, now: DateTime<Utc>) {
        for f in filenames {
            self.arrivals.entry(f.clone()).or_insert(now);
        }
    }

    /// Append filenames not already in `group`; returns how many were new
    fn merge(group: &mut QueryGroup, filenames: &[String]) -> usize {
        let before = group.filenames.len();
        for f in filenames {
            if !group.filenames.contains(f) {
                group.filenames.push(f.clone());
            }
        }
        group.filenames.len() - before
    }

    fn forget_unreferenced(&mut self) {
        let groups = &self.groups;
        self.arrivals
            .retain(|f, _| groups.iter().any(|g| g.filenames.contains(f)));
    }

    fn materialize(&self, scenario_id: &ScenarioId) -> GroupView {
        // (group index, artifact) in arrival order; ties keep creation order
        let mut entries: Vec<(usize, ArtifactRef)> = self
            .groups
            .iter()
            .enumerate()
            .flat_map(|(idx, g)| {
                g.filenames.iter().map(move |f| (idx, f))
            })
            .map(|(idx, f)| {
                let arrived_at = self.arrivals.get(f).copied().unwrap_or(self.groups[idx].timestamp);
                (idx, ArtifactRef::new(f.clone(), arrived_at))
            })
            .collect();
        entries.sort_by_key(|(_, a)| a.arrived_at);

        let keys: Vec<VersionKey> = entries.iter().map(|(_, a)| a.version_key()).collect();
        if uses_arrival_fallback(&keys) {
            tracing::debug!(
                scenario = %scenario_id,
                "versioned and unversioned files share a name; arrival time decided"
            );
        }

        let survivors = latest_versions(entries, |(_, a)| a.version_key());

        let mut per_group: Vec<Vec<ArtifactRef>> = vec![Vec::new(); self.groups.len()];
        for (idx, artifact) in survivors {
            per_group[idx].push(artifact);
        }

        let view: Vec<MaterializedGroup> = self
            .groups
            .iter()
            .zip(per_group)
            .filter(|(_, artifacts)| !artifacts.is_empty())
            .map(|(g, artifacts)| MaterializedGroup {
                query_id: g.query_id,
                query_text: g.query_text.clone(),
                timestamp: g.timestamp,
                scenario_id: g.scenario_id.clone(),
                artifacts,
            })
            .collect();
        Arc::from(view)
    }
}

/// Per-scenario query groups with a deduplicated view
pub struct ArtifactOrganizer {
    state: Mutex<HashMap<ScenarioId, ScenarioGroups>>,
    /// Last publication version; only advanced with `state` held
    version: AtomicU64,
    notifier: Notifier<ScenarioId, GroupView>,
}

impl Default for ArtifactOrganizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactOrganizer {
    /// Create an empty organizer
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            version: AtomicU64::new(0),
            notifier: Notifier::new(),
        }
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record files produced by `query_text` in `scenario_id`
    ///
    /// The group id is derived from scenario, query text and timestamp, so
    /// repeating the call merges into the same group. Returns `None` if no
    /// group exists afterwards (nothing new to record).
    pub fn add_query_files<I, S>(
        &self,
        query_text: &str,
        filenames: I,
        timestamp: Option<DateTime<Utc>>,
        scenario_id: &ScenarioId,
    ) -> Option<QueryId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let query_id = QueryId::derive(scenario_id.as_str(), query_text, timestamp);
        let filenames: Vec<String> = filenames.into_iter().map(Into::into).collect();
        let now = Utc::now();

        let (version, view) = {
            let mut state = self.state.lock();
            let scenario = state.entry(scenario_id.clone()).or_default();

            let added = match scenario.position(&query_id) {
                Some(pos) => ScenarioGroups::merge(&mut scenario.groups[pos], &filenames),
                None => {
                    let mut group = QueryGroup {
                        query_id,
                        query_text: query_text.to_string(),
                        timestamp,
                        scenario_id: scenario_id.clone(),
                        filenames: Vec::new(),
                    };
                    let added = ScenarioGroups::merge(&mut group, &filenames);
                    if added == 0 {
                        tracing::debug!(scenario = %scenario_id, "no files for query; group not created");
                        return None;
                    }
                    scenario.groups.push(group);
                    added
                }
            };
            if added == 0 {
                return Some(query_id);
            }
            scenario.note_arrivals(&filenames, now);
            tracing::debug!(scenario = %scenario_id, query = %query_id.short(), added, "query files recorded");
            (self.next_version(), scenario.materialize(scenario_id))
        };

        self.notifier
            .publish_versioned(scenario_id.clone(), version, view);
        Some(query_id)
    }

    /// Add files to an existing group
    ///
    /// Returns `false` if the group does not exist.
    pub fn add_files_to_existing_query_group<I, S>(&self, query_id: &QueryId, filenames: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filenames: Vec<String> = filenames.into_iter().map(Into::into).collect();
        self.mutate_group(query_id, |scenario, pos| {
            let added = ScenarioGroups::merge(&mut scenario.groups[pos], &filenames);
            scenario.note_arrivals(&filenames, Utc::now());
            added > 0
        })
        .is_some()
    }

    /// Remove files from a group; removing the last file deletes the group
    ///
    /// Returns `false` if the group does not exist.
    pub fn remove_files_from_query_group<I, S>(&self, query_id: &QueryId, filenames: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let filenames: Vec<S> = filenames.into_iter().collect();
        self.mutate_group(query_id, |scenario, pos| {
            let group = &mut scenario.groups[pos];
            let before = group.filenames.len();
            group
                .filenames
                .retain(|f| !filenames.iter().any(|r| same_file(f, r.as_ref())));
            let removed = before - group.filenames.len();
            if group.filenames.is_empty() {
                tracing::info!(query = %query_id.short(), "last file removed; query group deleted");
                scenario.groups.remove(pos);
            }
            scenario.forget_unreferenced();
            removed > 0
        })
        .is_some()
    }

    /// Remove `filename` from every group of `scenario_id` that references
    /// it, deleting groups left empty
    ///
    /// Returns the number of groups that lost the file.
    pub fn remove_file_from_scenario(&self, scenario_id: &ScenarioId, filename: &str) -> usize {
        let (touched, version, view) = {
            let mut state = self.state.lock();
            let Some(scenario) = state.get_mut(scenario_id) else {
                return 0;
            };
            let mut touched = 0;
            for group in &mut scenario.groups {
                let before = group.filenames.len();
                group.filenames.retain(|f| !same_file(f, filename));
                if group.filenames.len() != before {
                    touched += 1;
                }
            }
            if touched == 0 {
                return 0;
            }
            scenario.groups.retain(|g| {
                if g.is_empty() {
                    tracing::info!(query = %g.query_id.short(), "last file removed; query group deleted");
                }
                !g.is_empty()
            });
            scenario.forget_unreferenced();
            (touched, self.next_version(), scenario.materialize(scenario_id))
        };

        tracing::debug!(scenario = %scenario_id, file = filename, groups = touched, "file removed from query groups");
        self.notifier
            .publish_versioned(scenario_id.clone(), version, view);
        touched
    }

    /// Delete a group
    pub fn remove_query_group(&self, query_id: &QueryId) -> Option<QueryGroup> {
        let mut removed = None;
        self.mutate_group(query_id, |scenario, pos| {
            removed = Some(scenario.groups.remove(pos));
            scenario.forget_unreferenced();
            true
        })?;
        removed
    }

    /// Locate the group holding `query_id` and apply `f`; publishes the
    /// scenario's view when `f` reports a change
    fn mutate_group<F>(&self, query_id: &QueryId, f: F) -> Option<()>
    where
        F: FnOnce(&mut ScenarioGroups, usize) -> bool,
    {
        let (scenario_id, version, view) = {
            let mut state = self.state.lock();
            let (scenario_id, scenario, pos) = state
                .iter_mut()
                .find_map(|(id, s)| s.position(query_id).map(|pos| (id.clone(), s, pos)))?;
            if !f(scenario, pos) {
                return Some(());
            }
            let view = scenario.materialize(&scenario_id);
            (scenario_id, self.next_version(), view)
        };
        self.notifier.publish_versioned(scenario_id, version, view);
        Some(())
    }

    /// Most recent group, in any scenario, that references `filename`
    ///
    /// Linear scan over every group.
    #[must_use]
    pub fn find_query_group_by_file(&self, filename: &str) -> Option<QueryGroup> {
        let state = self.state.lock();
        state
            .values()
            .flat_map(|s| s.groups.iter())
            .filter(|g| g.contains(filename))
            .max_by_key(|g| g.timestamp)
            .cloned()
    }

    /// Most recent group in `scenario_id` that references `filename`
    #[must_use]
    pub fn find_query_group_by_file_in(
        &self,
        scenario_id: &ScenarioId,
        filename: &str,
    ) -> Option<QueryGroup> {
        let state = self.state.lock();
        state
            .get(scenario_id)?
            .groups
            .iter()
            .filter(|g| g.contains(filename))
            .max_by_key(|g| g.timestamp)
            .cloned()
    }

    /// Raw groups of `scenario_id` in creation order
    #[must_use]
    pub fn groups(&self, scenario_id: &ScenarioId) -> Vec<QueryGroup> {
        self.state
            .lock()
            .get(scenario_id)
            .map(|s| s.groups.clone())
            .unwrap_or_default()
    }

    /// Deduplicated view of `scenario_id`
    #[must_use]
    pub fn materialized(&self, scenario_id: &ScenarioId) -> GroupView {
        self.state
            .lock()
            .get(scenario_id)
            .map_or_else(empty_view, |s| s.materialize(scenario_id))
    }

    /// Observe `scenario_id`'s view; replays the current one
    pub fn subscribe<F>(&self, scenario_id: &ScenarioId, callback: F) -> Subscription
    where
        F: Fn(&GroupView) + Send + Sync + 'static,
    {
        self.notifier
            .seed(scenario_id.clone(), self.materialized(scenario_id));
        self.notifier.subscribe(scenario_id.clone(), callback)
    }

    /// Channel of `scenario_id`'s views
    pub fn listen(&self, scenario_id: &ScenarioId) -> Listener<GroupView> {
        self.notifier
            .seed(scenario_id.clone(), self.materialized(scenario_id));
        self.notifier.listen(scenario_id.clone())
    }

    /// Drop every group of `scenario_id`
    pub fn clear_scenario(&self, scenario_id: &ScenarioId) {
        let (removed, version) = {
            let mut state = self.state.lock();
            (state.remove(scenario_id), self.next_version())
        };
        if removed.is_some() {
            tracing::info!(scenario = %scenario_id, "query groups cleared");
        }
        self.notifier
            .publish_versioned(scenario_id.clone(), version, empty_view());
    }

    /// Drop every group everywhere
    pub fn clear_all(&self) {
        let version = {
            let mut state = self.state.lock();
            state.clear();
            self.next_version()
        };
        tracing::info!("all query groups cleared");
        for scenario_id in self.notifier.scopes() {
            self.notifier
                .publish_versioned(scenario_id, version, empty_view());
        }
    }
}

impl std::fmt::Debug for ArtifactOrganizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactOrganizer")
            .field("scenarios", &self.state.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn s(id: &str) -> ScenarioId {
        ScenarioId::new(id)
    }

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn view_names(view: &GroupView) -> Vec<Vec<String>> {
        view.iter()
            .map(|g| g.artifacts.iter().map(|a| a.filename.clone()).collect())
            .collect()
    }

    #[test]
    fn add_then_find_by_file() {
        let org = ArtifactOrganizer::new();
        let s1 = s("s1");
        let id = org
            .add_query_files("find revenue", ["chart_1700000000_1.html"], at(1_700_000_000), &s1)
            .unwrap();

        let group = org.find_query_group_by_file("chart_1700000000_1.html").unwrap();
        assert_eq!(group.query_id, id);
        assert_eq!(group.query_text, "find revenue");
        assert_eq!(group.scenario_id, s1);
    }

    #[test]
    fn same_query_merges_unique_files() {
        let org = ArtifactOrganizer::new();
        let s1 = s("s1");
        let a = org.add_query_files("q", ["a.csv", "b.csv"], at(10), &s1).unwrap();
        let b = org.add_query_files("q", ["b.csv", "c.csv"], at(10), &s1).unwrap();

        assert_eq!(a, b);
        let groups = org.groups(&s1);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].filenames, vec!["a.csv", "b.csv", "c.csv"]);
    }

    #[test]
    fn empty_file_list_creates_nothing() {
        let org = ArtifactOrganizer::new();
        let s1 = s("s1");
        assert!(org
            .add_query_files("q", Vec::<String>::new(), at(10), &s1)
            .is_none());
        assert!(org.groups(&s1).is_empty());
    }

    #[test]
    fn view_keeps_latest_version() {
        let org = ArtifactOrganizer::new();
        let s1 = s("s1");
        org.add_query_files(
            "q",
            ["report_1700000000_1.csv", "report_1700000500_2.csv"],
            at(1_700_000_000),
            &s1,
        );

        let view = org.materialized(&s1);
        assert_eq!(view_names(&view), vec![vec!["report_1700000500_2.csv"]]);
        assert_eq!(org.groups(&s1)[0].len(), 2);
    }

    #[test]
    fn superseded_group_is_hidden_but_kept() {
        let org = ArtifactOrganizer::new();
        let s1 = s("s1");
        org.add_query_files("first", ["chart_1700000000_1.html"], at(100), &s1);
        org.add_query_files("second", ["chart_1700000900_1.html"], at(200), &s1);

        let view = org.materialized(&s1);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].query_text, "second");
        assert_eq!(org.groups(&s1).len(), 2);
    }

    #[test]
    fn removing_last_file_deletes_group() {
        let org = ArtifactOrganizer::new();
        let s1 = s("s1");
        let id = org.add_query_files("q", ["x_1700000000_1.png"], at(5), &s1).unwrap();

        assert!(org.remove_files_from_query_group(&id, ["x_1700000000_1.png"]));
        assert!(org.groups(&s1).is_empty());
        assert!(org.find_query_group_by_file("x_1700000000_1.png").is_none());
        assert!(!org.remove_files_from_query_group(&id, ["x_1700000000_1.png"]));
    }

    #[test]
    fn add_to_existing_group() {
        let org = ArtifactOrganizer::new();
        let s1 = s("s1");
        let id = org.add_query_files("q", ["a.csv"], at(5), &s1).unwrap();

        assert!(org.add_files_to_existing_query_group(&id, ["b.csv"]));
        assert_eq!(org.groups(&s1)[0].filenames, vec!["a.csv", "b.csv"]);

        let unknown = QueryId::derive("s9", "nope", Utc::now());
        assert!(!org.add_files_to_existing_query_group(&unknown, ["c.csv"]));
    }

    #[test]
    fn remove_query_group_returns_it() {
        let org = ArtifactOrganizer::new();
        let s1 = s("s1");
        let id = org.add_query_files("q", ["a.csv"], at(5), &s1).unwrap();

        let removed = org.remove_query_group(&id).unwrap();
        assert_eq!(removed.filenames, vec!["a.csv"]);
        assert!(org.remove_query_group(&id).is_none());
    }

    #[test]
    fn lookup_prefers_most_recent_group() {
        let org = ArtifactOrganizer::new();
        org.add_query_files("old", ["shared.csv"], at(1), &s("s1"));
        org.add_query_files("new", ["shared.csv"], at(2), &s("s2"));

        assert_eq!(org.find_query_group_by_file("shared.csv").unwrap().query_text, "new");
        assert_eq!(
            org.find_query_group_by_file_in(&s("s1"), "shared.csv").unwrap().query_text,
            "old"
        );
    }

    #[test]
    fn removing_file_from_scenario_clears_every_group() {
        let org = ArtifactOrganizer::new();
        let s1 = s("s1");
        org.add_query_files("q1", ["a.csv", "b.csv"], at(1), &s1);
        org.add_query_files("q2", ["a.csv"], at(2), &s1);
        org.add_query_files("q3", ["a.csv"], at(3), &s("s2"));

        assert_eq!(org.remove_file_from_scenario(&s1, "a.csv"), 2);

        assert!(org.find_query_group_by_file_in(&s1, "a.csv").is_none());
        let groups = org.groups(&s1);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].filenames, vec!["b.csv"]);
        assert!(org.find_query_group_by_file_in(&s("s2"), "a.csv").is_some());
        assert_eq!(org.remove_file_from_scenario(&s1, "a.csv"), 0);
    }

    #[test]
    fn concurrent_writers_leave_latest_view_replayed() {
        let org = Arc::new(ArtifactOrganizer::new());
        let s1 = s("s1");

        let writers: Vec<_> = (0..8)
            .map(|w| {
                let org = Arc::clone(&org);
                let s1 = s1.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        org.add_query_files(&format!("q{w}-{i}"), [format!("f{w}_{i}.csv")], at(1), &s1);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let mut listener = org.listen(&s1);
        let replay = listener.try_recv().unwrap();
        assert_eq!(replay.len(), 200);
        assert_eq!(replay, org.materialized(&s1));
    }

    #[test]
    fn lookup_accepts_paths() {
        let org = ArtifactOrganizer::new();
        org.add_query_files("q", ["out/plot.png"], at(1), &s("s1"));
        assert!(org.find_query_group_by_file("plot.png").is_some());
    }

    #[test]
    fn scenarios_are_isolated() {
        let org = ArtifactOrganizer::new();
        org.add_query_files("q", ["a_1700000000_1.csv"], at(1), &s("s1"));
        org.add_query_files("q", ["a_1700000900_1.csv"], at(1), &s("s2"));

        assert_eq!(view_names(&org.materialized(&s("s1"))), vec![vec!["a_1700000000_1.csv"]]);
        org.clear_scenario(&s("s2"));
        assert_eq!(org.groups(&s("s1")).len(), 1);
        assert!(org.materialized(&s("s2")).is_empty());
    }

    #[test]
    fn subscribers_see_views() {
        let org = ArtifactOrganizer::new();
        let s1 = s("s1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = org.subscribe(&s1, move |view| sink.lock().push(view.len()));

        org.add_query_files("q", ["a.csv"], at(1), &s1);
        assert_eq!(*seen.lock(), vec![0, 1]);
    }
}
