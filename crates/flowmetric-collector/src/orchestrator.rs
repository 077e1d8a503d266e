//! Bounded fan-out across teams, repositories and contributors.

use crate::adapters::{IssueSource, RepoSource};
use flowmetric_metrics::PersonInputs;
use flowmetric_types::{RepoRef, TeamRecordSet, Window};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// The three bounded pools.
#[derive(Debug, Clone, Copy)]
pub struct PoolSizes {
    /// Teams processed concurrently.
    pub teams: usize,
    /// Repositories per team processed concurrently.
    pub repos_per_team: usize,
    /// Contributors per team processed concurrently.
    pub persons_per_team: usize,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            teams: 3,
            repos_per_team: 5,
            persons_per_team: 8,
        }
    }
}

/// One team's fan-out plan (from config).
#[derive(Debug, Clone)]
pub struct TeamPlan {
    /// Team name.
    pub name: String,
    /// Repositories as `owner/name`.
    pub repositories: Vec<String>,
    /// Source-host logins of the members.
    pub member_logins: Vec<String>,
    /// Tracker logins of the members.
    pub tracker_logins: Vec<String>,
    /// Saved tracker filters collected for this team's environment.
    pub filter_ids: Vec<u64>,
    /// Tracker project keys.
    pub project_keys: Vec<String>,
}

/// Everything one collection run produced.
#[derive(Debug, Default)]
pub struct CollectionOutcome {
    /// Per-team record sets, sorted by team name.
    pub team_sets: Vec<TeamRecordSet>,
    /// Per-contributor inputs, sorted by login.
    pub person_inputs: Vec<PersonInputs>,
    /// Whether any unit was partial or failed.
    pub partial: bool,
}

/// The orchestrator. Holds one upstream session per client type for the
/// whole job; workers share them so rate-limit pacing stays global.
pub struct Collector {
    source: Arc<dyn RepoSource>,
    tracker: Arc<dyn IssueSource>,
    pools: PoolSizes,
    stop: Arc<AtomicBool>,
}

impl Collector {
    /// Build an orchestrator over the two shared sessions.
    #[must_use]
    pub fn new(source: Arc<dyn RepoSource>, tracker: Arc<dyn IssueSource>, pools: PoolSizes) -> Self {
        Self {
            source,
            tracker,
            pools,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a stop flag (also handed to the clients at construction).
    #[must_use]
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Signal cancellation: outstanding workers finish their in-flight
    /// call and return what they have as a partial result.
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Fan out over all teams. Teams run in parallel (bounded), and the
    /// units within a team run in parallel (bounded) too. Permanent
    /// failures mark the unit failed and the run continues.
    pub async fn collect(&self, teams: Vec<TeamPlan>, window: Window) -> CollectionOutcome {
        let team_pool = Arc::new(Semaphore::new(self.pools.teams.max(1)));
        let mut join_set: JoinSet<(TeamRecordSet, Vec<PersonInputs>)> = JoinSet::new();

        for plan in teams {
            let permit_pool = Arc::clone(&team_pool);
            let source = Arc::clone(&self.source);
            let tracker = Arc::clone(&self.tracker);
            let pools = self.pools;
            let stop = Arc::clone(&self.stop);

            join_set.spawn(async move {
                let _permit = permit_pool.acquire_owned().await;
                collect_team(plan, source, tracker, pools, stop, window).await
            });
        }

        let mut outcome = CollectionOutcome::default();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok((team_set, persons)) => {
                    outcome.partial |= team_set.partial;
                    outcome.team_sets.push(team_set);
                    outcome.person_inputs.extend(persons);
                }
                Err(e) => {
                    warn!(error = %e, "team worker panicked");
                    outcome.partial = true;
                }
            }
        }

        outcome.team_sets.sort_by(|a, b| a.team.cmp(&b.team));
        outcome
            .person_inputs
            .sort_by(|a, b| a.login.cmp(&b.login));
        info!(
            teams = outcome.team_sets.len(),
            persons = outcome.person_inputs.len(),
            partial = outcome.partial,
            "collection finished"
        );
        outcome
    }
}

async fn collect_team(
    plan: TeamPlan,
    source: Arc<dyn RepoSource>,
    tracker: Arc<dyn IssueSource>,
    pools: PoolSizes,
    stop: Arc<AtomicBool>,
    window: Window,
) -> (TeamRecordSet, Vec<PersonInputs>) {
    debug!(team = %plan.name, repos = plan.repositories.len(), "collecting team");
    let mut set = TeamRecordSet {
        team: plan.name.clone(),
        window: Some(window),
        changelog_expanded: true,
        ..Default::default()
    };

    // Repositories, bounded.
    let repo_pool = Arc::new(Semaphore::new(pools.repos_per_team.max(1)));
    let mut repo_jobs: JoinSet<(String, flowmetric_error::Result<flowmetric_sourcehost::RepoCollection>)> =
        JoinSet::new();
    for full_name in plan.repositories.clone() {
        let Some(repo) = RepoRef::parse(&full_name) else {
            set.failed_units.push(format!("repo:{full_name}"));
            set.partial = true;
            continue;
        };
        if stop.load(Ordering::Relaxed) {
            set.partial = true;
            break;
        }
        let source = Arc::clone(&source);
        let pool = Arc::clone(&repo_pool);
        repo_jobs.spawn(async move {
            let _permit = pool.acquire_owned().await;
            let collected = source
                .collect_repository(&repo.owner, &repo.name, &window)
                .await;
            (full_name, collected)
        });
    }
    while let Some(result) = repo_jobs.join_next().await {
        match result {
            Ok((_, Ok(collection))) => {
                set.partial |= collection.partial;
                set.failed_units
                    .extend(collection.failures.iter().map(|f| format!("page:{f}")));
                set.prs.extend(collection.prs);
                set.reviews.extend(collection.reviews);
                set.commits.extend(collection.commits);
                set.releases.extend(collection.releases);
            }
            Ok((full_name, Err(e))) => {
                warn!(team = %plan.name, repo = %full_name, error = %e, "repository failed for this run");
                set.failed_units.push(format!("repo:{full_name}"));
                set.partial = true;
            }
            Err(e) => {
                warn!(error = %e, "repository worker panicked");
                set.partial = true;
            }
        }
    }

    // Contributors, bounded.
    let person_pool = Arc::new(Semaphore::new(pools.persons_per_team.max(1)));
    let mut person_jobs: JoinSet<(String, flowmetric_error::Result<flowmetric_sourcehost::PersonCollection>)> =
        JoinSet::new();
    for login in plan.member_logins.clone() {
        if stop.load(Ordering::Relaxed) {
            set.partial = true;
            break;
        }
        let source = Arc::clone(&source);
        let pool = Arc::clone(&person_pool);
        person_jobs.spawn(async move {
            let _permit = pool.acquire_owned().await;
            let collected = source.collect_person(&login, &window).await;
            (login, collected)
        });
    }
    let mut persons = Vec::new();
    while let Some(result) = person_jobs.join_next().await {
        match result {
            Ok((login, Ok(collection))) => {
                set.partial |= collection.partial;
                persons.push(PersonInputs {
                    login,
                    team: plan.name.clone(),
                    prs: collection.prs,
                    reviews: collection.reviews,
                    commits: collection.commits,
                    issues: Vec::new(),
                });
            }
            Ok((login, Err(e))) => {
                warn!(team = %plan.name, person = %login, error = %e, "person failed for this run");
                set.failed_units.push(format!("person:{login}"));
                set.partial = true;
            }
            Err(e) => {
                warn!(error = %e, "person worker panicked");
                set.partial = true;
            }
        }
    }

    // Tracker issues: saved filters when declared, otherwise a project
    // query over the team's members.
    if !stop.load(Ordering::Relaxed) {
        let queries = issue_queries(&plan, &tracker).await;
        for (label, jql) in queries {
            match tracker.search_in_window(&jql, &window).await {
                Ok(outcome) => {
                    set.partial |= outcome.partial;
                    set.changelog_expanded &= outcome.changelog_expanded;
                    set.issues.extend(outcome.issues);
                }
                Err(e) => {
                    warn!(team = %plan.name, query = %label, error = %e, "issue query failed for this run");
                    set.failed_units.push(format!("issues:{label}"));
                    set.partial = true;
                }
            }
        }

        for project_key in &plan.project_keys {
            match tracker.collect_releases(project_key, &plan.tracker_logins).await {
                Ok(versions) => set.fix_versions.extend(versions),
                Err(e) => {
                    warn!(team = %plan.name, project = %project_key, error = %e, "fix-version enumeration failed");
                    set.failed_units.push(format!("versions:{project_key}"));
                    set.partial = true;
                }
            }
        }
    } else {
        set.partial = true;
    }

    // Hand each member their assigned issues.
    for person in &mut persons {
        let login = plan
            .member_logins
            .iter()
            .position(|l| l == &person.login)
            .and_then(|i| plan.tracker_logins.get(i))
            .cloned()
            .unwrap_or_else(|| person.login.clone());
        person.issues = set
            .issues
            .iter()
            .filter(|issue| issue.assignee.as_deref() == Some(login.as_str()))
            .cloned()
            .collect();
    }

    set.normalize();
    (set, persons)
}

async fn issue_queries(plan: &TeamPlan, tracker: &Arc<dyn IssueSource>) -> Vec<(String, String)> {
    if !plan.filter_ids.is_empty() {
        let mut queries = Vec::new();
        for id in &plan.filter_ids {
            match tracker.filter_jql(*id).await {
                Ok(jql) => queries.push((format!("filter-{id}"), jql)),
                Err(e) => {
                    warn!(filter = id, error = %e, "filter resolution failed; skipping");
                }
            }
        }
        return queries;
    }
    if plan.project_keys.is_empty() || plan.tracker_logins.is_empty() {
        return Vec::new();
    }
    let projects: Vec<String> = plan.project_keys.iter().map(|k| format!("\"{k}\"")).collect();
    let members: Vec<String> = plan.tracker_logins.iter().map(|m| format!("\"{m}\"")).collect();
    vec![(
        "project-members".to_string(),
        format!(
            "project in ({}) AND assignee in ({})",
            projects.join(", "),
            members.join(", ")
        ),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use flowmetric_error::FlowError;
    use flowmetric_sourcehost::{PersonCollection, RepoCollection};
    use flowmetric_tracker::SearchOutcome;
    use flowmetric_types::{FixVersion, Issue, PullRequest, RepoRef};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn window() -> Window {
        Window::new(ts("2026-03-01T00:00:00Z"), ts("2026-04-01T00:00:00Z"))
    }

    fn pr(repo: &RepoRef, id: u64) -> PullRequest {
        PullRequest {
            id,
            repo: repo.clone(),
            author: "alice".to_string(),
            title: String::new(),
            body: String::new(),
            head_ref: None,
            created_at: ts("2026-03-01T00:00:00Z"),
            merged_at: Some(ts("2026-03-02T00:00:00Z")),
            closed_at: None,
            merged: true,
            additions: 1,
            deletions: 1,
            changed_files: 1,
            commit_shas: vec![],
            issue_keys: vec![],
        }
    }

    /// Fake source host: records concurrency and requested windows.
    struct FakeSource {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        windows_seen: Mutex<Vec<Window>>,
        fail_repos: Vec<String>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                windows_seen: Mutex::new(Vec::new()),
                fail_repos: Vec::new(),
            }
        }

        fn failing(repos: &[&str]) -> Self {
            Self {
                fail_repos: repos.iter().map(|r| (*r).to_string()).collect(),
                ..Self::new()
            }
        }

        async fn track<T>(&self, work: impl std::future::Future<Output = T>) -> T {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let out = work.await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            out
        }
    }

    #[async_trait]
    impl RepoSource for FakeSource {
        async fn collect_repository(
            &self,
            owner: &str,
            repo: &str,
            window: &Window,
        ) -> flowmetric_error::Result<RepoCollection> {
            self.windows_seen.lock().unwrap().push(*window);
            let full = format!("{owner}/{repo}");
            self.track(async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                if self.fail_repos.contains(&full) {
                    return Err(FlowError::UpstreamPermanent("bad credentials".into()));
                }
                let repo_ref = RepoRef::parse(&full).unwrap();
                Ok(RepoCollection {
                    // Overlapping queries produce the same PR twice.
                    prs: vec![pr(&repo_ref, 1), pr(&repo_ref, 1), pr(&repo_ref, 2)],
                    ..Default::default()
                })
            })
            .await
        }

        async fn collect_person(
            &self,
            _login: &str,
            window: &Window,
        ) -> flowmetric_error::Result<PersonCollection> {
            self.windows_seen.lock().unwrap().push(*window);
            self.track(async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                Ok(PersonCollection::default())
            })
            .await
        }
    }

    struct FakeTracker {
        windows_seen: Mutex<Vec<Window>>,
    }

    impl FakeTracker {
        fn new() -> Self {
            Self {
                windows_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl IssueSource for FakeTracker {
        async fn filter_jql(&self, id: u64) -> flowmetric_error::Result<String> {
            Ok(format!("filter = {id}"))
        }

        async fn search_in_window(
            &self,
            _jql: &str,
            window: &Window,
        ) -> flowmetric_error::Result<SearchOutcome> {
            self.windows_seen.lock().unwrap().push(*window);
            Ok(SearchOutcome {
                issues: vec![Issue {
                    key: "PROJ-1".to_string(),
                    issue_type: "Story".to_string(),
                    status: "Done".to_string(),
                    assignee: Some("alice@example.com".to_string()),
                    reporter: None,
                    created_at: ts("2026-03-05T00:00:00Z"),
                    resolved_at: None,
                    transitions: vec![],
                    fix_versions: vec![],
                    labels: vec![],
                    priority: None,
                }],
                total: 1,
                partial: false,
                changelog_expanded: true,
                approximated: false,
                data_requests: 1,
            })
        }

        async fn collect_releases(
            &self,
            project_key: &str,
            _members: &[String],
        ) -> flowmetric_error::Result<Vec<FixVersion>> {
            Ok(vec![FixVersion {
                name: format!("{project_key}-v1"),
                released: true,
                release_date: None,
                issue_keys: vec![],
            }])
        }
    }

    fn plan(name: &str, repos: Vec<&str>, members: Vec<&str>) -> TeamPlan {
        TeamPlan {
            name: name.to_string(),
            repositories: repos.into_iter().map(String::from).collect(),
            member_logins: members.iter().map(|m| (*m).to_string()).collect(),
            tracker_logins: members
                .iter()
                .map(|m| format!("{m}@example.com"))
                .collect(),
            filter_ids: vec![],
            project_keys: vec!["PROJ".to_string()],
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_repo_pool_bound_is_respected() {
        let source = Arc::new(FakeSource::new());
        let tracker = Arc::new(FakeTracker::new());
        let collector = Collector::new(
            Arc::clone(&source) as Arc<dyn RepoSource>,
            Arc::clone(&tracker) as Arc<dyn IssueSource>,
            PoolSizes {
                teams: 1,
                repos_per_team: 2,
                persons_per_team: 2,
            },
        );

        let repos = vec!["acme/r1", "acme/r2", "acme/r3", "acme/r4", "acme/r5", "acme/r6"];
        collector
            .collect(vec![plan("platform", repos, vec![])], window())
            .await;

        // Repo and person pools are disjoint in time here (repos first),
        // so the watermark reflects the repo bound.
        assert!(source.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_dedup_and_deterministic_order() {
        let source = Arc::new(FakeSource::new());
        let tracker = Arc::new(FakeTracker::new());
        let collector = Collector::new(
            source as Arc<dyn RepoSource>,
            tracker as Arc<dyn IssueSource>,
            PoolSizes::default(),
        );

        let outcome = collector
            .collect(
                vec![
                    plan("zeta", vec!["acme/zrepo"], vec![]),
                    plan("alpha", vec!["acme/arepo"], vec![]),
                ],
                window(),
            )
            .await;

        // Teams sorted by name.
        assert_eq!(outcome.team_sets[0].team, "alpha");
        assert_eq!(outcome.team_sets[1].team, "zeta");
        // Duplicate (repo, id) pairs collapsed: 3 raw rows → 2.
        assert_eq!(outcome.team_sets[0].prs.len(), 2);
        assert_eq!(outcome.team_sets[0].prs[0].id, 1);
        assert_eq!(outcome.team_sets[0].prs[1].id, 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_marks_unit_and_continues() {
        let source = Arc::new(FakeSource::failing(&["acme/broken"]));
        let tracker = Arc::new(FakeTracker::new());
        let collector = Collector::new(
            source as Arc<dyn RepoSource>,
            tracker as Arc<dyn IssueSource>,
            PoolSizes::default(),
        );

        let outcome = collector
            .collect(
                vec![plan("platform", vec!["acme/broken", "acme/good"], vec![])],
                window(),
            )
            .await;

        let set = &outcome.team_sets[0];
        assert!(set.partial);
        assert!(set.failed_units.contains(&"repo:acme/broken".to_string()));
        // The healthy repository still contributed.
        assert_eq!(set.prs.len(), 2);
        assert!(outcome.partial);
    }

    #[tokio::test]
    async fn test_both_clients_receive_identical_windows() {
        let source = Arc::new(FakeSource::new());
        let tracker = Arc::new(FakeTracker::new());
        let collector = Collector::new(
            Arc::clone(&source) as Arc<dyn RepoSource>,
            Arc::clone(&tracker) as Arc<dyn IssueSource>,
            PoolSizes::default(),
        );

        let w = window();
        collector
            .collect(vec![plan("platform", vec!["acme/r1"], vec!["alice"])], w)
            .await;

        // Offset shifting happens inside the clients; the orchestrator
        // must hand both the exact same window.
        assert!(source.windows_seen.lock().unwrap().iter().all(|seen| *seen == w));
        assert!(tracker.windows_seen.lock().unwrap().iter().all(|seen| *seen == w));
    }

    #[tokio::test]
    async fn test_members_get_their_issues() {
        let source = Arc::new(FakeSource::new());
        let tracker = Arc::new(FakeTracker::new());
        let collector = Collector::new(
            source as Arc<dyn RepoSource>,
            tracker as Arc<dyn IssueSource>,
            PoolSizes::default(),
        );

        let outcome = collector
            .collect(
                vec![plan("platform", vec![], vec!["alice", "bob"])],
                window(),
            )
            .await;

        let alice = outcome
            .person_inputs
            .iter()
            .find(|p| p.login == "alice")
            .unwrap();
        assert_eq!(alice.issues.len(), 1);
        let bob = outcome
            .person_inputs
            .iter()
            .find(|p| p.login == "bob")
            .unwrap();
        assert!(bob.issues.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_yields_partial() {
        let source = Arc::new(FakeSource::new());
        let tracker = Arc::new(FakeTracker::new());
        let collector = Collector::new(
            source as Arc<dyn RepoSource>,
            tracker as Arc<dyn IssueSource>,
            PoolSizes::default(),
        );

        collector.cancel();
        let outcome = collector
            .collect(vec![plan("platform", vec!["acme/r1"], vec!["alice"])], window())
            .await;
        assert!(outcome.partial);
    }
}
