use super::*;
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
struct GraphAssessor {
    packages: HashMap<String, Vec<&'static str>>,
    scores: HashMap<String, u8>,
    assessed: Mutex<Vec<String>>,
    resolved: Mutex<Vec<String>>,
}

impl GraphAssessor {
    /// Edges as `(package, "dep1 dep2")`.
    fn with_edges(edges: &[(&'static str, &'static str)]) -> Self {
        let packages = edges
            .iter()
            .map(|(name, deps)| (name.to_string(), deps.split_whitespace().collect()))
            .collect();
        Self {
            packages,
            ..Self::default()
        }
    }

    fn metadata(&self, name: &str) -> Option<PackageMetadata> {
        let deps = self.packages.get(name)?;
        Some(PackageMetadata {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            latest: "1.0.0".to_string(),
            dependencies: deps
                .iter()
                .map(|dep| (dep.to_string(), "^1.0.0".to_string()))
                .collect::<BTreeMap<_, _>>(),
            ..PackageMetadata::default()
        })
    }

    fn resolve_count(&self, name: &str) -> usize {
        self.resolved
            .lock()
            .expect("resolved lock")
            .iter()
            .filter(|resolved| resolved.as_str() == name)
            .count()
    }

    fn assessed(&self) -> Vec<String> {
        let mut names = self.assessed.lock().expect("assessed lock").clone();
        names.sort();
        names
    }
}

#[async_trait]
impl DependencyAssessor for GraphAssessor {
    async fn resolve(&self, name: &str, _spec: &str) -> Result<PackageMetadata, AnalysisError> {
        self.resolved
            .lock()
            .expect("resolved lock")
            .push(name.to_string());
        match name {
            "offline" => Err(AnalysisError::Network {
                message: "connection reset".to_string(),
            }),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Err(AnalysisError::Network {
                    message: "unreachable".to_string(),
                })
            }
            _ => self
                .metadata(name)
                .ok_or_else(|| AnalysisError::MetadataNotFound {
                    package: name.to_string(),
                }),
        }
    }

    async fn assess(&self, metadata: &PackageMetadata) -> DependencyAssessment {
        self.assessed
            .lock()
            .expect("assessed lock")
            .push(metadata.name.clone());
        DependencyAssessment {
            score: self.scores.get(&metadata.name).copied().unwrap_or(90),
            malware_detected: metadata.name == "evil",
        }
    }
}

fn walker(assessor: Arc<GraphAssessor>) -> DependencyRiskWalker<GraphAssessor> {
    DependencyRiskWalker::new(assessor, 4, Duration::from_millis(200))
}

async fn walk_root(
    walker: &DependencyRiskWalker<GraphAssessor>,
    root: &str,
    max_depth: usize,
) -> Vec<DependencyRiskEntry> {
    walker
        .walk(&PackageRef::new(root, "latest"), max_depth)
        .await
        .expect("root resolves")
}

fn names(entries: &[DependencyRiskEntry]) -> Vec<(usize, &str)> {
    entries
        .iter()
        .map(|entry| (entry.depth, entry.name.as_str()))
        .collect()
}

#[tokio::test]
async fn diamond_dependency_is_visited_once() {
    let assessor = Arc::new(GraphAssessor::with_edges(&[
        ("root", "a b"),
        ("a", "z"),
        ("b", "z"),
        ("z", ""),
    ]));

    let entries = walk_root(&walker(Arc::clone(&assessor)), "root", 3).await;

    assert_eq!(names(&entries), vec![(1, "a"), (1, "b"), (2, "z")]);
    assert_eq!(assessor.assessed(), vec!["a", "b", "z"]);
}

#[tokio::test]
async fn shared_dependency_is_fetched_once() {
    let assessor = Arc::new(GraphAssessor::with_edges(&[
        ("root", "a b c d"),
        ("a", "z"),
        ("b", "z"),
        ("c", "z"),
        ("d", "z"),
        ("z", ""),
    ]));

    let entries = walk_root(&walker(Arc::clone(&assessor)), "root", 3).await;

    assert_eq!(entries.len(), 5);
    assert_eq!(assessor.resolve_count("z"), 1);
    assert_eq!(assessor.resolve_count("a"), 1);
}

#[tokio::test]
async fn cycles_terminate_without_revisiting() {
    let assessor = Arc::new(GraphAssessor::with_edges(&[
        ("root", "a"),
        ("a", "b"),
        ("b", "a root"),
    ]));

    let entries = walk_root(&walker(Arc::clone(&assessor)), "root", 10).await;

    assert_eq!(names(&entries), vec![(1, "a"), (2, "b")]);
    assert_eq!(assessor.assessed(), vec!["a", "b"]);
}

#[tokio::test]
async fn linear_chain_stops_at_max_depth() {
    let assessor = Arc::new(GraphAssessor::with_edges(&[
        ("root", "d1"),
        ("d1", "d2"),
        ("d2", "d3"),
        ("d3", "d4"),
        ("d4", "d5"),
        ("d5", "d6"),
        ("d6", "d7"),
        ("d7", "d8"),
        ("d8", ""),
    ]));

    let entries = walk_root(&walker(Arc::clone(&assessor)), "root", 3).await;

    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|entry| entry.depth <= 3));
    assert!(!assessor.assessed().contains(&"d4".to_string()));
    assert_eq!(assessor.resolve_count("d4"), 0);

    let none = walk_root(&walker(Arc::clone(&assessor)), "root", 0).await;
    assert!(none.is_empty());
}

#[tokio::test]
async fn resolution_failures_become_missing_info_entries() {
    let assessor = Arc::new(GraphAssessor::with_edges(&[
        ("root", "ghost offline slow ok"),
        ("ok", ""),
    ]));

    let entries = walk_root(&walker(Arc::clone(&assessor)), "root", 2).await;

    let by_name = entries
        .iter()
        .map(|entry| (entry.name.as_str(), entry))
        .collect::<HashMap<_, _>>();
    assert_eq!(entries.len(), 4);

    let ghost = by_name["ghost"];
    assert_eq!(ghost.score, None);
    assert_eq!(ghost.version, "^1.0.0");
    assert!(ghost.missing_info.is_some());

    let offline = by_name["offline"];
    assert_eq!(offline.score, Some(NEUTRAL_SCORE));
    assert!(offline.missing_info.is_some());

    let slow = by_name["slow"];
    assert_eq!(slow.score, Some(NEUTRAL_SCORE));
    assert!(
        slow.missing_info
            .as_deref()
            .is_some_and(|info| info.contains("timed out"))
    );

    let ok = by_name["ok"];
    assert_eq!(ok.score, Some(90));
    assert!(ok.missing_info.is_none());
}

#[tokio::test]
async fn low_scores_and_malware_do_not_stop_the_walk() {
    let mut assessor = GraphAssessor::with_edges(&[
        ("root", "evil weak"),
        ("evil", "deep"),
        ("weak", ""),
        ("deep", ""),
    ]);
    assessor.scores.insert("weak".to_string(), 5);
    let assessor = Arc::new(assessor);

    let entries = walk_root(&walker(Arc::clone(&assessor)), "root", 3).await;

    assert_eq!(names(&entries), vec![(1, "evil"), (1, "weak"), (2, "deep")]);
    assert!(entries[0].malware_detected);
    assert_eq!(entries[1].score, Some(5));
}

#[tokio::test]
async fn repeated_walks_are_identical() {
    let assessor = Arc::new(GraphAssessor::with_edges(&[
        ("root", "c a b"),
        ("a", "shared"),
        ("b", "shared"),
        ("c", "shared"),
        ("shared", ""),
    ]));
    let walker = walker(Arc::clone(&assessor));

    let first = walk_root(&walker, "root", 3).await;
    let second = walk_root(&walker, "root", 3).await;
    assert_eq!(first, second);
    assert_eq!(first.len(), 4);
}

#[tokio::test]
async fn unresolvable_root_is_an_error() {
    let assessor = Arc::new(GraphAssessor::default());
    let err = walker(assessor)
        .walk(&PackageRef::new("ghost", "latest"), 3)
        .await
        .expect_err("root missing");
    assert_eq!(err.kind(), ErrorKind::MetadataNotFound);
}
