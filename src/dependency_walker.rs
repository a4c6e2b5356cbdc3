//! Bounded breadth-first traversal of a package's dependency graph.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use guardpkg_core::{
    AnalysisError, DependencyKind, DependencyRequest, DependencyRiskEntry, ErrorKind,
    NEUTRAL_SCORE, PackageMetadata, PackageRef,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Outcome of scoring one dependency in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyAssessment {
    pub score: u8,
    pub malware_detected: bool,
}

/// Resolves and scores individual dependencies on behalf of the walker.
#[async_trait]
pub trait DependencyAssessor: Send + Sync + 'static {
    async fn resolve(&self, name: &str, spec: &str) -> Result<PackageMetadata, AnalysisError>;
    async fn assess(&self, metadata: &PackageMetadata) -> DependencyAssessment;
}

/// Per-walk claims. `requested` is keyed by (name, declared spec) and claimed before the
/// registry is consulted; `resolved` is keyed by (name, resolved version) and claimed before
/// assessment.
#[derive(Default)]
struct Claims {
    requested: HashSet<(String, String)>,
    resolved: HashSet<(String, String)>,
}

type VisitedSet = Arc<Mutex<Claims>>;

pub struct DependencyRiskWalker<A> {
    assessor: Arc<A>,
    max_concurrency: usize,
    fetch_timeout: Duration,
}

enum NodeOutcome {
    Visited {
        entry: DependencyRiskEntry,
        metadata: Box<PackageMetadata>,
    },
    Unresolved(DependencyRiskEntry),
    AlreadyVisited,
}

impl<A: DependencyAssessor> DependencyRiskWalker<A> {
    pub fn new(assessor: Arc<A>, max_concurrency: usize, fetch_timeout: Duration) -> Self {
        Self {
            assessor,
            max_concurrency: max_concurrency.max(1),
            fetch_timeout,
        }
    }

    /// Resolves `root` and walks its dependencies. Only a failure to resolve the root itself is
    /// returned as an error.
    pub async fn walk(
        &self,
        root: &PackageRef,
        max_depth: usize,
    ) -> Result<Vec<DependencyRiskEntry>, AnalysisError> {
        let metadata = with_timeout(
            self.fetch_timeout,
            format!("resolving {root}"),
            self.assessor.resolve(&root.name, &root.version),
        )
        .await?;
        Ok(self.walk_from(&metadata, max_depth).await)
    }

    /// Walks the dependencies of already-resolved root metadata.
    ///
    /// Direct dependencies are depth 1 and nothing deeper than `max_depth` is visited. Each
    /// (name, version) pair is assessed at most once, so cycles and diamonds terminate.
    pub async fn walk_from(
        &self,
        root: &PackageMetadata,
        max_depth: usize,
    ) -> Vec<DependencyRiskEntry> {
        let visited: VisitedSet = Arc::new(Mutex::new(Claims {
            requested: HashSet::new(),
            resolved: HashSet::from([(root.name.clone(), root.version.clone())]),
        }));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        let mut entries = Vec::new();
        let mut frontier = vec![root.clone()];

        for depth in 1..=max_depth {
            if frontier.is_empty() {
                break;
            }
            debug!(depth, parents = frontier.len(), "walking dependency level");

            let mut tasks = JoinSet::new();
            for parent in &frontier {
                for request in parent.dependency_requests() {
                    tasks.spawn(visit(
                        Arc::clone(&self.assessor),
                        Arc::clone(&visited),
                        Arc::clone(&semaphore),
                        request,
                        depth,
                        self.fetch_timeout,
                    ));
                }
            }

            let mut next = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(NodeOutcome::Visited { entry, metadata }) => {
                        entries.push(entry);
                        next.push(*metadata);
                    }
                    Ok(NodeOutcome::Unresolved(entry)) => entries.push(entry),
                    Ok(NodeOutcome::AlreadyVisited) => {}
                    Err(err) => warn!(error = %err, "dependency task failed"),
                }
            }
            next.sort_by(|left, right| {
                (&left.name, &left.version).cmp(&(&right.name, &right.version))
            });
            frontier = next;
        }

        entries.sort_by(|left, right| {
            (left.depth, &left.name, &left.version).cmp(&(right.depth, &right.name, &right.version))
        });
        entries
    }
}

async fn visit<A: DependencyAssessor>(
    assessor: Arc<A>,
    visited: VisitedSet,
    semaphore: Arc<Semaphore>,
    request: DependencyRequest,
    depth: usize,
    fetch_timeout: Duration,
) -> NodeOutcome {
    if !claim(&visited, ClaimKind::Requested, &request.name, &request.spec) {
        return NodeOutcome::AlreadyVisited;
    }
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return NodeOutcome::AlreadyVisited;
    };

    let resolved = with_timeout(
        fetch_timeout,
        format!("resolving {}@{}", request.name, request.spec),
        assessor.resolve(&request.name, &request.spec),
    )
    .await;

    let metadata = match resolved {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!(
                package = %request.name,
                spec = %request.spec,
                error = %err,
                "dependency could not be resolved"
            );
            return NodeOutcome::Unresolved(unresolved_entry(&request, depth, &err));
        }
    };

    if !claim(&visited, ClaimKind::Resolved, &metadata.name, &metadata.version) {
        return NodeOutcome::AlreadyVisited;
    }

    let assessment = match tokio::time::timeout(fetch_timeout, assessor.assess(&metadata)).await {
        Ok(assessment) => assessment,
        Err(_) => {
            warn!(package = %metadata.package_ref(), "dependency assessment timed out");
            return NodeOutcome::Unresolved(DependencyRiskEntry {
                name: metadata.name.clone(),
                version: metadata.version.clone(),
                depth,
                kind: request.kind,
                score: Some(NEUTRAL_SCORE),
                malware_detected: false,
                latest: Some(metadata.latest.clone()),
                missing_info: Some(format!(
                    "assessment timed out after {}s",
                    fetch_timeout.as_secs()
                )),
            });
        }
    };

    NodeOutcome::Visited {
        entry: DependencyRiskEntry {
            name: metadata.name.clone(),
            version: metadata.version.clone(),
            depth,
            kind: request.kind,
            score: Some(assessment.score),
            malware_detected: assessment.malware_detected,
            latest: Some(metadata.latest.clone()),
            missing_info: None,
        },
        metadata: Box::new(metadata),
    }
}

#[derive(Clone, Copy)]
enum ClaimKind {
    Requested,
    Resolved,
}

/// Atomically marks a node as visited. Returns `false` if it was already claimed.
fn claim(visited: &VisitedSet, kind: ClaimKind, name: &str, version: &str) -> bool {
    let mut claims = visited.lock().unwrap_or_else(PoisonError::into_inner);
    let set = match kind {
        ClaimKind::Requested => &mut claims.requested,
        ClaimKind::Resolved => &mut claims.resolved,
    };
    set.insert((name.to_string(), version.to_string()))
}

/// Unknown packages get no score; transient failures get the neutral score.
fn unresolved_entry(
    request: &DependencyRequest,
    depth: usize,
    err: &AnalysisError,
) -> DependencyRiskEntry {
    let score = match err.kind() {
        ErrorKind::Network => Some(NEUTRAL_SCORE),
        _ => None,
    };
    DependencyRiskEntry {
        name: request.name.clone(),
        version: request.spec.clone(),
        depth,
        kind: request.kind,
        score,
        malware_detected: false,
        latest: None,
        missing_info: Some(err.to_string()),
    }
}

pub(crate) async fn with_timeout<T>(
    duration: Duration,
    what: String,
    future: impl Future<Output = Result<T, AnalysisError>>,
) -> Result<T, AnalysisError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(AnalysisError::Network {
            message: format!("timed out after {}s while {what}", duration.as_secs()),
        }),
    }
}

pub(crate) fn kind_label(kind: DependencyKind) -> &'static str {
    match kind {
        DependencyKind::Production => "prod",
        DependencyKind::Development => "dev",
        DependencyKind::Peer => "peer",
    }
}

#[cfg(test)]
#[path = "tests/dependency_walker.rs"]
mod tests;
