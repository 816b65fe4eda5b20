//! Target resolution: trigger context -> ordered deployment plan.

pub mod graph;

use std::collections::{BTreeSet, HashSet};

use glob::Pattern;
use thiserror::Error;
use tracing::{debug, warn};

pub use graph::{Cycle, DependencyGraph};

use crate::domain::{ErrorKind, Target, TriggerContext};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("no targets matched branch `{branch}`{}", environment_suffix(.environment))]
    NoTargetsMatched {
        branch: String,
        environment: Option<String>,
    },

    #[error("target `{target}` depends on unknown target `{dependency}`")]
    UnknownDependency { target: String, dependency: String },

    #[error("target `{0}` is declared more than once")]
    DuplicateTarget(String),

    #[error("target `{target}` has invalid branch pattern `{pattern}`: {message}")]
    InvalidBranchPattern {
        target: String,
        pattern: String,
        message: String,
    },
}

fn environment_suffix(environment: &Option<String>) -> String {
    environment
        .as_ref()
        .map(|e| format!(" (environment `{e}`)"))
        .unwrap_or_default()
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Resolution
    }
}

impl From<Cycle> for ResolveError {
    fn from(cycle: Cycle) -> Self {
        ResolveError::CycleDetected(cycle.0)
    }
}

/// Resolved targets grouped into dependency levels.
///
/// A target's `depends_on` names either targets in the plan or one of
/// [`Plan::unselected`]; the latter can never succeed in this run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    levels: Vec<Vec<Target>>,
    unselected: Vec<String>,
}

impl Plan {
    pub fn levels(&self) -> &[Vec<Target>] {
        &self.levels
    }

    /// Declared dependencies the trigger did not select, sorted. Targets
    /// depending on them are blocked.
    pub fn unselected(&self) -> &[String] {
        &self.unselected
    }

    /// Flattened topological order.
    pub fn ordered(&self) -> Vec<&Target> {
        self.levels.iter().flatten().collect()
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Validate the full target set: unique names, known dependencies, no cycles.
pub fn validate_targets(targets: &[Target]) -> Result<(), ResolveError> {
    let mut names = HashSet::new();
    for t in targets {
        if !names.insert(t.name.as_str()) {
            return Err(ResolveError::DuplicateTarget(t.name.clone()));
        }
    }

    let mut graph = DependencyGraph::new();
    for t in targets {
        graph.add_node(t.name.as_str());
    }
    for t in targets {
        for dep in &t.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(ResolveError::UnknownDependency {
                    target: t.name.clone(),
                    dependency: dep.clone(),
                });
            }
            graph.add_dependency(&t.name, dep);
        }
    }
    graph.levels()?;
    Ok(())
}

/// Maps a trigger to the targets it deploys.
#[derive(Debug, Clone)]
pub struct TargetResolver {
    targets: Vec<(Target, Pattern)>,
}

impl TargetResolver {
    /// Compile branch patterns. Targets keep their declaration order.
    pub fn new(targets: Vec<Target>) -> Result<Self, ResolveError> {
        let targets = targets
            .into_iter()
            .map(|t| {
                let pattern =
                    Pattern::new(&t.branch_pattern).map_err(|e| ResolveError::InvalidBranchPattern {
                        target: t.name.clone(),
                        pattern: t.branch_pattern.clone(),
                        message: e.to_string(),
                    })?;
                Ok((t, pattern))
            })
            .collect::<Result<Vec<_>, ResolveError>>()?;
        Ok(Self { targets })
    }

    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().map(|(t, _)| t)
    }

    /// Ordered targets for `trigger` (levels flattened).
    pub fn resolve(&self, trigger: &TriggerContext) -> Result<Vec<Target>, ResolveError> {
        Ok(self
            .resolve_plan(trigger)?
            .levels
            .into_iter()
            .flatten()
            .collect())
    }

    /// Targets for `trigger` grouped into dependency levels.
    ///
    /// With an environment override, targets are selected by `environment`
    /// label; otherwise by matching `branch_pattern` against the branch.
    ///
    /// A dependency the trigger does not select is handled per mode. Under an
    /// environment override it is dropped: the caller named the environment
    /// to deploy. Under branch selection it stays on the dependent and is
    /// listed in [`Plan::unselected`], so the dependent is blocked instead of
    /// skipping its gate.
    pub fn resolve_plan(&self, trigger: &TriggerContext) -> Result<Plan, ResolveError> {
        let selected: Vec<&Target> = self
            .targets
            .iter()
            .filter(|(t, pattern)| match &trigger.environment_override {
                Some(env) => t.environment.as_deref() == Some(env.as_str()),
                None => pattern.matches(&trigger.branch),
            })
            .map(|(t, _)| t)
            .collect();

        if selected.is_empty() {
            return Err(ResolveError::NoTargetsMatched {
                branch: trigger.branch.clone(),
                environment: trigger.environment_override.clone(),
            });
        }

        let names: HashSet<&str> = selected.iter().map(|t| t.name.as_str()).collect();
        let overridden = trigger.environment_override.is_some();
        let mut graph = DependencyGraph::new();
        let mut effective = Vec::with_capacity(selected.len());
        let mut unselected = BTreeSet::new();
        for t in &selected {
            graph.add_node(t.name.as_str());
        }
        for t in selected {
            let mut target = t.clone();
            for dep in &t.depends_on {
                if names.contains(dep.as_str()) {
                    graph.add_dependency(&target.name, dep);
                } else if overridden {
                    warn!(
                        target = %t.name,
                        dependency = %dep,
                        "dependency outside the requested environment; ignoring it"
                    );
                } else {
                    warn!(
                        target = %t.name,
                        dependency = %dep,
                        branch = %trigger.branch,
                        "dependency not selected for this branch; target will be blocked"
                    );
                    unselected.insert(dep.clone());
                }
            }
            if overridden {
                target.depends_on.retain(|dep| names.contains(dep.as_str()));
            }
            effective.push(target);
        }

        let levels = graph
            .levels()?
            .into_iter()
            .map(|level| {
                level
                    .into_iter()
                    .filter_map(|name| effective.iter().find(|t| t.name == name).cloned())
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        debug!(
            branch = %trigger.branch,
            levels = levels.len(),
            targets = effective.len(),
            "resolved deployment plan"
        );
        Ok(Plan {
            levels,
            unselected: unselected.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CredentialRef;

    fn target(name: &str) -> Target {
        Target::new(
            name,
            format!("mem://bucket/{name}/site.tar.gz").parse().unwrap(),
            CredentialRef::new(format!("{}_TOKEN", name.to_uppercase())),
        )
    }

    fn names(targets: &[Target]) -> Vec<&str> {
        targets.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn dependent_runs_after_its_dependency() {
        let resolver = TargetResolver::new(vec![
            target("a"),
            target("b").depends_on("a"),
            target("c"),
        ])
        .unwrap();

        let ordered = resolver.resolve(&TriggerContext::new("main", "sha")).unwrap();
        let order = names(&ordered);
        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert_eq!(order.len(), 3);
        assert_eq!(order, vec!["a", "c", "b"]);
    }

    #[test]
    fn plan_groups_levels() {
        let resolver = TargetResolver::new(vec![
            target("a"),
            target("b").depends_on("a"),
            target("c"),
        ])
        .unwrap();
        let plan = resolver.resolve_plan(&TriggerContext::new("main", "sha")).unwrap();
        assert_eq!(plan.levels().len(), 2);
        assert_eq!(names(&plan.levels()[0]), vec!["a", "c"]);
        assert_eq!(names(&plan.levels()[1]), vec!["b"]);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn cycle_is_detected() {
        let resolver = TargetResolver::new(vec![
            target("a").depends_on("b"),
            target("b").depends_on("a"),
        ])
        .unwrap();
        let err = resolver.resolve(&TriggerContext::new("main", "sha")).unwrap_err();
        assert!(matches!(err, ResolveError::CycleDetected(ref path) if path.len() == 3));
        assert_eq!(err.kind(), ErrorKind::Resolution);
    }

    #[test]
    fn branch_patterns_filter_targets() {
        let resolver = TargetResolver::new(vec![
            target("preview").with_branch_pattern("feature/*"),
            target("staging").with_branch_pattern("main"),
            target("production")
                .with_branch_pattern("main")
                .depends_on("staging"),
        ])
        .unwrap();

        let main = resolver.resolve(&TriggerContext::new("main", "sha")).unwrap();
        assert_eq!(names(&main), vec!["staging", "production"]);

        let feature = resolver
            .resolve(&TriggerContext::new("feature/login", "sha"))
            .unwrap();
        assert_eq!(names(&feature), vec!["preview"]);
    }

    #[test]
    fn unmatched_branch_reports_no_targets() {
        let resolver =
            TargetResolver::new(vec![target("staging").with_branch_pattern("main")]).unwrap();
        let err = resolver
            .resolve(&TriggerContext::new("develop", "sha"))
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::NoTargetsMatched {
                branch: "develop".into(),
                environment: None
            }
        );
    }

    #[test]
    fn environment_override_selects_by_label() {
        let resolver = TargetResolver::new(vec![
            target("staging")
                .with_branch_pattern("main")
                .with_environment("staging"),
            target("production")
                .with_branch_pattern("main")
                .with_environment("production")
                .depends_on("staging"),
        ])
        .unwrap();

        let trigger = TriggerContext::new("hotfix/123", "sha").with_environment("production");
        let plan = resolver.resolve_plan(&trigger).unwrap();
        let ordered: Vec<&str> = plan.ordered().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(ordered, vec!["production"]);
        // staging was not selected, so production no longer waits for it
        assert!(plan.ordered()[0].depends_on.is_empty());
        assert!(plan.unselected().is_empty());
    }

    #[test]
    fn branch_selection_keeps_unselected_dependency_as_gate() {
        let resolver = TargetResolver::new(vec![
            target("staging").with_branch_pattern("main"),
            target("production")
                .with_branch_pattern("release/*")
                .depends_on("staging"),
            target("docs").with_branch_pattern("release/*"),
        ])
        .unwrap();

        let plan = resolver
            .resolve_plan(&TriggerContext::new("release/1", "sha"))
            .unwrap();
        assert_eq!(plan.levels().len(), 1);
        assert_eq!(names(&plan.levels()[0]), vec!["production", "docs"]);
        assert_eq!(plan.ordered()[0].depends_on, vec!["staging".to_string()]);
        assert_eq!(plan.unselected(), ["staging".to_string()]);
    }

    #[test]
    fn invalid_branch_pattern_is_rejected() {
        let err = TargetResolver::new(vec![target("a").with_branch_pattern("[")]).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidBranchPattern { .. }));
    }

    #[test]
    fn validate_rejects_unknown_and_duplicate() {
        let err = validate_targets(&[target("a").depends_on("ghost")]).unwrap_err();
        assert!(matches!(err, ResolveError::UnknownDependency { .. }));

        let err = validate_targets(&[target("a"), target("a")]).unwrap_err();
        assert_eq!(err, ResolveError::DuplicateTarget("a".into()));

        let err =
            validate_targets(&[target("a").depends_on("b"), target("b").depends_on("a")])
                .unwrap_err();
        assert!(matches!(err, ResolveError::CycleDetected(_)));

        assert!(validate_targets(&[target("a"), target("b").depends_on("a")]).is_ok());
    }
}
