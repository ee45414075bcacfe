//! Service dependency graph.
//!
//! A directed acyclic graph where an edge `a -> b` means service `a` depends
//! on service `b`. Used for blast-radius estimation and for ordering
//! restarts so dependencies come back before their dependents.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{RecoveryError, RecoveryResult};

/// Directed dependency graph between services.
///
/// Serializes as a map from service name to the services it depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyGraph {
    depends_on: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from `(service, dependency)` edges.
    pub fn from_edges<I, A, B>(edges: I) -> RecoveryResult<Self>
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        let mut graph = Self::new();
        for (service, dependency) in edges {
            graph.add_dependency(service, dependency)?;
        }
        Ok(graph)
    }

    /// The reference topology for a device-management backend.
    pub fn default_topology() -> Self {
        let mut graph = Self::new();
        for (service, dependency) in [
            ("mobile-app", "api-gateway"),
            ("api-gateway", "auth-service"),
            ("api-gateway", "device-manager"),
            ("device-manager", "database"),
            ("device-manager", "message-queue"),
            ("monitoring-service", "database"),
            ("ai-service", "gpu-cluster"),
            ("ai-service", "message-queue"),
        ] {
            graph.insert_edge(service.to_string(), dependency.to_string());
        }
        graph
    }

    /// Record that `service` depends on `dependency`. Rejected if it would
    /// close a cycle.
    pub fn add_dependency(
        &mut self,
        service: impl Into<String>,
        dependency: impl Into<String>,
    ) -> RecoveryResult<()> {
        let service = service.into();
        let dependency = dependency.into();

        if service == dependency || self.depends_transitively(&dependency, &service) {
            return Err(RecoveryError::DependencyCycle(format!(
                "{} -> {}",
                service, dependency
            )));
        }

        self.insert_edge(service, dependency);
        Ok(())
    }

    fn insert_edge(&mut self, service: String, dependency: String) {
        self.depends_on.entry(dependency.clone()).or_default();
        self.depends_on.entry(service).or_default().insert(dependency);
    }

    /// Remove a service and every edge touching it.
    pub fn remove_service(&mut self, service: &str) -> bool {
        let removed = self.depends_on.remove(service).is_some();
        for deps in self.depends_on.values_mut() {
            deps.remove(service);
        }
        removed
    }

    pub fn contains(&self, service: &str) -> bool {
        self.depends_on.contains_key(service)
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.depends_on.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.depends_on.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depends_on.is_empty()
    }

    /// Direct dependencies of `service`.
    pub fn dependencies_of(&self, service: &str) -> BTreeSet<String> {
        self.depends_on.get(service).cloned().unwrap_or_default()
    }

    /// Services that depend directly on `service`.
    pub fn dependents_of(&self, service: &str) -> BTreeSet<String> {
        self.depends_on
            .iter()
            .filter(|(_, deps)| deps.contains(service))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Everything `service` depends on, directly or not.
    pub fn transitive_dependencies(&self, service: &str) -> BTreeSet<String> {
        self.reach(service, |name| self.dependencies_of(name))
    }

    /// Everything that would be affected if `service` went down.
    pub fn blast_radius(&self, service: &str) -> BTreeSet<String> {
        self.reach(service, |name| self.dependents_of(name))
    }

    /// Whether `service` reaches `target` along dependency edges.
    pub fn depends_transitively(&self, service: &str, target: &str) -> bool {
        self.transitive_dependencies(service).contains(target)
    }

    fn reach<F>(&self, start: &str, next: F) -> BTreeSet<String>
    where
        F: Fn(&str) -> BTreeSet<String>,
    {
        let mut seen = BTreeSet::new();
        let mut stack = vec![start.to_string()];

        while let Some(name) = stack.pop() {
            for neighbour in next(&name) {
                if neighbour != start && seen.insert(neighbour.clone()) {
                    stack.push(neighbour);
                }
            }
        }

        seen
    }

    /// Group `targets` into stages: every target comes after any other
    /// target it depends on, directly or transitively. Targets in the same
    /// stage are independent of each other. Unknown targets land in the
    /// first stage.
    pub fn stage(&self, targets: &[String]) -> Vec<Vec<String>> {
        let wanted: BTreeSet<&str> = targets.iter().map(String::as_str).collect();
        let mut depth: BTreeMap<&str, usize> = BTreeMap::new();

        for target in wanted.iter().copied() {
            self.depth_of(target, &wanted, &mut depth);
        }

        let mut stages: Vec<Vec<String>> = Vec::new();
        for target in targets {
            let d = depth.get(target.as_str()).copied().unwrap_or(0);
            if stages.len() <= d {
                stages.resize_with(d + 1, Vec::new);
            }
            if !stages[d].contains(target) {
                stages[d].push(target.clone());
            }
        }

        stages.retain(|stage| !stage.is_empty());
        stages
    }

    fn depth_of<'a>(
        &'a self,
        service: &'a str,
        wanted: &BTreeSet<&'a str>,
        memo: &mut BTreeMap<&'a str, usize>,
    ) -> usize {
        if let Some(d) = memo.get(service) {
            return *d;
        }

        let mut depth = 0;
        if let Some(deps) = self.depends_on.get(service) {
            for dep in deps {
                let below = self.depth_of(dep.as_str(), wanted, memo);
                let step = usize::from(wanted.contains(dep.as_str()));
                depth = depth.max(below + step);
            }
        }

        memo.insert(service, depth);
        depth
    }

    /// Check the graph is acyclic. Needed after deserializing, since the
    /// wire form is not checked edge by edge.
    pub fn validate(&self) -> RecoveryResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            graph: &'a DependencyGraph,
            node: &'a str,
            marks: &mut BTreeMap<&'a str, Mark>,
        ) -> RecoveryResult<()> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(RecoveryError::DependencyCycle(node.to_string()))
                }
                None => {}
            }

            marks.insert(node, Mark::Visiting);
            if let Some(deps) = graph.depends_on.get(node) {
                for dep in deps {
                    visit(graph, dep, marks)?;
                }
            }
            marks.insert(node, Mark::Done);
            Ok(())
        }

        let mut marks = BTreeMap::new();
        for node in self.depends_on.keys() {
            visit(self, node, &mut marks)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topology_queries() {
        let graph = DependencyGraph::default_topology();

        assert_eq!(
            graph.dependencies_of("api-gateway"),
            BTreeSet::from(["auth-service".to_string(), "device-manager".to_string()])
        );
        assert!(graph.depends_transitively("mobile-app", "database"));
        assert!(!graph.depends_transitively("database", "mobile-app"));

        let radius = graph.blast_radius("database");
        assert!(radius.contains("device-manager"));
        assert!(radius.contains("api-gateway"));
        assert!(radius.contains("mobile-app"));
        assert!(radius.contains("monitoring-service"));
        assert!(!radius.contains("ai-service"));
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_cycle_rejected() {
        let mut graph = DependencyGraph::default_topology();
        let err = graph.add_dependency("database", "mobile-app").unwrap_err();
        assert!(matches!(err, RecoveryError::DependencyCycle(_)));
        assert!(graph.add_dependency("database", "database").is_err());
        assert!(!graph.depends_transitively("database", "mobile-app"));
    }

    #[test]
    fn test_deserialized_cycle_detected() {
        let graph: DependencyGraph =
            serde_json::from_str(r#"{"a": ["b"], "b": ["c"], "c": ["a"]}"#).unwrap();
        assert!(graph.validate().is_err());
    }

    #[test]
    fn test_staging_puts_dependencies_first() {
        let graph = DependencyGraph::default_topology();
        let mut targets = vec!["api-gateway".to_string()];
        targets.extend(graph.transitive_dependencies("api-gateway"));

        let stages = graph.stage(&targets);
        let position = |name: &str| stages.iter().position(|s| s.iter().any(|t| t == name));

        assert!(position("database") < position("device-manager"));
        assert!(position("message-queue") < position("device-manager"));
        assert!(position("device-manager") < position("api-gateway"));
        assert!(position("auth-service") < position("api-gateway"));
        assert_eq!(position("database"), position("auth-service"));
    }

    #[test]
    fn test_unknown_targets_first_stage() {
        let graph = DependencyGraph::default_topology();
        let stages = graph.stage(&["sensor-firmware".to_string()]);
        assert_eq!(stages, vec![vec!["sensor-firmware".to_string()]]);
    }

    #[test]
    fn test_remove_service() {
        let mut graph = DependencyGraph::default_topology();
        assert!(graph.remove_service("device-manager"));
        assert!(!graph.depends_transitively("mobile-app", "database"));
        assert!(!graph.contains("device-manager"));
    }
}
