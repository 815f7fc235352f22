//! Dependency Grapher + Topological Orderer (spec §4.3/4.4), built on the
//! teacher's `IndexMap`-keyed adjacency shape in `dependency.rs`, but with a
//! DFS `visited`/`onStack` orderer instead of the teacher's own
//! Kahn's-algorithm `TopoSort` — that strategy silently appends any
//! still-nonzero-in-degree node once the queue drains, which would turn a
//! cyclic import graph into a "successful" but meaningless order. Ported
//! directly from `dependency_graph.go::TopologicalSort`'s DFS shape instead.

use indexmap::IndexMap;

use crate::error::GraphError;
use crate::model::PackageDescriptor;

/// Adjacency keyed by package name, built once per ingest. Iteration is
/// always over sorted keys so two runs over the same input produce the same
/// order.
pub struct DependencyGraph<'a> {
    packages: IndexMap<String, &'a PackageDescriptor>,
    adj: IndexMap<String, Vec<String>>,
}

impl<'a> DependencyGraph<'a> {
    /// Builds the graph from parsed packages. Fails if two descriptors
    /// declare the same package name with structurally different contents
    /// (`DuplicatePackage`) — identical redeclarations, e.g. two imports
    /// both pulling in the exact same file, are not an error.
    pub fn build(descriptors: &'a [PackageDescriptor]) -> Result<Self, GraphError> {
        let mut packages: IndexMap<String, &PackageDescriptor> = IndexMap::new();
        for pkg in descriptors {
            match packages.get(&pkg.pkg_name) {
                Some(existing) if !descriptors_equal(existing, pkg) => {
                    return Err(GraphError::DuplicatePackage {
                        name: pkg.pkg_name.clone(),
                    });
                }
                _ => {
                    packages.insert(pkg.pkg_name.clone(), pkg);
                }
            }
        }

        let mut keys: Vec<String> = packages.keys().cloned().collect();
        keys.sort();

        let mut adj: IndexMap<String, Vec<String>> = IndexMap::new();
        for key in &keys {
            let pkg = packages[key];
            let mut deps: Vec<String> = pkg
                .imports
                .iter()
                .filter(|imp| packages.contains_key(*imp))
                .cloned()
                .collect();
            deps.sort();
            adj.insert(key.clone(), deps);
        }

        Ok(Self { packages, adj })
    }

    /// DFS topological sort with explicit `visited`/`on_stack` tracking:
    /// a back-edge into a node still on the recursion stack is a cycle, and
    /// ordering hard-fails rather than silently including the offending
    /// nodes. Root nodes are visited in sorted-key order for reproducible
    /// output across repeated runs on the same input.
    pub fn topological_order(&self) -> Result<Vec<&'a PackageDescriptor>, GraphError> {
        let mut visited: IndexMap<String, bool> = IndexMap::new();
        let mut on_stack: IndexMap<String, bool> = IndexMap::new();
        let mut path: Vec<String> = Vec::new();
        let mut ordered: Vec<&PackageDescriptor> = Vec::new();

        let mut roots: Vec<String> = self.adj.keys().cloned().collect();
        roots.sort();

        for root in &roots {
            if !visited.get(root).copied().unwrap_or(false) {
                self.visit(root, &mut visited, &mut on_stack, &mut path, &mut ordered)?;
            }
        }

        Ok(ordered)
    }

    /// `path` mirrors the current recursion stack so that, on a cycle, the
    /// error can carry the full back-edge-closing path (`[a.v1, b.v1,
    /// a.v1]`), not just the offending pair.
    fn visit(
        &self,
        node: &str,
        visited: &mut IndexMap<String, bool>,
        on_stack: &mut IndexMap<String, bool>,
        path: &mut Vec<String>,
        ordered: &mut Vec<&'a PackageDescriptor>,
    ) -> Result<(), GraphError> {
        if visited.get(node).copied().unwrap_or(false) {
            return Ok(());
        }
        visited.insert(node.to_string(), true);
        on_stack.insert(node.to_string(), true);
        path.push(node.to_string());

        if let Some(deps) = self.adj.get(node) {
            for dep in deps {
                if on_stack.get(dep).copied().unwrap_or(false) {
                    let start = path.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].to_vec();
                    cycle.push(dep.clone());
                    return Err(GraphError::CyclicImports(cycle));
                }
                if !visited.get(dep).copied().unwrap_or(false) {
                    self.visit(dep, visited, on_stack, path, ordered)?;
                }
            }
        }

        on_stack.insert(node.to_string(), false);
        path.pop();
        ordered.push(self.packages[node]);
        Ok(())
    }
}

fn descriptors_equal(a: &PackageDescriptor, b: &PackageDescriptor) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Dialect;

    fn pkg(name: &str, imports: &[&str]) -> PackageDescriptor {
        PackageDescriptor {
            pkg_name: name.to_string(),
            dialect: Dialect::Proto3,
            imports: imports.iter().map(|s| s.to_string()).collect(),
            enums: vec![],
            messages: vec![],
            services: vec![],
            file_path: format!("{name}.proto"),
        }
    }

    #[test]
    fn orders_dependencies_before_dependents() {
        let descriptors = vec![pkg("a.v1", &["b.v1"]), pkg("b.v1", &[])];
        let graph = DependencyGraph::build(&descriptors).unwrap();
        let order: Vec<&str> = graph
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|p| p.pkg_name.as_str())
            .collect();
        assert_eq!(order, vec!["b.v1", "a.v1"]);
    }

    #[test]
    fn detects_cycles() {
        let descriptors = vec![pkg("a.v1", &["b.v1"]), pkg("b.v1", &["a.v1"])];
        let graph = DependencyGraph::build(&descriptors).unwrap();
        let err = graph.topological_order().unwrap_err();
        match err {
            GraphError::CyclicImports(path) => {
                assert_eq!(path, vec!["a.v1", "b.v1", "a.v1"]);
            }
            other => panic!("expected CyclicImports, got {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_duplicate_package_names() {
        let mut other = pkg("a.v1", &[]);
        other.file_path = "different.proto".to_string();
        other.enums.push(crate::model::EnumDescriptor {
            name: "X".to_string(),
            options: Default::default(),
            values: vec![],
        });
        let descriptors = vec![pkg("a.v1", &[]), other];
        let err = DependencyGraph::build(&descriptors).unwrap_err();
        assert!(matches!(err, GraphError::DuplicatePackage { .. }));
    }

    #[test]
    fn order_is_independent_of_input_order() {
        let forward = vec![pkg("a.v1", &["b.v1", "c.v1"]), pkg("b.v1", &["c.v1"]), pkg("c.v1", &[])];
        let reversed: Vec<_> = forward.iter().cloned().rev().collect();

        let order_a: Vec<String> = DependencyGraph::build(&forward)
            .unwrap()
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|p| p.pkg_name.clone())
            .collect();
        let order_b: Vec<String> = DependencyGraph::build(&reversed)
            .unwrap()
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|p| p.pkg_name.clone())
            .collect();
        assert_eq!(order_a, order_b);
    }
}
