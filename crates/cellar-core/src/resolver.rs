//! Dependency resolution.
//!
//! [`resolve`] turns a requested target into a [`BuildPlan`]: the target's
//! transitive closure in a valid topological order, target last, with each
//! entry marked as build, upgrade, or skip against the installed receipts.
//! The graph is rebuilt on every call from the passed-in lookup.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use thiserror::Error;
use tracing::{debug, warn};

use cellar_schema::version::version_satisfies_requirement;
use cellar_schema::{DependencyKind, Formula, PackageName, Version};

use crate::formula::FormulaLookup;
use crate::receipt::InstalledSet;

/// Resolution failures. All of them abort before any build work starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The requested package has no formula.
    #[error("no formula named '{0}'")]
    UnknownTarget(PackageName),

    /// An included edge references a name absent from the lookup.
    #[error("'{package}' depends on '{dependency}', which has no formula")]
    UnknownDependency {
        /// Declaring package.
        package: PackageName,
        /// Missing dependency.
        dependency: PackageName,
    },

    /// The build and runtime edges contain a cycle.
    #[error("Circular dependency detected: {}", format_cycle(.cycle))]
    DependencyCycle {
        /// Cycle members in visitation order.
        cycle: Vec<PackageName>,
    },

    /// No available version meets a declared requirement.
    #[error(
        "'{package}' requires {dependency} {requirement}, but the formula provides {available}"
    )]
    Unsatisfiable {
        /// Declaring package.
        package: PackageName,
        /// Dependency whose version does not fit.
        dependency: PackageName,
        /// The declared requirement.
        requirement: String,
        /// Version the plan would leave installed.
        available: Version,
    },
}

fn format_cycle(cycle: &[PackageName]) -> String {
    let mut names: Vec<&str> = cycle.iter().map(PackageName::as_str).collect();
    if let Some(first) = names.first().copied() {
        names.push(first);
    }
    names.join(" -> ")
}

/// Which optional edge kinds take part in a resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Follow `optional` edges.
    pub include_optional: bool,
    /// Follow `test` edges (tests will run).
    pub include_test: bool,
    /// Rebuild the target even when an adequate version is installed.
    pub reinstall: bool,
}

impl ResolveOptions {
    fn kinds(self) -> Vec<DependencyKind> {
        let mut kinds = vec![DependencyKind::Build, DependencyKind::Runtime];
        if self.include_optional {
            kinds.push(DependencyKind::Optional);
        }
        if self.include_test {
            kinds.push(DependencyKind::Test);
        }
        kinds
    }
}

/// What the pipeline does with one plan entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    /// Not installed; build it.
    Build,
    /// Installed at `from`; build and replace it.
    Upgrade {
        /// Currently installed version.
        from: Version,
    },
    /// Already satisfied; kept in the plan for audit only.
    Skip {
        /// Installed version that satisfies the plan.
        installed: Version,
    },
}

impl PlanAction {
    /// Whether the entry needs a build.
    pub fn needs_build(&self) -> bool {
        !matches!(self, Self::Skip { .. })
    }
}

/// A merged dependency edge: the union of all parallel declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEdge {
    /// Dependency name.
    pub name: PackageName,
    /// Every declared kind, sorted.
    pub kinds: BTreeSet<DependencyKind>,
    /// Every declared requirement.
    pub requirements: Vec<String>,
}

impl PlanEdge {
    /// Whether the edge participates in the acyclic build/runtime subgraph.
    pub fn is_hard(&self) -> bool {
        self.kinds.iter().any(|k| k.is_hard())
    }
}

/// A soft edge left out because it would have closed a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedEdge {
    /// Declaring package.
    pub from: PackageName,
    /// Dependency that was not followed.
    pub to: PackageName,
}

/// One entry of a [`BuildPlan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPackage {
    /// Package name.
    pub name: PackageName,
    /// Formula version that would be built.
    pub version: Version,
    /// Build, upgrade, or skip.
    pub action: PlanAction,
    /// Merged edges to other plan entries, sorted by name.
    pub dependencies: Vec<PlanEdge>,
}

/// Topologically ordered packages for one request, target last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    /// The requested package.
    pub target: PackageName,
    /// Every dependency appears before its dependents.
    pub packages: Vec<PlannedPackage>,
    /// Soft edges removed to break cycles.
    pub dropped_edges: Vec<DroppedEdge>,
}

impl BuildPlan {
    /// Look up a plan entry by name.
    pub fn get(&self, name: &PackageName) -> Option<&PlannedPackage> {
        self.packages.iter().find(|p| &p.name == name)
    }

    /// Plan order as names.
    pub fn names(&self) -> Vec<PackageName> {
        self.packages.iter().map(|p| p.name.clone()).collect()
    }

    /// Entries that need a build.
    pub fn to_build(&self) -> impl Iterator<Item = &PlannedPackage> {
        self.packages.iter().filter(|p| p.action.needs_build())
    }

    /// Whether nothing needs building.
    pub fn is_satisfied(&self) -> bool {
        self.to_build().next().is_none()
    }

    /// Group the plan into waves: every entry's dependencies sit in an
    /// earlier wave, so members of one wave may build in parallel.
    pub fn layers(&self) -> Vec<Vec<PackageName>> {
        let mut depth: HashMap<&PackageName, usize> = HashMap::new();
        let mut layers: Vec<Vec<PackageName>> = Vec::new();

        for pkg in &self.packages {
            let level = pkg
                .dependencies
                .iter()
                .filter_map(|edge| depth.get(&edge.name))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(&pkg.name, level);
            if layers.len() <= level {
                layers.resize_with(level + 1, Vec::new);
            }
            layers[level].push(pkg.name.clone());
        }

        for layer in &mut layers {
            layer.sort();
        }
        layers
    }
}

type Graph = BTreeMap<PackageName, BTreeMap<PackageName, PlanEdge>>;

/// Resolve `target` into a build plan.
///
/// Build and runtime edges are always followed; optional and test edges
/// only when `options` ask for them. Independent dependencies are visited
/// in lexicographic order so the plan is deterministic.
///
/// # Errors
///
/// Returns [`ResolveError`] for unknown names, build/runtime cycles, and
/// requirements no formula version can meet. No partial plan is produced.
pub fn resolve(
    target: &PackageName,
    lookup: &dyn FormulaLookup,
    installed: &InstalledSet,
    options: ResolveOptions,
) -> Result<BuildPlan, ResolveError> {
    if lookup.lookup(target).is_none() {
        return Err(ResolveError::UnknownTarget(target.clone()));
    }

    let kinds = options.kinds();
    let mut graph = collect_closure(target, lookup, &kinds)?;

    check_hard_cycles(target, &graph)?;
    let dropped_edges = drop_cycle_closing_edges(&mut graph);

    let mut order = Vec::new();
    let mut visited = HashSet::new();
    post_order(target, &graph, &mut visited, &mut order);

    let mut incoming: HashMap<&PackageName, Vec<(&PackageName, &PlanEdge)>> = HashMap::new();
    for name in &order {
        if let Some(edges) = graph.get(name) {
            for edge in edges.values() {
                incoming.entry(&edge.name).or_default().push((name, edge));
            }
        }
    }

    let mut packages = Vec::with_capacity(order.len());
    for name in &order {
        let Some(formula) = lookup.lookup(name) else {
            return Err(ResolveError::UnknownTarget(name.clone()));
        };
        let edges = incoming.get(name).map(Vec::as_slice).unwrap_or_default();

        let action = plan_action(name == target, formula, edges, installed, options);
        debug!(package = %name, ?action, "planned");

        // Every dependent must accept the one version left installed.
        let resulting = match &action {
            PlanAction::Skip { installed } => installed,
            PlanAction::Build | PlanAction::Upgrade { .. } => &formula.version,
        };
        for (dependent, edge) in edges {
            if let Some(req) = edge
                .requirements
                .iter()
                .find(|req| !version_satisfies_requirement(resulting.as_str(), req))
            {
                return Err(ResolveError::Unsatisfiable {
                    package: (*dependent).clone(),
                    dependency: name.clone(),
                    requirement: req.clone(),
                    available: resulting.clone(),
                });
            }
        }

        packages.push(PlannedPackage {
            name: name.clone(),
            version: formula.version.clone(),
            action,
            dependencies: graph
                .get(name)
                .map(|edges| edges.values().cloned().collect())
                .unwrap_or_default(),
        });
    }

    Ok(BuildPlan {
        target: target.clone(),
        packages,
        dropped_edges,
    })
}

fn plan_action(
    is_target: bool,
    formula: &Formula,
    incoming: &[(&PackageName, &PlanEdge)],
    installed: &InstalledSet,
    options: ResolveOptions,
) -> PlanAction {
    let Some(receipt) = installed.get(&formula.name) else {
        return PlanAction::Build;
    };
    let current = receipt.version.clone();

    if is_target {
        if options.reinstall || current < formula.version {
            return PlanAction::Upgrade { from: current };
        }
        return PlanAction::Skip { installed: current };
    }

    let meets_requirements = incoming.iter().all(|(_, edge)| {
        edge.requirements
            .iter()
            .all(|req| version_satisfies_requirement(current.as_str(), req))
    });
    if meets_requirements {
        PlanAction::Skip { installed: current }
    } else {
        PlanAction::Upgrade { from: current }
    }
}

/// Breadth-first walk over the included edge kinds, merging parallel edges.
fn collect_closure(
    target: &PackageName,
    lookup: &dyn FormulaLookup,
    kinds: &[DependencyKind],
) -> Result<Graph, ResolveError> {
    let mut graph = Graph::new();
    let mut queue = VecDeque::from([target.clone()]);

    while let Some(name) = queue.pop_front() {
        if graph.contains_key(&name) {
            continue;
        }
        let Some(formula) = lookup.lookup(&name) else {
            return Err(ResolveError::UnknownTarget(name));
        };

        let mut edges: BTreeMap<PackageName, PlanEdge> = BTreeMap::new();
        for dep in formula.dependencies_of(kinds) {
            if lookup.lookup(&dep.name).is_none() {
                return Err(ResolveError::UnknownDependency {
                    package: name.clone(),
                    dependency: dep.name.clone(),
                });
            }
            let edge = edges.entry(dep.name.clone()).or_insert_with(|| PlanEdge {
                name: dep.name.clone(),
                kinds: BTreeSet::new(),
                requirements: Vec::new(),
            });
            edge.kinds.insert(dep.kind);
            if let Some(req) = &dep.requirement {
                if !edge.requirements.contains(req) {
                    edge.requirements.push(req.clone());
                }
            }
            if !graph.contains_key(&dep.name) {
                queue.push_back(dep.name.clone());
            }
        }
        graph.insert(name, edges);
    }

    Ok(graph)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search over hard edges, target first, then every other
/// closure member in name order.
fn check_hard_cycles(target: &PackageName, graph: &Graph) -> Result<(), ResolveError> {
    let mut marks: HashMap<&PackageName, Mark> = HashMap::new();
    let mut stack: Vec<&PackageName> = Vec::new();

    let roots = std::iter::once(target).chain(graph.keys().filter(|n| *n != target));
    for root in roots {
        if !marks.contains_key(root) {
            visit_hard(root, graph, &mut marks, &mut stack)?;
        }
    }
    Ok(())
}

fn visit_hard<'g>(
    name: &'g PackageName,
    graph: &'g Graph,
    marks: &mut HashMap<&'g PackageName, Mark>,
    stack: &mut Vec<&'g PackageName>,
) -> Result<(), ResolveError> {
    marks.insert(name, Mark::Visiting);
    stack.push(name);

    if let Some(edges) = graph.get(name) {
        for edge in edges.values().filter(|e| e.is_hard()) {
            match marks.get(&edge.name) {
                Some(Mark::Done) => {}
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|n| **n == edge.name).unwrap_or(0);
                    let cycle = stack[start..].iter().map(|n| (*n).clone()).collect();
                    return Err(ResolveError::DependencyCycle { cycle });
                }
                None => visit_hard(&edge.name, graph, marks, stack)?,
            }
        }
    }

    stack.pop();
    marks.insert(name, Mark::Done);
    Ok(())
}

/// Remove soft-only edges that would close a cycle, considered in
/// `(from, to)` order against the hard subgraph plus already-kept edges.
fn drop_cycle_closing_edges(graph: &mut Graph) -> Vec<DroppedEdge> {
    let mut kept: HashMap<PackageName, Vec<PackageName>> = HashMap::new();
    let mut soft = Vec::new();
    for (from, edges) in graph.iter() {
        for edge in edges.values() {
            if edge.is_hard() {
                kept.entry(from.clone()).or_default().push(edge.name.clone());
            } else {
                soft.push((from.clone(), edge.name.clone()));
            }
        }
    }

    let mut dropped = Vec::new();
    for (from, to) in soft {
        if reaches(&kept, &to, &from) {
            warn!(from = %from, to = %to, "dropping dependency edge that closes a cycle");
            dropped.push(DroppedEdge { from, to });
        } else {
            kept.entry(from).or_default().push(to);
        }
    }

    for edge in &dropped {
        if let Some(edges) = graph.get_mut(&edge.from) {
            edges.remove(&edge.to);
        }
    }
    dropped
}

fn reaches(adjacency: &HashMap<PackageName, Vec<PackageName>>, from: &PackageName, to: &PackageName) -> bool {
    let mut seen = HashSet::new();
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(next) = adjacency.get(node) {
            stack.extend(next.iter());
        }
    }
    false
}

/// Dependencies before dependents; children in name order.
fn post_order(
    name: &PackageName,
    graph: &Graph,
    visited: &mut HashSet<PackageName>,
    order: &mut Vec<PackageName>,
) {
    if !visited.insert(name.clone()) {
        return;
    }
    if let Some(edges) = graph.get(name) {
        for dep in edges.keys() {
            post_order(dep, graph, visited, order);
        }
    }
    order.push(name.clone());
}

/// Installed packages that declare `name` as a runtime dependency, sorted.
pub fn installed_dependents(name: &PackageName, installed: &InstalledSet) -> Vec<PackageName> {
    installed
        .values()
        .filter(|r| &r.name != name)
        .filter(|r| {
            r.dependencies
                .iter()
                .any(|d| &d.name == name && d.kind == DependencyKind::Runtime)
        })
        .map(|r| r.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::{Receipt, ReceiptDependency, ReceiptSource, TestStatus};
    use cellar_schema::{Checksum, ChecksumAlgorithm, Dependency, SourceRef, Step};
    use std::path::PathBuf;

    fn formula(name: &str, version: &str, deps: &[(&str, DependencyKind)]) -> Formula {
        Formula {
            name: PackageName::new(name),
            version: Version::new(version),
            description: String::new(),
            homepage: String::new(),
            license: String::new(),
            caveats: String::new(),
            sources: vec![SourceRef::Archive {
                name: None,
                url: format!("https://example.com/{name}.tar.gz"),
                checksum: Checksum::of_bytes(ChecksumAlgorithm::Sha256, name.as_bytes()),
            }],
            dependencies: deps
                .iter()
                .map(|(n, kind)| Dependency {
                    name: PackageName::new(n),
                    kind: *kind,
                    requirement: None,
                })
                .collect(),
            install: vec![Step::Shell {
                command: "true".into(),
            }],
            test: vec![],
        }
    }

    fn lookup(formulae: Vec<Formula>) -> HashMap<PackageName, Formula> {
        formulae.into_iter().map(|f| (f.name.clone(), f)).collect()
    }

    fn receipt(name: &str, version: &str, deps: &[(&str, DependencyKind)]) -> Receipt {
        Receipt {
            name: PackageName::new(name),
            version: Version::new(version),
            installed_at: chrono::Utc::now(),
            keg: PathBuf::from("/nonexistent"),
            caveats: String::new(),
            source: ReceiptSource {
                url: String::new(),
                checksum: None,
            },
            test: TestStatus::Skipped,
            dependencies: deps
                .iter()
                .map(|(n, kind)| ReceiptDependency {
                    name: PackageName::new(n),
                    kind: *kind,
                    version: Version::new("1.0"),
                })
                .collect(),
        }
    }

    fn names(plan: &BuildPlan) -> Vec<&str> {
        plan.packages.iter().map(|p| p.name.as_str()).collect()
    }

    fn pkg(s: &str) -> PackageName {
        PackageName::new(s)
    }

    #[test]
    fn test_runtime_dependency_comes_first() {
        let set = lookup(vec![
            formula("foo", "1.0", &[("bar", DependencyKind::Runtime)]),
            formula("bar", "1.0", &[]),
        ]);
        let plan = resolve(&pkg("foo"), &set, &InstalledSet::new(), ResolveOptions::default())
            .unwrap();
        assert_eq!(names(&plan), vec!["bar", "foo"]);
        assert!(plan.packages.iter().all(|p| p.action == PlanAction::Build));
    }

    #[test]
    fn test_two_node_cycle_is_fatal() {
        let set = lookup(vec![
            formula("a", "1.0", &[("b", DependencyKind::Runtime)]),
            formula("b", "1.0", &[("a", DependencyKind::Runtime)]),
        ]);
        let err = resolve(&pkg("a"), &set, &InstalledSet::new(), ResolveOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::DependencyCycle {
                cycle: vec![pkg("a"), pkg("b")]
            }
        );
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
    }

    #[test]
    fn test_cycle_through_build_edge_is_fatal() {
        let set = lookup(vec![
            formula("app", "1.0", &[("lib", DependencyKind::Runtime)]),
            formula("lib", "1.0", &[("gen", DependencyKind::Build)]),
            formula("gen", "1.0", &[("lib", DependencyKind::Runtime)]),
        ]);
        let err = resolve(&pkg("app"), &set, &InstalledSet::new(), ResolveOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::DependencyCycle {
                cycle: vec![pkg("lib"), pkg("gen")]
            }
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let set = lookup(vec![formula("foo", "1.0", &[("ghost", DependencyKind::Build)])]);
        let err = resolve(&pkg("foo"), &set, &InstalledSet::new(), ResolveOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnknownDependency {
                package: pkg("foo"),
                dependency: pkg("ghost")
            }
        );
    }

    #[test]
    fn test_unknown_target() {
        let set = lookup(vec![]);
        assert!(matches!(
            resolve(&pkg("nope"), &set, &InstalledSet::new(), ResolveOptions::default()),
            Err(ResolveError::UnknownTarget(_))
        ));
    }

    #[test]
    fn test_lexicographic_tie_break() {
        let set = lookup(vec![
            formula(
                "app",
                "1.0",
                &[
                    ("zlib", DependencyKind::Runtime),
                    ("curl", DependencyKind::Runtime),
                    ("make", DependencyKind::Build),
                ],
            ),
            formula("zlib", "1.0", &[]),
            formula("curl", "1.0", &[("zlib", DependencyKind::Runtime)]),
            formula("make", "1.0", &[]),
        ]);
        let plan = resolve(&pkg("app"), &set, &InstalledSet::new(), ResolveOptions::default())
            .unwrap();
        assert_eq!(names(&plan), vec!["zlib", "curl", "make", "app"]);
        assert_eq!(
            plan.layers(),
            vec![
                vec![pkg("make"), pkg("zlib")],
                vec![pkg("curl")],
                vec![pkg("app")]
            ]
        );
    }

    #[test]
    fn test_every_dependency_precedes_dependent() {
        // A diamond plus a chain: d <- b, c <- a; e <- d.
        let set = lookup(vec![
            formula(
                "a",
                "1",
                &[("b", DependencyKind::Runtime), ("c", DependencyKind::Build)],
            ),
            formula("b", "1", &[("d", DependencyKind::Runtime)]),
            formula("c", "1", &[("d", DependencyKind::Build)]),
            formula("d", "1", &[("e", DependencyKind::Runtime)]),
            formula("e", "1", &[]),
        ]);
        let plan = resolve(&pkg("a"), &set, &InstalledSet::new(), ResolveOptions::default())
            .unwrap();
        let order = plan.names();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        for p in &plan.packages {
            for edge in &p.dependencies {
                assert!(pos(edge.name.as_str()) < pos(p.name.as_str()));
            }
        }
        assert_eq!(order.last(), Some(&pkg("a")));
    }

    #[test]
    fn test_optional_and_test_edges_need_opt_in() {
        let set = lookup(vec![
            formula(
                "app",
                "1.0",
                &[
                    ("docs", DependencyKind::Optional),
                    ("check", DependencyKind::Test),
                ],
            ),
            formula("docs", "1.0", &[]),
            formula("check", "1.0", &[]),
        ]);
        let installed = InstalledSet::new();

        let plan = resolve(&pkg("app"), &set, &installed, ResolveOptions::default()).unwrap();
        assert_eq!(names(&plan), vec!["app"]);

        let opts = ResolveOptions {
            include_optional: true,
            include_test: true,
            reinstall: false,
        };
        let plan = resolve(&pkg("app"), &set, &installed, opts).unwrap();
        assert_eq!(names(&plan), vec!["check", "docs", "app"]);
    }

    #[test]
    fn test_soft_cycle_edge_is_dropped() {
        let set = lookup(vec![
            formula("a", "1.0", &[("b", DependencyKind::Runtime)]),
            formula("b", "1.0", &[("a", DependencyKind::Optional)]),
        ]);
        let opts = ResolveOptions {
            include_optional: true,
            ..ResolveOptions::default()
        };
        let plan = resolve(&pkg("a"), &set, &InstalledSet::new(), opts).unwrap();
        assert_eq!(names(&plan), vec!["b", "a"]);
        assert_eq!(
            plan.dropped_edges,
            vec![DroppedEdge {
                from: pkg("b"),
                to: pkg("a")
            }]
        );
    }

    #[test]
    fn test_parallel_edges_are_merged() {
        let mut f = formula(
            "app",
            "1.0",
            &[("zlib", DependencyKind::Build), ("zlib", DependencyKind::Runtime)],
        );
        f.dependencies[1].requirement = Some(">=1.2".into());
        let set = lookup(vec![f, formula("zlib", "1.3", &[])]);
        let plan = resolve(&pkg("app"), &set, &InstalledSet::new(), ResolveOptions::default())
            .unwrap();
        let app = plan.get(&pkg("app")).unwrap();
        assert_eq!(app.dependencies.len(), 1);
        assert_eq!(
            app.dependencies[0].kinds,
            BTreeSet::from([DependencyKind::Build, DependencyKind::Runtime])
        );
        assert_eq!(app.dependencies[0].requirements, vec![">=1.2".to_string()]);
    }

    #[test]
    fn test_installed_dependency_is_skipped() {
        let set = lookup(vec![
            formula("foo", "1.0", &[("bar", DependencyKind::Runtime)]),
            formula("bar", "2.0", &[]),
        ]);
        let installed = InstalledSet::from([(pkg("bar"), receipt("bar", "1.5", &[]))]);
        let plan = resolve(&pkg("foo"), &set, &installed, ResolveOptions::default()).unwrap();
        assert_eq!(names(&plan), vec!["bar", "foo"]);
        assert_eq!(
            plan.packages[0].action,
            PlanAction::Skip {
                installed: Version::new("1.5")
            }
        );
        assert_eq!(plan.packages[1].action, PlanAction::Build);
    }

    #[test]
    fn test_installed_dependency_below_requirement_is_upgraded() {
        let mut foo = formula("foo", "1.0", &[("bar", DependencyKind::Runtime)]);
        foo.dependencies[0].requirement = Some(">=2.0".into());
        let set = lookup(vec![foo, formula("bar", "2.1", &[])]);
        let installed = InstalledSet::from([(pkg("bar"), receipt("bar", "1.5", &[]))]);
        let plan = resolve(&pkg("foo"), &set, &installed, ResolveOptions::default()).unwrap();
        assert_eq!(
            plan.packages[0].action,
            PlanAction::Upgrade {
                from: Version::new("1.5")
            }
        );
    }

    #[test]
    fn test_unsatisfiable_requirement() {
        let mut foo = formula("foo", "1.0", &[("bar", DependencyKind::Runtime)]);
        foo.dependencies[0].requirement = Some(">=3".into());
        let set = lookup(vec![foo, formula("bar", "2.1", &[])]);
        assert!(matches!(
            resolve(&pkg("foo"), &set, &InstalledSet::new(), ResolveOptions::default()),
            Err(ResolveError::Unsatisfiable { .. })
        ));
    }

    #[test]
    fn test_installed_version_outside_formula_requirement_is_kept() {
        let mut foo = formula("foo", "1.0", &[("bar", DependencyKind::Runtime)]);
        foo.dependencies[0].requirement = Some("<2".into());
        let set = lookup(vec![foo, formula("bar", "2.1", &[])]);
        let installed = InstalledSet::from([(pkg("bar"), receipt("bar", "1.5", &[]))]);
        let plan = resolve(&pkg("foo"), &set, &installed, ResolveOptions::default()).unwrap();
        assert_eq!(
            plan.packages[0].action,
            PlanAction::Skip {
                installed: Version::new("1.5")
            }
        );
    }

    #[test]
    fn test_conflicting_requirements_on_one_dependency() {
        let mut foo = formula("foo", "1.0", &[("bar", DependencyKind::Runtime)]);
        foo.dependencies[0].requirement = Some(">=2".into());
        let mut baz = formula("baz", "1.0", &[("bar", DependencyKind::Runtime)]);
        baz.dependencies[0].requirement = Some("<2".into());
        let top = formula(
            "top",
            "1.0",
            &[("baz", DependencyKind::Runtime), ("foo", DependencyKind::Runtime)],
        );
        let set = lookup(vec![top, foo, baz, formula("bar", "2.1", &[])]);
        let installed = InstalledSet::from([(pkg("bar"), receipt("bar", "1.5", &[]))]);

        // Upgrading bar to 2.1 would satisfy foo but break baz.
        let err = resolve(&pkg("top"), &set, &installed, ResolveOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ResolveError::Unsatisfiable {
                package: pkg("baz"),
                dependency: pkg("bar"),
                requirement: "<2".into(),
                available: Version::new("2.1"),
            }
        );

        // Without an install, building 2.1 fails the same way.
        assert!(matches!(
            resolve(&pkg("top"), &set, &InstalledSet::new(), ResolveOptions::default()),
            Err(ResolveError::Unsatisfiable { .. })
        ));
    }

    #[test]
    fn test_installed_target_is_idempotent() {
        let set = lookup(vec![formula("foo", "1.0", &[])]);
        let installed = InstalledSet::from([(pkg("foo"), receipt("foo", "1.0", &[]))]);
        let plan = resolve(&pkg("foo"), &set, &installed, ResolveOptions::default()).unwrap();
        assert!(plan.is_satisfied());

        let opts = ResolveOptions {
            reinstall: true,
            ..ResolveOptions::default()
        };
        let plan = resolve(&pkg("foo"), &set, &installed, opts).unwrap();
        assert!(!plan.is_satisfied());
    }

    #[test]
    fn test_older_target_is_upgraded() {
        let set = lookup(vec![formula("foo", "1.1", &[])]);
        let installed = InstalledSet::from([(pkg("foo"), receipt("foo", "1.0", &[]))]);
        let plan = resolve(&pkg("foo"), &set, &installed, ResolveOptions::default()).unwrap();
        assert_eq!(
            plan.packages[0].action,
            PlanAction::Upgrade {
                from: Version::new("1.0")
            }
        );
    }

    #[test]
    fn test_installed_dependents_counts_runtime_edges_only() {
        let installed = InstalledSet::from([
            (pkg("bar"), receipt("bar", "1.0", &[])),
            (pkg("foo"), receipt("foo", "1.0", &[("bar", DependencyKind::Runtime)])),
            (pkg("baz"), receipt("baz", "1.0", &[("bar", DependencyKind::Build)])),
        ]);
        assert_eq!(installed_dependents(&pkg("bar"), &installed), vec![pkg("foo")]);
        assert!(installed_dependents(&pkg("foo"), &installed).is_empty());
    }
}
