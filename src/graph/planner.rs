use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use super::builder::AssembledGraph;
use crate::error::{GraphError, GraphResult};
use crate::stages::{StageCatalog, StageType};
use crate::transitions::{transition_rule, Edge};

/// Generations and edges of an assembled graph, in deterministic order.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Antichains of stage names; every stage depends only on earlier generations.
    pub generations: Vec<Vec<String>>,
    /// Every `dependency -> stage` edge, sorted by source then destination.
    pub edges: Vec<Edge>,
}

impl ExecutionPlan {
    pub fn outgoing<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == source)
    }

    pub fn incoming<'a>(&'a self, destination: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.destination == destination)
    }

    /// Destinations of `source` with the same stage type as `destination`,
    /// sorted by name. A Setup fanning into several Executes splits over these.
    pub fn siblings(&self, source: &str, destination_type: StageType) -> Vec<String> {
        let mut siblings: Vec<String> = self
            .outgoing(source)
            .filter(|e| e.destination_type == destination_type)
            .map(|e| e.destination.clone())
            .collect();
        siblings.sort();
        siblings
    }

    pub fn generation_of(&self, stage: &str) -> Option<usize> {
        self.generations
            .iter()
            .position(|generation| generation.iter().any(|s| s == stage))
    }

    pub fn stage_count(&self) -> usize {
        self.generations.iter().map(Vec::len).sum()
    }
}

/// Validates an assembled graph and computes its generations.
///
/// Fails on cycles, isolated declared stages, edges the transition table
/// rejects, and stages whose required keys no upstream stage provides.
pub fn plan(graph: &AssembledGraph) -> GraphResult<ExecutionPlan> {
    let catalog = graph.catalog.as_ref();
    check_isolated(catalog, &graph.declared)?;

    let mut dag: DiGraph<String, ()> = DiGraph::new();
    let mut index: HashMap<String, NodeIndex> = HashMap::new();
    for config in catalog.configs().filter(|c| c.stage_type != StageType::Error) {
        index.insert(config.name.clone(), dag.add_node(config.name.clone()));
    }
    for config in catalog.configs().filter(|c| c.stage_type != StageType::Error) {
        for dependency in &config.dependencies {
            let (Some(&from), Some(&to)) = (index.get(dependency), index.get(&config.name)) else {
                return Err(GraphError::UnknownDependency {
                    stage: config.name.clone(),
                    dependency: dependency.clone(),
                });
            };
            dag.update_edge(from, to, ());
        }
    }

    if is_cyclic_directed(&dag) {
        let mut members: Vec<String> = tarjan_scc(&dag)
            .into_iter()
            .find(|component| component.len() > 1 || component.iter().any(|n| dag.contains_edge(*n, *n)))
            .unwrap_or_default()
            .into_iter()
            .map(|n| dag[n].clone())
            .collect();
        members.sort();
        return Err(GraphError::CycleDetected(members));
    }

    let edges = check_transitions(catalog, &dag)?;
    check_requirements(catalog, &dag, &index)?;
    let generations = generations(&dag);

    tracing::debug!(
        graph = %graph.name,
        generations = generations.len(),
        edges = edges.len(),
        "Graph planned"
    );
    Ok(ExecutionPlan { generations, edges })
}

fn check_isolated(catalog: &StageCatalog, declared: &[String]) -> GraphResult<()> {
    if declared.len() < 2 {
        return Ok(());
    }
    let declared_set: BTreeSet<&str> = declared.iter().map(String::as_str).collect();
    let isolated: Vec<String> = declared
        .iter()
        .filter(|name| {
            let has_declared_dependency = catalog
                .config(name)
                .map(|c| c.dependencies.iter().any(|d| declared_set.contains(d.as_str())))
                .unwrap_or(false);
            let has_declared_dependent = catalog
                .dependents(name)
                .iter()
                .any(|d| declared_set.contains(d.as_str()));
            !has_declared_dependency && !has_declared_dependent
        })
        .cloned()
        .collect();
    if isolated.is_empty() {
        Ok(())
    } else {
        Err(GraphError::IsolatedStage(isolated))
    }
}

fn check_transitions(catalog: &StageCatalog, dag: &DiGraph<String, ()>) -> GraphResult<Vec<Edge>> {
    let mut pairs: Vec<(&str, &str)> = dag
        .edge_indices()
        .filter_map(|edge| dag.edge_endpoints(edge))
        .map(|(from, to)| (dag[from].as_str(), dag[to].as_str()))
        .collect();
    pairs.sort();

    let mut edges = Vec::with_capacity(pairs.len());
    for (from, to) in pairs {
        let (Some(source), Some(destination)) = (catalog.config(from), catalog.config(to)) else {
            continue;
        };
        if !transition_rule(source.stage_type, destination.stage_type).valid {
            return Err(GraphError::InvalidTransition {
                source_stage: source.name.clone(),
                source_type: source.stage_type,
                destination_stage: destination.name.clone(),
                destination_type: destination.stage_type,
            });
        }
        edges.push(Edge::between(source, destination));
    }

    // Pairs that do not allow multiples admit one destination per source.
    let mut counts: BTreeMap<(&str, StageType), usize> = BTreeMap::new();
    for edge in &edges {
        if !transition_rule(edge.source_type, edge.destination_type).allow_multiple {
            let count = counts
                .entry((edge.source.as_str(), edge.destination_type))
                .or_default();
            *count += 1;
            if *count > 1 {
                return Err(GraphError::InvalidTransition {
                    source_stage: edge.source.clone(),
                    source_type: edge.source_type,
                    destination_stage: edge.destination.clone(),
                    destination_type: edge.destination_type,
                });
            }
        }
    }
    Ok(edges)
}

fn check_requirements(
    catalog: &StageCatalog,
    dag: &DiGraph<String, ()>,
    index: &HashMap<String, NodeIndex>,
) -> GraphResult<()> {
    for (name, &node) in index {
        let Some(config) = catalog.config(name) else {
            continue;
        };
        let required = config.requires_keys();
        if required.is_empty() {
            continue;
        }
        let mut provided: BTreeSet<String> = BTreeSet::new();
        let mut stack: Vec<NodeIndex> = dag.neighbors_directed(node, Direction::Incoming).collect();
        let mut seen: BTreeSet<NodeIndex> = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(upstream) = catalog.config(&dag[current]) {
                provided.extend(upstream.provides_keys());
            }
            stack.extend(dag.neighbors_directed(current, Direction::Incoming));
        }
        if let Some(missing) = required.iter().find(|key| !provided.contains(*key)) {
            return Err(GraphError::InvalidStage {
                stage: name.clone(),
                reason: format!("requires '{missing}' but no upstream stage provides it"),
            });
        }
    }
    Ok(())
}

/// Kahn layering: generation k holds the stages whose longest dependency
/// chain from a source has length k. Names are sorted within a generation.
fn generations(dag: &DiGraph<String, ()>) -> Vec<Vec<String>> {
    let mut indegree: HashMap<NodeIndex, usize> = dag
        .node_indices()
        .map(|n| (n, dag.neighbors_directed(n, Direction::Incoming).count()))
        .collect();
    let mut current: Vec<NodeIndex> = dag.node_indices().filter(|n| indegree[n] == 0).collect();
    let mut layers = Vec::new();
    while !current.is_empty() {
        let mut next = Vec::new();
        for node in &current {
            for successor in dag.neighbors_directed(*node, Direction::Outgoing) {
                if let Some(degree) = indegree.get_mut(&successor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(successor);
                    }
                }
            }
        }
        let mut names: Vec<String> = current.iter().map(|n| dag[*n].clone()).collect();
        names.sort();
        layers.push(names);
        current = next;
    }
    layers
}
