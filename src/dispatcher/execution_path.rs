//! Layering of a stage's hooks into concurrent waves and action pipelines.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use super::event::Event;
use crate::hooks::Hook;

/// Sequence of leaf hooks executed back to back as one unit of persona work.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPlan {
    pub name: String,
    pub steps: Vec<String>,
    pub order: u32,
    pub weight: f64,
}

/// The stage's hook set arranged as a layered DAG.
#[derive(Debug, Clone, Default)]
pub struct ExecutionGraph {
    pub events: BTreeMap<String, Event>,
    pub waves: Vec<Vec<String>>,
    pub plans: Vec<ActionPlan>,
}

fn add_edge(events: &mut BTreeMap<String, Event>, from: &str, to: &str) {
    if let Some(event) = events.get_mut(from) {
        if !event.next_map.iter().any(|n| n == to) {
            event.next_map.push(to.to_string());
        }
    }
    if let Some(event) = events.get_mut(to) {
        if !event.previous_map.iter().any(|n| n == from) {
            event.previous_map.push(from.to_string());
        }
    }
}

impl ExecutionGraph {
    /// Builds the graph from validated hooks. Channel listeners are left out:
    /// they only ever run when a notifier fires.
    pub fn build(hooks: &[Hook], listeners: &HashSet<String>) -> Self {
        let mut events: BTreeMap<String, Event> = BTreeMap::new();
        for (index, hook) in hooks.iter().enumerate() {
            let Some(priority) = hook.hook_type.priority() else {
                continue;
            };
            if listeners.contains(&hook.name) {
                continue;
            }
            events.insert(
                hook.name.clone(),
                Event::new(&hook.name, hook.hook_type, priority, hook.order, index),
            );
        }

        for hook in hooks {
            if !events.contains_key(&hook.name) {
                continue;
            }
            for target in &hook.names {
                if !events.contains_key(target) {
                    continue;
                }
                if hook.pre {
                    add_edge(&mut events, &hook.name, target);
                    if let Some(event) = events.get_mut(target) {
                        event.pre_sources.push(hook.name.clone());
                    }
                } else {
                    add_edge(&mut events, target, &hook.name);
                    if let Some(event) = events.get_mut(target) {
                        event.post_sources.push(hook.name.clone());
                    }
                }
            }
        }

        let paths: Vec<(String, Vec<Vec<String>>)> = events
            .keys()
            .map(|name| (name.clone(), breadth_first_layers(&events, name)))
            .collect();
        for (name, path) in paths {
            if let Some(event) = events.get_mut(&name) {
                event.execution_path = path;
            }
        }

        let waves = layer_waves(&events);
        let plans = action_plans(hooks, &events);
        Self {
            events,
            waves,
            plans,
        }
    }

    /// Every hook reachable from `name` through successors, excluding itself.
    pub fn descendants(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([name]);
        while let Some(current) = queue.pop_front() {
            if let Some(event) = self.events.get(current) {
                for next in &event.next_map {
                    if seen.insert(next.clone()) {
                        queue.push_back(next);
                    }
                }
            }
        }
        seen
    }
}

fn breadth_first_layers(events: &BTreeMap<String, Event>, start: &str) -> Vec<Vec<String>> {
    let mut layers = vec![vec![start.to_string()]];
    let mut seen: HashSet<String> = HashSet::from([start.to_string()]);
    loop {
        let mut next_layer = Vec::new();
        if let Some(current) = layers.last() {
            for name in current {
                if let Some(event) = events.get(name) {
                    for next in &event.next_map {
                        if seen.insert(next.clone()) {
                            next_layer.push(next.clone());
                        }
                    }
                }
            }
        }
        if next_layer.is_empty() {
            break;
        }
        layers.push(next_layer);
    }
    layers
}

/// Assigns each non-leaf event a wave: after all of its predecessors and after
/// every earlier-assigned event with a lower `(priority, order)` key.
fn layer_waves(events: &BTreeMap<String, Event>) -> Vec<Vec<String>> {
    let schedulable: HashMap<&str, &Event> = events
        .iter()
        .filter(|(_, e)| !e.hook_type.is_leaf())
        .map(|(name, e)| (name.as_str(), e))
        .collect();

    let mut indegree: HashMap<&str, usize> = schedulable
        .iter()
        .map(|(name, e)| {
            let count = e
                .previous_map
                .iter()
                .filter(|p| schedulable.contains_key(p.as_str()))
                .count();
            (*name, count)
        })
        .collect();

    let rank = |e: &Event| (e.priority, e.order, e.index);
    let mut ready: BTreeSet<((u8, u32, usize), &str)> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(name, _)| (rank(schedulable[name]), *name))
        .collect();

    let mut layer_of: HashMap<&str, usize> = HashMap::new();
    let mut max_layer_by_key: BTreeMap<(u8, u32), usize> = BTreeMap::new();

    while let Some(entry) = ready.pop_first() {
        let (_, name) = entry;
        let event = schedulable[name];
        let floor = max_layer_by_key
            .range(..event.key())
            .map(|(_, layer)| layer + 1)
            .max()
            .unwrap_or(0);
        let after_deps = event
            .previous_map
            .iter()
            .filter_map(|p| layer_of.get(p.as_str()).map(|l| l + 1))
            .max()
            .unwrap_or(0);
        let layer = floor.max(after_deps);
        layer_of.insert(name, layer);
        let slot = max_layer_by_key.entry(event.key()).or_insert(layer);
        *slot = (*slot).max(layer);

        for next in &event.next_map {
            if let Some(degree) = indegree.get_mut(next.as_str()) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    ready.insert((rank(schedulable[next.as_str()]), next.as_str()));
                }
            }
        }
    }

    let depth = layer_of.values().copied().max().map(|m| m + 1).unwrap_or(0);
    let mut waves: Vec<Vec<(&str, (u8, u32, usize))>> = vec![Vec::new(); depth];
    for (name, layer) in &layer_of {
        waves[*layer].push((*name, rank(schedulable[*name])));
    }
    waves
        .into_iter()
        .filter(|wave| !wave.is_empty())
        .map(|mut wave| {
            wave.sort_by_key(|(_, r)| *r);
            wave.into_iter().map(|(name, _)| name.to_string()).collect()
        })
        .collect()
}

/// One plan per leaf that no other leaf depends on. Leaf dependencies are
/// stitched in ahead of their dependents.
fn action_plans(hooks: &[Hook], events: &BTreeMap<String, Event>) -> Vec<ActionPlan> {
    let leaves: Vec<&Hook> = hooks
        .iter()
        .filter(|h| h.hook_type.is_leaf() && events.contains_key(&h.name))
        .collect();
    let is_leaf = |name: &str| {
        events
            .get(name)
            .map(|e| e.hook_type.is_leaf())
            .unwrap_or(false)
    };

    let mut plans = Vec::new();
    for leaf in &leaves {
        let Some(event) = events.get(&leaf.name) else {
            continue;
        };
        let has_leaf_dependent = event.next_map.iter().any(|n| is_leaf(n));
        if has_leaf_dependent {
            continue;
        }

        let mut steps = Vec::new();
        let mut visited = HashSet::new();
        stitch(&leaf.name, events, &is_leaf, &mut visited, &mut steps);
        plans.push(ActionPlan {
            name: leaf.name.clone(),
            steps,
            order: leaf.order,
            weight: leaf.effective_weight(),
        });
    }
    plans.sort_by_key(|p| (p.order, events.get(&p.name).map(|e| e.index).unwrap_or(0)));
    plans
}

fn stitch(
    name: &str,
    events: &BTreeMap<String, Event>,
    is_leaf: &dyn Fn(&str) -> bool,
    visited: &mut HashSet<String>,
    steps: &mut Vec<String>,
) {
    if !visited.insert(name.to_string()) {
        return;
    }
    if let Some(event) = events.get(name) {
        let mut deps: Vec<&String> = event
            .previous_map
            .iter()
            .filter(|p| is_leaf(p))
            .collect();
        deps.sort_by_key(|p| events.get(p.as_str()).map(|e| (e.order, e.index)));
        for dep in deps {
            stitch(dep, events, is_leaf, visited, steps);
        }
    }
    steps.push(name.to_string());
}
