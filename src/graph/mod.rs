//! Static dependency analysis over the tool graph.
//!
//! The graph is built once from the catalog and never mutated: analysis is
//! pure, so the same snapshot always produces the same answers. Edges run
//! from a dependency to its dependents; cycles are reported, never
//! auto-corrected.

mod catalog;

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::Serialize;
use serde_json::{json, Value};

use crate::chain::ChainCatalog;
use crate::error::EngineError;

/// Side effects a tool has on CRM data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// Reads records.
    Read,
    /// Creates records.
    Create,
    /// Mutates existing records.
    Update,
    /// Destroys records.
    Delete,
}

/// One node of the static tool graph.
#[derive(Debug, Clone, Serialize)]
pub struct ToolNode {
    /// Tool name.
    pub name: String,
    /// Functional grouping (leads, accounts, insights, ...).
    pub category: String,
    /// Tools this one depends on.
    pub dependencies: Vec<String>,
    /// Notable input fields.
    pub inputs: Vec<String>,
    /// Notable output shapes.
    pub outputs: Vec<String>,
    /// Data effects.
    pub effects: Vec<Effect>,
}

/// Direct and transitive reachability from one node.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReachabilityReport {
    /// Immediate neighbours.
    pub direct: Vec<String>,
    /// Everything reachable beyond the immediate neighbours.
    pub transitive: Vec<String>,
}

/// Cycle detection outcome.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Whether any cycle exists.
    pub has_circular: bool,
    /// Each cycle as the node path that closes it.
    pub cycles: Vec<Vec<String>>,
}

/// One static chain that references a tool.
#[derive(Debug, Clone, Serialize)]
pub struct AffectedChain {
    /// Chain name.
    pub chain: String,
    /// Zero-based index of the referencing step.
    pub step_index: usize,
    /// Total steps in the chain.
    pub total_steps: usize,
    /// Whether the referencing step is required.
    pub required: bool,
}

/// Full impact assessment for one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ImpactReport {
    /// The assessed tool.
    pub tool: String,
    /// Its category.
    pub category: String,
    /// Its data effects.
    pub effects: Vec<Effect>,
    /// Its notable inputs.
    pub inputs: Vec<String>,
    /// Its notable outputs.
    pub outputs: Vec<String>,
    /// What it depends on.
    pub dependencies: ReachabilityReport,
    /// What depends on it.
    pub dependents: ReachabilityReport,
    /// Static chains whose steps reference it.
    pub affected_chains: Vec<AffectedChain>,
    /// Bounded criticality score, 0–100.
    pub impact_score: u32,
}

/// Graph materialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    /// `{nodes: [...], edges: [{from, to}]}`.
    NodesEdges,
    /// `{adjacency: {name: [dependencies]}}`.
    Adjacency,
}

/// The static dependency analyzer.
pub struct DependencyAnalyzer {
    nodes: BTreeMap<String, ToolNode>,
    reverse: BTreeMap<String, Vec<String>>,
}

impl DependencyAnalyzer {
    /// Build from an explicit node list.
    pub fn new(node_list: Vec<ToolNode>) -> Self {
        let mut nodes = BTreeMap::new();
        let mut reverse: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for node in node_list {
            for dependency in &node.dependencies {
                reverse
                    .entry(dependency.clone())
                    .or_default()
                    .push(node.name.clone());
            }
            nodes.insert(node.name.clone(), node);
        }
        for dependents in reverse.values_mut() {
            dependents.sort_unstable();
        }
        Self { nodes, reverse }
    }

    /// The built-in release graph.
    pub fn builtin() -> Self {
        Self::new(catalog::builtin_nodes())
    }

    /// Look up a node.
    pub fn node(&self, name: &str) -> Option<&ToolNode> {
        self.nodes.get(name)
    }

    /// Direct and transitive dependencies of a tool, excluding itself.
    pub fn dependencies(&self, name: &str) -> Result<ReachabilityReport, EngineError> {
        self.require(name)?;
        Ok(self.reach(name, |n| self.forward_edges(n)))
    }

    /// Direct and transitive dependents of a tool, excluding itself.
    pub fn dependents(&self, name: &str) -> Result<ReachabilityReport, EngineError> {
        self.require(name)?;
        Ok(self.reach(name, |n| self.reverse_edges(n)))
    }

    /// Materialize the graph, optionally filtered to one category.
    ///
    /// With a category filter, edges whose endpoints cross the filter
    /// boundary are elided.
    pub fn graph(&self, category: Option<&str>, format: GraphFormat) -> Value {
        let included: Vec<&ToolNode> = self
            .nodes
            .values()
            .filter(|node| category.is_none_or(|c| node.category == c))
            .collect();
        let included_names: HashSet<&str> =
            included.iter().map(|n| n.name.as_str()).collect();

        match format {
            GraphFormat::NodesEdges => {
                let nodes: Vec<Value> = included
                    .iter()
                    .map(|node| {
                        json!({
                            "name": node.name,
                            "category": node.category,
                            "effects": node.effects,
                        })
                    })
                    .collect();
                let edges: Vec<Value> = included
                    .iter()
                    .flat_map(|node| {
                        node.dependencies
                            .iter()
                            .filter(|dep| included_names.contains(dep.as_str()))
                            .map(|dep| json!({ "from": dep, "to": node.name }))
                    })
                    .collect();
                json!({ "nodes": nodes, "edges": edges })
            }
            GraphFormat::Adjacency => {
                let adjacency: serde_json::Map<String, Value> = included
                    .iter()
                    .map(|node| {
                        let deps: Vec<&String> = node
                            .dependencies
                            .iter()
                            .filter(|dep| included_names.contains(dep.as_str()))
                            .collect();
                        (node.name.clone(), json!(deps))
                    })
                    .collect();
                json!({ "adjacency": adjacency })
            }
        }
    }

    /// DFS cycle detection with an explicit recursion stack.
    pub fn detect_cycles(&self) -> CycleReport {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut cycles: Vec<Vec<String>> = Vec::new();

        for start in self.nodes.keys() {
            if visited.contains(start.as_str()) {
                continue;
            }
            let mut stack: Vec<&str> = Vec::new();
            self.dfs(start, &mut visited, &mut stack, &mut cycles);
        }

        CycleReport {
            has_circular: !cycles.is_empty(),
            cycles,
        }
    }

    /// Assess a tool's blast radius, cross-referencing static chains.
    pub fn impact(
        &self,
        name: &str,
        chains: &ChainCatalog,
    ) -> Result<ImpactReport, EngineError> {
        let node = self.require(name)?;
        let dependencies = self.reach(name, |n| self.forward_edges(n));
        let dependents = self.reach(name, |n| self.reverse_edges(n));

        let mut affected_chains = Vec::new();
        for chain in chains.iter() {
            if chain.dynamic {
                continue;
            }
            let total_steps = chain.steps.len();
            for (step_index, step) in chain.steps.iter().enumerate() {
                if step.tool == name {
                    affected_chains.push(AffectedChain {
                        chain: chain.name.clone(),
                        step_index,
                        total_steps,
                        required: step.required,
                    });
                }
            }
        }

        let required_chains = affected_chains.iter().filter(|c| c.required).count();
        let score = score_component(dependents.direct.len(), 15)
            .saturating_add(score_component(dependents.transitive.len(), 5))
            .saturating_add(score_component(affected_chains.len(), 10))
            .saturating_add(score_component(required_chains, 5))
            .min(100);

        Ok(ImpactReport {
            tool: node.name.clone(),
            category: node.category.clone(),
            effects: node.effects.clone(),
            inputs: node.inputs.clone(),
            outputs: node.outputs.clone(),
            dependencies,
            dependents,
            affected_chains,
            impact_score: score,
        })
    }

    fn require(&self, name: &str) -> Result<&ToolNode, EngineError> {
        self.nodes.get(name).ok_or_else(|| EngineError::UnknownTool {
            tool: name.to_owned(),
        })
    }

    fn forward_edges(&self, name: &str) -> Vec<String> {
        self.nodes
            .get(name)
            .map(|n| n.dependencies.clone())
            .unwrap_or_default()
    }

    fn reverse_edges(&self, name: &str) -> Vec<String> {
        self.reverse.get(name).cloned().unwrap_or_default()
    }

    /// BFS splitting reachability into direct neighbours and the rest.
    fn reach(&self, start: &str, edges: impl Fn(&str) -> Vec<String>) -> ReachabilityReport {
        let direct: Vec<String> = edges(start)
            .into_iter()
            .filter(|n| n != start)
            .collect();

        let mut seen: HashSet<String> = direct.iter().cloned().collect();
        seen.insert(start.to_owned());
        let mut queue: VecDeque<String> = direct.iter().cloned().collect();
        let mut transitive = Vec::new();

        while let Some(current) = queue.pop_front() {
            for next in edges(&current) {
                if seen.insert(next.clone()) {
                    transitive.push(next.clone());
                    queue.push_back(next);
                }
            }
        }

        transitive.sort_unstable();
        ReachabilityReport { direct, transitive }
    }

    fn dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        if let Some(position) = stack.iter().position(|n| *n == node) {
            let cycle = stack[position..]
                .iter()
                .map(|n| (*n).to_owned())
                .chain(std::iter::once(node.to_owned()))
                .collect();
            cycles.push(cycle);
            return;
        }
        if !visited.insert(node) {
            return;
        }

        stack.push(node);
        for next in self.forward_edges(node) {
            if let Some((key, _)) = self.nodes.get_key_value(next.as_str()) {
                self.dfs(key, visited, stack, cycles);
            }
        }
        stack.pop();
    }
}

fn score_component(count: usize, weight: u32) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX).saturating_mul(weight)
}
