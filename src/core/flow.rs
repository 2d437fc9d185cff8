//! Directed graph of steps and deciders connected by transition rules.
//!
//! Rules attached to a node are evaluated against the exit status the node
//! produced. An exact code match always wins; otherwise the first wildcard
//! pattern (`*` for any run of characters, `?` for one character) in
//! declaration order applies.
//!
//! ```rust
//! use spring_batch_flow::core::flow::{EndState, FlowBuilder};
//! use spring_batch_flow::core::job::JobExecution;
//! use spring_batch_flow::core::parameters::JobParameters;
//! use spring_batch_flow::core::status::ExitStatus;
//! use spring_batch_flow::core::step::{StepBuilder, StepExecution};
//! use spring_batch_flow::core::tasklet::RepeatStatus;
//! use spring_batch_flow::BatchError;
//!
//! let noop = |_: &StepExecution, _: &JobParameters| -> Result<RepeatStatus, BatchError> {
//!     Ok(RepeatStatus::Finished)
//! };
//! let decider = |_: &JobExecution| -> Result<ExitStatus, BatchError> {
//!     Ok(ExitStatus::new("NO_TRIM_REQUIRED"))
//! };
//!
//! let select = StepBuilder::new("select").tasklet(&noop).build()?;
//! let trim = StepBuilder::new("trim").tasklet(&noop).build()?;
//! let arrange = StepBuilder::new("arrange").tasklet(&noop).build()?;
//!
//! let flow = FlowBuilder::new()
//!     .start(&select)
//!     .decider("needs-trim", &decider)
//!     .step(&trim)
//!     .step(&arrange)
//!     .rule("select", "*", "needs-trim")
//!     .rule("needs-trim", "TRIM_REQUIRED", "trim")
//!     .rule("needs-trim", "*", "arrange")
//!     .rule("trim", "*", "arrange")
//!     .end("arrange")
//!     .build()?;
//!
//! assert_eq!(flow.get_start(), "select");
//! # Ok::<(), BatchError>(())
//! ```

use std::collections::{HashMap, HashSet};

use glob::Pattern;
use petgraph::{algo::toposort, graph::DiGraph, visit::Dfs};
use serde::{Deserialize, Serialize};

use crate::BatchError;

use super::{decider::JobExecutionDecider, status::BatchStatus, status::ExitStatus, step::Step};

/// Terminal outcome of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndState {
    Completed,
    Failed,
    /// Stops the job; a restart runs the node that led here again.
    Stopped,
}

impl EndState {
    pub fn batch_status(&self) -> BatchStatus {
        match self {
            EndState::Completed => BatchStatus::Completed,
            EndState::Failed => BatchStatus::Failed,
            EndState::Stopped => BatchStatus::Stopped,
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        match self {
            EndState::Completed => ExitStatus::completed(),
            EndState::Failed => ExitStatus::failed(),
            EndState::Stopped => ExitStatus::stopped(),
        }
    }
}

/// Where a transition rule leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Node(String),
    End(EndState),
    /// Stops the job; a restart resumes at the named node.
    StopAndRestart(String),
}

impl From<&str> for Target {
    fn from(node: &str) -> Self {
        Target::Node(node.to_string())
    }
}

impl From<EndState> for Target {
    fn from(end_state: EndState) -> Self {
        Target::End(end_state)
    }
}

/// `{from, pattern, to}` triple of a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: String,
    pub pattern: String,
    pub to: Target,
}

impl TransitionRule {
    pub fn new(from: &str, pattern: &str, to: impl Into<Target>) -> Self {
        Self {
            from: from.to_string(),
            pattern: pattern.to_string(),
            to: to.into(),
        }
    }

    pub fn is_exact(&self) -> bool {
        !self.pattern.contains(['*', '?'])
    }
}

/// Rule of a built flow, with its wildcard pattern compiled once.
struct CompiledRule {
    rule: TransitionRule,
    pattern: Option<Pattern>,
}

impl CompiledRule {
    fn compile(rule: &TransitionRule) -> Result<Self, BatchError> {
        let pattern = if rule.is_exact() {
            None
        } else {
            let pattern = Pattern::new(&rule.pattern).map_err(|error| {
                malformed(
                    &rule.from,
                    &format!("invalid pattern '{}': {}", rule.pattern, error),
                )
            })?;
            Some(pattern)
        };

        Ok(Self {
            rule: rule.clone(),
            pattern,
        })
    }

    fn matches(&self, exit_code: &str) -> bool {
        match &self.pattern {
            Some(pattern) => pattern.matches(exit_code),
            None => self.rule.pattern == exit_code,
        }
    }
}

/// A node of the flow graph.
#[derive(Clone, Copy)]
pub enum FlowNode<'a> {
    Step(&'a dyn Step),
    Decider(&'a dyn JobExecutionDecider),
}

/// Result of resolving a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next<'f> {
    Node(&'f str),
    End(EndState),
    StopAndRestart(&'f str),
}

/// Validated flow graph.
pub struct Flow<'a> {
    start: String,
    nodes: HashMap<String, FlowNode<'a>>,
    rules: HashMap<String, Vec<CompiledRule>>,
}

impl<'a> Flow<'a> {
    pub fn get_start(&self) -> &str {
        &self.start
    }

    pub fn get_node(&self, name: &str) -> Option<FlowNode<'a>> {
        self.nodes.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Selects what follows `node` once it produced `exit_status`.
    ///
    /// # Errors
    /// `BatchError::UnresolvedTransition` when no rule of `node` matches.
    pub fn resolve_next(&self, node: &str, exit_status: &ExitStatus) -> Result<Next<'_>, BatchError> {
        let code = exit_status.code();
        let rules = self.rules.get(node).map(Vec::as_slice).unwrap_or_default();

        let rule = rules
            .iter()
            .find(|rule| rule.pattern.is_none() && rule.matches(code))
            .or_else(|| rules.iter().find(|rule| rule.pattern.is_some() && rule.matches(code)));

        match rule.map(|compiled| &compiled.rule.to) {
            Some(Target::Node(next)) => Ok(Next::Node(next)),
            Some(Target::End(end_state)) => Ok(Next::End(*end_state)),
            Some(Target::StopAndRestart(restart)) => Ok(Next::StopAndRestart(restart)),
            None => Err(BatchError::UnresolvedTransition {
                node: node.to_string(),
                exit_code: code.to_string(),
            }),
        }
    }
}

/// Declares the nodes and transition rules of a [`Flow`].
#[derive(Default)]
pub struct FlowBuilder<'a> {
    start: Option<String>,
    nodes: Vec<(String, FlowNode<'a>)>,
    rules: Vec<TransitionRule>,
}

impl<'a> FlowBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `step` and makes it the entry node.
    pub fn start(mut self, step: &'a dyn Step) -> Self {
        self.start = Some(step.get_name().to_string());
        self.step(step)
    }

    /// Makes an already registered node, for instance a decider, the entry node.
    pub fn start_at(mut self, name: &str) -> Self {
        self.start = Some(name.to_string());
        self
    }

    pub fn step(mut self, step: &'a dyn Step) -> Self {
        self.nodes
            .push((step.get_name().to_string(), FlowNode::Step(step)));
        self
    }

    pub fn decider(mut self, name: &str, decider: &'a dyn JobExecutionDecider) -> Self {
        self.nodes.push((name.to_string(), FlowNode::Decider(decider)));
        self
    }

    pub fn rule(mut self, from: &str, pattern: &str, to: impl Into<Target>) -> Self {
        self.rules.push(TransitionRule::new(from, pattern, to));
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = TransitionRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Goes from `from` to `to` on COMPLETED, every other exit status fails the job.
    pub fn next(self, from: &str, to: &str) -> Self {
        self.rule(from, ExitStatus::COMPLETED, to)
            .rule(from, "*", EndState::Failed)
    }

    /// Ends the job after `from`: COMPLETED completes it, anything else fails it.
    pub fn end(self, from: &str) -> Self {
        self.rule(from, ExitStatus::COMPLETED, EndState::Completed)
            .rule(from, "*", EndState::Failed)
    }

    /// Stops the job when `from` exits with a code matching `pattern`; the
    /// next run of the same job instance resumes at `restart_at`.
    pub fn stop_and_restart(self, from: &str, pattern: &str, restart_at: &str) -> Self {
        self.rule(
            from,
            pattern,
            Target::StopAndRestart(restart_at.to_string()),
        )
    }

    /// Validates the graph.
    ///
    /// # Errors
    /// `BatchError::MalformedFlow` naming the offending node when the start node
    /// is missing, a node is declared twice, a rule references an unknown node,
    /// a wildcard pattern does not compile, a node has no outgoing rule, a node
    /// cannot be reached from the start, or the graph contains a cycle.
    pub fn build(self) -> Result<Flow<'a>, BatchError> {
        let start = self.start.ok_or_else(|| BatchError::MalformedFlow {
            node: String::new(),
            reason: "flow has no start node".to_string(),
        })?;

        let mut nodes = HashMap::new();
        for (name, node) in self.nodes {
            if nodes.insert(name.clone(), node).is_some() {
                return Err(malformed(&name, "node is declared more than once"));
            }
        }

        if !nodes.contains_key(&start) {
            return Err(malformed(&start, "start node is not declared"));
        }

        let mut graph = DiGraph::<&str, ()>::new();
        let indexes: HashMap<&str, _> = nodes
            .keys()
            .map(|name| (name.as_str(), graph.add_node(name.as_str())))
            .collect();

        let mut rules: HashMap<String, Vec<CompiledRule>> = HashMap::new();
        for rule in &self.rules {
            let from = indexes
                .get(rule.from.as_str())
                .ok_or_else(|| malformed(&rule.from, "rule starts from an unknown node"))?;
            if rule.pattern.is_empty() {
                return Err(malformed(&rule.from, "rule has an empty pattern"));
            }
            if let Target::Node(to) | Target::StopAndRestart(to) = &rule.to {
                let to = indexes.get(to.as_str()).ok_or_else(|| {
                    malformed(&rule.from, &format!("rule leads to unknown node '{}'", to))
                })?;
                graph.update_edge(*from, *to, ());
            }
            rules
                .entry(rule.from.clone())
                .or_default()
                .push(CompiledRule::compile(rule)?);
        }

        let mut names: Vec<&str> = nodes.keys().map(String::as_str).collect();
        names.sort_unstable();

        if let Some(name) = names.iter().find(|name| !rules.contains_key(**name)) {
            return Err(malformed(name, "node has no transition rule"));
        }

        let mut reachable = HashSet::new();
        let mut dfs = Dfs::new(&graph, indexes[start.as_str()]);
        while let Some(index) = dfs.next(&graph) {
            reachable.insert(graph[index]);
        }
        if let Some(name) = names.iter().find(|name| !reachable.contains(**name)) {
            return Err(malformed(
                name,
                &format!("node is not reachable from start node '{}'", start),
            ));
        }

        if let Err(cycle) = toposort(&graph, None) {
            return Err(malformed(graph[cycle.node_id()], "node is part of a cycle"));
        }

        Ok(Flow {
            start,
            nodes,
            rules,
        })
    }
}

fn malformed(node: &str, reason: &str) -> BatchError {
    BatchError::MalformedFlow {
        node: node.to_string(),
        reason: reason.to_string(),
    }
}
