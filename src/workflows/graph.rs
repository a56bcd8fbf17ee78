// Workflow Graph - compiles the builder's node/edge graph into executable nodes

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::{ActionNode, ActionType, BranchNode, Condition, TriggerNode, WorkflowDefinition};

/// Node name used by the builder for trigger nodes.
const TRIGGER_NODE: &str = "trigger";
/// Node name used by the builder for condition nodes.
const CONDITION_NODE: &str = "condition";
/// The socket carrying the "yes" path out of a condition node.
const YES_SOCKET: &str = "output_1";

/// Graph as exported by the workflow builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphInput {
    pub nodes: HashMap<String, GraphNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Node kind: "trigger", "condition", or an action type tag.
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub outputs: HashMap<String, GraphOutput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphOutput {
    #[serde(default)]
    pub connections: Vec<GraphConnection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConnection {
    pub node: String,
}

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("graph has no trigger node")]
    MissingTrigger,
    #[error("edge references unknown node '{0}'")]
    UnknownNode(String),
    #[error("unknown action type '{0}'")]
    UnknownActionType(String),
    #[error("condition node '{0}' has an invalid condition: {1}")]
    InvalidCondition(String, String),
}

/// Output of one compiler run. Replaces a workflow's node collections
/// wholesale; there is no incremental update.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub trigger: TriggerNode,
    pub branches: Vec<BranchNode>,
    pub actions: Vec<ActionNode>,
}

impl CompiledWorkflow {
    /// Replace the workflow's materialized nodes with this compilation.
    pub fn apply_to(self, workflow: &mut WorkflowDefinition) {
        workflow.trigger = Some(self.trigger);
        workflow.branches = self.branches;
        workflow.actions = self.actions;
        workflow.updated_at = Some(chrono::Utc::now());
    }
}

/// Breadth-first walk seeded at the trigger node. Condition nodes open a
/// new branch scope on each outgoing socket with the order counter reset
/// to 0; action nodes pass their scope on with order + 1. A visited set
/// truncates cycles and diamond merges at the second visit.
pub fn compile(graph: &GraphInput) -> Result<CompiledWorkflow, CompileError> {
    let mut trigger: Option<TriggerNode> = None;
    let mut branches = Vec::new();
    let mut actions = Vec::new();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<(&str, Option<Uuid>, Option<bool>, i32)> = VecDeque::new();

    for (id, node) in &graph.nodes {
        if node.name == TRIGGER_NODE {
            queue.push_back((id.as_str(), None, None, 0));
        }
    }
    if queue.is_empty() {
        return Err(CompileError::MissingTrigger);
    }

    while let Some((id, parent_branch, branch_value, order)) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        let node = graph
            .nodes
            .get(id)
            .ok_or_else(|| CompileError::UnknownNode(id.to_string()))?;

        match node.name.as_str() {
            TRIGGER_NODE => {
                let event_name = node
                    .data
                    .get("event")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let conditions = node
                    .data
                    .get("conditions")
                    .map(Condition::normalize)
                    .unwrap_or_default();

                trigger.get_or_insert(TriggerNode {
                    id: Uuid::new_v4(),
                    event_name,
                    conditions,
                });

                for target in all_successors(node) {
                    ensure_known(graph, target)?;
                    queue.push_back((target, None, None, 0));
                }
            }
            CONDITION_NODE => {
                let condition: Condition = serde_json::from_value(node.data.clone())
                    .map_err(|e| CompileError::InvalidCondition(id.to_string(), e.to_string()))?;

                let branch_id = Uuid::new_v4();
                branches.push(BranchNode {
                    id: branch_id,
                    condition,
                    parent_branch,
                    parent_branch_value: branch_value,
                    order,
                });

                for (socket, output) in &node.outputs {
                    let value = socket == YES_SOCKET;
                    for connection in &output.connections {
                        ensure_known(graph, connection.node.as_str())?;
                        queue.push_back((connection.node.as_str(), Some(branch_id), Some(value), 0));
                    }
                }
            }
            action_name => {
                let action_type = ActionType::from_str(action_name)
                    .map_err(|_| CompileError::UnknownActionType(action_name.to_string()))?;

                actions.push(ActionNode {
                    id: Uuid::new_v4(),
                    name: node
                        .data
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or(action_name)
                        .to_string(),
                    action_type,
                    config: node.data.clone(),
                    order,
                    branch: parent_branch,
                    branch_value,
                });

                for target in all_successors(node) {
                    ensure_known(graph, target)?;
                    queue.push_back((target, parent_branch, branch_value, order + 1));
                }
            }
        }
    }

    Ok(CompiledWorkflow {
        trigger: trigger.ok_or(CompileError::MissingTrigger)?,
        branches,
        actions,
    })
}

fn all_successors(node: &GraphNode) -> impl Iterator<Item = &str> {
    node.outputs
        .values()
        .flat_map(|output| output.connections.iter().map(|c| c.node.as_str()))
}

fn ensure_known<'a>(graph: &GraphInput, id: &'a str) -> Result<&'a str, CompileError> {
    if graph.nodes.contains_key(id) {
        Ok(id)
    } else {
        Err(CompileError::UnknownNode(id.to_string()))
    }
}
