//! Build-time graph validation
//!
//! Checks structure before any execution begins: unique node names, edges
//! only between nodes of the same graph, no edges into start or out of
//! finish, every node reachable from start, finish reachable, and no
//! reachable node without a way out.

use std::collections::{HashSet, VecDeque};

use super::{FINISH, FINISH_NODE, START, START_NODE};

/// Validation error with location context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphValidationError {
    /// Two nodes share a name, or a node uses a reserved marker name
    DuplicateNodeName { node: String },
    /// An edge references a node that belongs to another graph
    ForeignNode { node: String },
    /// A non-start node cannot be reached from start
    UnreachableNode { node: String },
    /// No path leads from start to finish
    FinishUnreachable,
    /// An edge targets the start marker
    EdgeIntoStart { from: String },
    /// An edge leaves the finish marker
    EdgeFromFinish { to: String },
    /// A parallel node declares fewer than two branches
    TooFewBranches { node: String, count: usize },
    /// A reachable node has no outgoing edge, so routing from it always fails
    NoOutgoingEdges { node: String },
}

impl std::fmt::Display for GraphValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateNodeName { node } => write!(f, "Node name '{}' is used more than once", node),
            Self::ForeignNode { node } => {
                write!(f, "Node '{}' belongs to a different graph", node)
            }
            Self::UnreachableNode { node } => {
                write!(f, "Node '{}' is not reachable from start", node)
            }
            Self::FinishUnreachable => write!(f, "Finish is not reachable from start"),
            Self::EdgeIntoStart { from } => {
                write!(f, "Edge from '{}' targets the start node", from)
            }
            Self::EdgeFromFinish { to } => {
                write!(f, "Edge to '{}' leaves the finish node", to)
            }
            Self::TooFewBranches { node, count } => {
                write!(
                    f,
                    "Parallel node '{}' needs at least 2 branches, has {}",
                    node, count
                )
            }
            Self::NoOutgoingEdges { node } => {
                write!(f, "Node '{}' has no outgoing edges", node)
            }
        }
    }
}

impl std::error::Error for GraphValidationError {}

/// Validate an arena of node names and `(from, to)` edge pairs
///
/// Index [`START`] is the start marker and [`FINISH`] the finish marker.
/// Returns all errors found (not just the first).
pub(crate) fn validate_structure(names: &[String], edges: &[(usize, usize)]) -> Vec<GraphValidationError> {
    let mut errors = Vec::new();

    check_names(names, &mut errors);
    check_markers(names, edges, &mut errors);
    check_reachability(names, edges, &mut errors);

    errors
}

fn check_names(names: &[String], errors: &mut Vec<GraphValidationError>) {
    let mut seen = HashSet::new();
    for (index, name) in names.iter().enumerate() {
        let reserved = index > FINISH && (name == START_NODE || name == FINISH_NODE);
        if !seen.insert(name.as_str()) || reserved {
            errors.push(GraphValidationError::DuplicateNodeName { node: name.clone() });
        }
    }
}

fn check_markers(names: &[String], edges: &[(usize, usize)], errors: &mut Vec<GraphValidationError>) {
    for &(from, to) in edges {
        if to == START {
            errors.push(GraphValidationError::EdgeIntoStart {
                from: names[from].clone(),
            });
        }
        if from == FINISH {
            errors.push(GraphValidationError::EdgeFromFinish {
                to: names[to].clone(),
            });
        }
    }
}

/// Breadth-first search from start
fn check_reachability(names: &[String], edges: &[(usize, usize)], errors: &mut Vec<GraphValidationError>) {
    let mut reachable = vec![false; names.len()];
    let mut queue = VecDeque::from([START]);
    reachable[START] = true;

    while let Some(node) = queue.pop_front() {
        for &(from, to) in edges {
            if from == node && !reachable[to] {
                reachable[to] = true;
                queue.push_back(to);
            }
        }
    }

    if !reachable[FINISH] {
        errors.push(GraphValidationError::FinishUnreachable);
    }

    for (index, name) in names.iter().enumerate().skip(FINISH + 1) {
        if !reachable[index] {
            errors.push(GraphValidationError::UnreachableNode { node: name.clone() });
        }
    }

    for (index, name) in names.iter().enumerate() {
        if index == FINISH || !reachable[index] {
            continue;
        }
        if !edges.iter().any(|&(from, _)| from == index) {
            errors.push(GraphValidationError::NoOutgoingEdges { node: name.clone() });
        }
    }
}
