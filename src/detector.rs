use std::collections::{HashMap, HashSet};

use crate::table::LockTable;
use crate::wait_queue::WaitQueues;

/// Directed wait-for edges: owner -> owners it is blocked on.
pub type WaitForGraph = HashMap<String, HashSet<String>>;

/// Rebuild the wait-for graph from scratch. Owner X has an edge to owner Y
/// iff X has a queued request on a resource Y currently holds. The graph is
/// never maintained incrementally; stale edges cannot survive a rebuild.
pub fn build_graph(table: &LockTable, queues: &WaitQueues) -> WaitForGraph {
    let mut graph = WaitForGraph::new();
    for waiter in queues.waiters() {
        if let Some(lock) = table.holder(&waiter.resource) {
            if lock.owner != waiter.owner {
                graph
                    .entry(waiter.owner.clone())
                    .or_default()
                    .insert(lock.owner.clone());
            }
        }
    }
    graph
}

fn neighbors<'a>(graph: &'a WaitForGraph, node: &str) -> Vec<&'a str> {
    graph
        .get(node)
        .map(|set| set.iter().map(String::as_str).collect())
        .unwrap_or_default()
}

/// Depth-first search from `start` for a path leading back to `start`.
/// Used by the eager check at acquisition time, on a graph augmented with the
/// hypothetical edge for the request under consideration.
pub fn cycle_through(graph: &WaitForGraph, start: &str) -> Option<Vec<String>> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut path: Vec<&str> = vec![start];
    let mut stack: Vec<(Vec<&str>, usize)> = vec![(neighbors(graph, start), 0)];
    visited.insert(start);

    while !stack.is_empty() {
        let next = {
            let frame = stack.last_mut().unwrap();
            if frame.1 < frame.0.len() {
                frame.1 += 1;
                Some(frame.0[frame.1 - 1])
            } else {
                None
            }
        };
        match next {
            Some(next) if next == start => {
                return Some(path.iter().map(|node| node.to_string()).collect());
            }
            Some(next) => {
                if visited.insert(next) {
                    path.push(next);
                    stack.push((neighbors(graph, next), 0));
                }
            }
            None => {
                path.pop();
                stack.pop();
            }
        }
    }
    None
}

/// Gray-node cycle search over the whole graph: visited set plus an on-path
/// set, explicit stack. Returns the first cycle found, as the ordered list of
/// owners on it.
pub fn find_cycle(graph: &WaitForGraph) -> Option<Vec<String>> {
    let mut visited: HashSet<&str> = HashSet::new();
    for root in graph.keys() {
        if visited.contains(root.as_str()) {
            continue;
        }
        visited.insert(root.as_str());
        let mut on_path: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = vec![root.as_str()];
        let mut stack: Vec<(Vec<&str>, usize)> = vec![(neighbors(graph, root), 0)];
        on_path.insert(root.as_str());

        while !stack.is_empty() {
            let next = {
                let frame = stack.last_mut().unwrap();
                if frame.1 < frame.0.len() {
                    frame.1 += 1;
                    Some(frame.0[frame.1 - 1])
                } else {
                    None
                }
            };
            match next {
                Some(next) => {
                    if on_path.contains(next) {
                        let pos = path.iter().position(|&node| node == next).unwrap();
                        return Some(path[pos..].iter().map(|node| node.to_string()).collect());
                    }
                    if visited.insert(next) {
                        on_path.insert(next);
                        path.push(next);
                        stack.push((neighbors(graph, next), 0));
                    }
                }
                None => {
                    if let Some(done) = path.pop() {
                        on_path.remove(done);
                    }
                    stack.pop();
                }
            }
        }
    }
    None
}
