//! Bounded BFS traversal, reachability, and shortest path (spec §4.3).

use std::collections::{HashMap, VecDeque};

use reconkg_graph::{Db, EdgeRepository, NodeRepository};
use reconkg_types::{Edge, EdgeKind, Node};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{QueryError, Result};

pub const DEFAULT_MAX_DEPTH: u32 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct TraverseHit {
    pub node: Node,
    pub depth: u32,
    pub path: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShortestPath {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub length: usize,
}

/// Breadth-first from `start_id` over outgoing edges, optionally restricted
/// to `edge_kinds`. Each node is emitted once, at its minimum depth; the
/// start node itself is never emitted. Cycles are avoided by never
/// re-expanding a node once discovered — since a node's outgoing edges do
/// not depend on the path taken to reach it, the first (shallowest)
/// discovery already accounts for everything it could expose.
pub async fn traverse(
    db: &Db,
    start_id: Uuid,
    max_depth: u32,
    edge_kinds: Option<&[EdgeKind]>,
) -> Result<Vec<TraverseHit>> {
    let nodes = NodeRepository::new(db);
    let edges = EdgeRepository::new(db);

    if nodes.find_by_id(start_id).await?.is_none() {
        return Err(QueryError::NotFound(start_id.to_string()));
    }

    let mut visited: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    let mut queue: VecDeque<(Uuid, Vec<Uuid>, u32)> = VecDeque::new();
    queue.push_back((start_id, vec![start_id], 0));

    let mut hits = Vec::new();

    while let Some((current_id, path, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let outgoing = edges.find_by_source(current_id, None).await?;
        for edge in outgoing {
            if let Some(kinds) = edge_kinds {
                if !kinds.contains(&edge.kind) {
                    continue;
                }
            }
            let target = edge.target_id;
            if path.contains(&target) || visited.contains_key(&target) {
                continue;
            }
            let mut new_path = path.clone();
            new_path.push(target);
            let new_depth = depth + 1;
            visited.insert(target, new_path.clone());

            let node = nodes
                .find_by_id(target)
                .await?
                .ok_or_else(|| QueryError::NotFound(target.to_string()))?;
            hits.push(TraverseHit { node, depth: new_depth, path: new_path.clone() });
            queue.push_back((target, new_path, new_depth));
        }
    }

    hits.sort_by_key(|h| h.depth);
    Ok(hits)
}

pub async fn reachable_from(
    db: &Db,
    start_id: Uuid,
    target_kind: Option<reconkg_types::NodeKind>,
) -> Result<Vec<Node>> {
    let hits = traverse(db, start_id, u32::MAX, None).await?;
    Ok(hits
        .into_iter()
        .map(|h| h.node)
        .filter(|n| target_kind.map_or(true, |k| n.kind == k))
        .collect())
}

pub async fn shortest_path(db: &Db, source_id: Uuid, target_id: Uuid) -> Result<Option<ShortestPath>> {
    let nodes = NodeRepository::new(db);
    let edges = EdgeRepository::new(db);

    let source = nodes
        .find_by_id(source_id)
        .await?
        .ok_or_else(|| QueryError::NotFound(source_id.to_string()))?;

    if source_id == target_id {
        return Ok(Some(ShortestPath { nodes: vec![source], edges: vec![], length: 0 }));
    }

    // predecessor[node] = (via_edge_id, from_node)
    let mut predecessor: HashMap<Uuid, (Uuid, Uuid)> = HashMap::new();
    let mut visited: std::collections::HashSet<Uuid> = std::collections::HashSet::new();
    visited.insert(source_id);
    let mut queue: VecDeque<Uuid> = VecDeque::new();
    queue.push_back(source_id);

    let mut found = false;
    while let Some(current) = queue.pop_front() {
        let outgoing = edges.find_by_source(current, None).await?;
        for edge in outgoing {
            if visited.contains(&edge.target_id) {
                continue;
            }
            visited.insert(edge.target_id);
            predecessor.insert(edge.target_id, (edge.id, current));
            if edge.target_id == target_id {
                found = true;
                break;
            }
            queue.push_back(edge.target_id);
        }
        if found {
            break;
        }
    }

    if !found {
        return Ok(None);
    }

    let mut node_chain = vec![target_id];
    let mut edge_id_chain = vec![];
    let mut cursor = target_id;
    while let Some(&(edge_id, from)) = predecessor.get(&cursor) {
        edge_id_chain.push(edge_id);
        node_chain.push(from);
        cursor = from;
        if from == source_id {
            break;
        }
    }
    node_chain.reverse();
    edge_id_chain.reverse();

    let mut resolved_nodes = Vec::with_capacity(node_chain.len());
    for id in node_chain {
        let node = nodes
            .find_by_id(id)
            .await?
            .ok_or_else(|| QueryError::NotFound(id.to_string()))?;
        resolved_nodes.push(node);
    }

    let mut resolved_edges = Vec::with_capacity(edge_id_chain.len());
    for id in &edge_id_chain {
        let edge = edges
            .find_by_id(*id)
            .await?
            .ok_or_else(|| QueryError::NotFound(id.to_string()))?;
        resolved_edges.push(edge);
    }

    Ok(Some(ShortestPath {
        length: resolved_edges.len(),
        nodes: resolved_nodes,
        edges: resolved_edges,
    }))
}
