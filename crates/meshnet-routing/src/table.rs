//! Link-state database and route computation.
//!
//! The graph is directed: the local node's edges come from `neighbors`,
//! every other node's edges come from the last LSA it sent. All maps are
//! ordered, so every algorithm visits nodes in ascending id order and the
//! resulting table is reproducible.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use meshnet_protocol::{Cost, LinkStateAdvertisement, NodeId};
use serde::{Deserialize, Serialize};

use crate::algorithm::Algorithm;

/// One forwarding-table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub destination: NodeId,
    /// Direct neighbor to send through.
    pub next_hop: NodeId,
    /// Accumulated path cost.
    pub cost: Cost,
    /// Path length in links.
    pub hops: u32,
}

/// Forwarding table keyed by destination.
pub type RoutingTable = BTreeMap<NodeId, Route>;

/// Shortest-path search result: distance and predecessor per reached node.
struct Paths<'a> {
    dist: BTreeMap<&'a str, Cost>,
    prev: BTreeMap<&'a str, &'a str>,
}

/// Neighbor costs plus received link-state advertisements.
#[derive(Debug, Clone)]
pub struct LinkStateDb {
    node_id: NodeId,
    neighbors: BTreeMap<NodeId, Cost>,
    link_state: BTreeMap<NodeId, LinkStateAdvertisement>,
}

impl LinkStateDb {
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            neighbors: BTreeMap::new(),
            link_state: BTreeMap::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Direct neighbor costs. These are the local node's own links.
    pub fn neighbors(&self) -> &BTreeMap<NodeId, Cost> {
        &self.neighbors
    }

    /// Advertisements received from other nodes.
    pub fn link_state(&self) -> &BTreeMap<NodeId, LinkStateAdvertisement> {
        &self.link_state
    }

    /// Set the cost to a direct neighbor. Returns false for the local id.
    pub fn update_neighbor(&mut self, neighbor: impl Into<NodeId>, cost: Cost) -> bool {
        let neighbor = neighbor.into();
        if neighbor == self.node_id {
            return false;
        }
        self.neighbors.insert(neighbor, cost);
        true
    }

    /// Forget a direct neighbor and the LSA it sent. Absent ids are a no-op.
    ///
    /// Returns whether anything was removed.
    pub fn remove_neighbor(&mut self, neighbor: &str) -> bool {
        let had_neighbor = self.neighbors.remove(neighbor).is_some();
        let had_lsa = self.link_state.remove(neighbor).is_some();
        had_neighbor || had_lsa
    }

    /// Store the latest LSA from `origin`, replacing any earlier one.
    ///
    /// The local node's links are owned by `neighbors`, so an LSA claiming to
    /// come from the local id is refused and false is returned.
    pub fn update_link_state(&mut self, origin: impl Into<NodeId>, lsa: LinkStateAdvertisement) -> bool {
        let origin = origin.into();
        if origin == self.node_id {
            return false;
        }
        self.link_state.insert(origin, lsa);
        true
    }

    pub fn clear(&mut self) {
        self.neighbors.clear();
        self.link_state.clear();
    }

    /// Build a fresh forwarding table.
    pub fn compute(&self, algorithm: Algorithm) -> RoutingTable {
        match algorithm {
            Algorithm::Dijkstra => self.build_table(self.dijkstra()),
            Algorithm::BellmanFord => self.build_table(self.bellman_ford()),
            Algorithm::DistanceVector => self.distance_vector(),
        }
    }

    fn edges_from(&self, node: &str) -> Option<&BTreeMap<NodeId, Cost>> {
        if node == self.node_id {
            Some(&self.neighbors)
        } else {
            self.link_state.get(node)
        }
    }

    /// Every node id the graph mentions, including the local node.
    fn all_nodes(&self) -> BTreeSet<&str> {
        let mut nodes = BTreeSet::new();
        nodes.insert(self.node_id.as_str());
        nodes.extend(self.neighbors.keys().map(String::as_str));
        for (origin, lsa) in &self.link_state {
            nodes.insert(origin.as_str());
            nodes.extend(lsa.keys().map(String::as_str));
        }
        nodes
    }

    /// Equal costs resolve to the node popped first, i.e. the smaller id.
    fn dijkstra(&self) -> Paths<'_> {
        let mut dist: BTreeMap<&str, Cost> = BTreeMap::new();
        let mut prev: BTreeMap<&str, &str> = BTreeMap::new();
        let mut settled: BTreeSet<&str> = BTreeSet::new();
        let mut frontier: BinaryHeap<Reverse<(Cost, &str)>> = BinaryHeap::new();

        dist.insert(self.node_id.as_str(), 0);
        frontier.push(Reverse((0, self.node_id.as_str())));

        while let Some(Reverse((d, node))) = frontier.pop() {
            if !settled.insert(node) {
                continue;
            }
            let Some(edges) = self.edges_from(node) else {
                continue;
            };
            for (next, &cost) in edges {
                let next = next.as_str();
                if settled.contains(next) {
                    continue;
                }
                let alt = d.saturating_add(cost);
                if dist.get(next).map_or(true, |&cur| alt < cur) {
                    dist.insert(next, alt);
                    prev.insert(next, node);
                    frontier.push(Reverse((alt, next)));
                }
            }
        }

        Paths { dist, prev }
    }

    /// Relaxes the local node's edges first, then each originator in id
    /// order, and stops early once a pass changes nothing.
    fn bellman_ford(&self) -> Paths<'_> {
        let mut dist: BTreeMap<&str, Cost> = BTreeMap::new();
        let mut prev: BTreeMap<&str, &str> = BTreeMap::new();
        dist.insert(self.node_id.as_str(), 0);

        let origins: Vec<&str> = std::iter::once(self.node_id.as_str())
            .chain(self.link_state.keys().map(String::as_str))
            .collect();
        let passes = self.all_nodes().len().saturating_sub(1);

        for _ in 0..passes {
            let mut updated = false;
            for &origin in &origins {
                let Some(&base) = dist.get(origin) else {
                    continue;
                };
                let Some(edges) = self.edges_from(origin) else {
                    continue;
                };
                for (next, &cost) in edges {
                    let next = next.as_str();
                    let alt = base.saturating_add(cost);
                    if dist.get(next).map_or(true, |&cur| alt < cur) {
                        dist.insert(next, alt);
                        prev.insert(next, origin);
                        updated = true;
                    }
                }
            }
            if !updated {
                break;
            }
        }

        Paths { dist, prev }
    }

    fn distance_vector(&self) -> RoutingTable {
        self.neighbors
            .iter()
            .map(|(neighbor, &cost)| {
                let route = Route {
                    destination: neighbor.clone(),
                    next_hop: neighbor.clone(),
                    cost,
                    hops: 1,
                };
                (neighbor.clone(), route)
            })
            .collect()
    }

    /// Walk each predecessor chain back to the local node to find the first
    /// hop and the path length.
    fn build_table(&self, paths: Paths<'_>) -> RoutingTable {
        let me = self.node_id.as_str();
        let limit = paths.dist.len();
        let mut table = RoutingTable::new();

        for (&destination, &cost) in &paths.dist {
            if destination == me {
                continue;
            }
            let mut current = destination;
            let mut hops = 0u32;
            let mut reached = false;
            while let Some(&parent) = paths.prev.get(current) {
                hops += 1;
                if parent == me {
                    reached = true;
                    break;
                }
                if hops as usize > limit {
                    break;
                }
                current = parent;
            }
            if !reached {
                continue;
            }
            table.insert(
                destination.to_string(),
                Route {
                    destination: destination.to_string(),
                    next_hop: current.to_string(),
                    cost,
                    hops,
                },
            );
        }

        table
    }
}
