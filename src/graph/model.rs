//! The resource graph: nodes keyed by (kind, key), references between them,
//! and per-node runtime state.

use crate::error::{ConfigError, PlanError, Result, VpnError};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::types::{
    NodeFailure, NodeId, NodeState, Properties, ProviderHandle, Reference, ResourceKind,
    ResourceNode,
};

/// A declarative graph of resources.
///
/// Topology is mutable until [`ResourceGraph::finalize`] succeeds. After that
/// only node state, handles and failures change.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: BTreeMap<NodeId, ResourceNode>,
    order: Vec<NodeId>,
    finalized: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl ResourceGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if (kind, key) already exists and
    /// `TopologyFrozen` once the graph is finalized.
    pub fn add_node(
        &mut self,
        kind: ResourceKind,
        key: impl Into<String>,
        name: impl Into<String>,
        properties: Properties,
        references: Vec<Reference>,
    ) -> Result<()> {
        let id = NodeId::new(kind, key);

        if self.finalized {
            return Err(VpnError::Plan(PlanError::TopologyFrozen {
                node: id.to_string(),
            }));
        }

        if self.nodes.contains_key(&id) {
            return Err(VpnError::Config(ConfigError::DuplicateKey {
                kind: kind.to_string(),
                key: id.key,
            }));
        }

        debug!("Adding node {}", id);
        self.order.push(id.clone());
        self.nodes.insert(
            id.clone(),
            ResourceNode {
                id,
                name: name.into(),
                properties,
                references,
                state: NodeState::Pending,
                handle: None,
                failure: None,
            },
        );

        Ok(())
    }

    /// Checks every reference and freezes the topology.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` for a missing or wrong-kind target and
    /// `CyclicDependency` when references form a cycle.
    pub fn finalize(&mut self) -> Result<()> {
        for id in &self.order {
            let node = &self.nodes[id];
            for reference in &node.references {
                if reference.target.kind != reference.role.target_kind() {
                    return Err(VpnError::Config(ConfigError::InvalidReference {
                        from: id.to_string(),
                        target: reference.target.to_string(),
                        reason: format!("must be a {}", reference.role.target_kind()),
                    }));
                }
                if !self.nodes.contains_key(&reference.target) {
                    return Err(VpnError::Config(ConfigError::InvalidReference {
                        from: id.to_string(),
                        target: reference.target.to_string(),
                        reason: String::from("does not exist"),
                    }));
                }
            }
        }

        if let Some(cycle) = self.find_cycle() {
            let path: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            return Err(VpnError::Config(ConfigError::CyclicDependency {
                cycle: path.join(" -> "),
            }));
        }

        self.finalized = true;
        debug!("Graph finalized with {} nodes", self.nodes.len());
        Ok(())
    }

    /// Depth-first search for a reference cycle; returns the closed path.
    fn find_cycle(&self) -> Option<Vec<NodeId>> {
        let mut marks: HashMap<&NodeId, Mark> = HashMap::new();
        let mut stack: Vec<&NodeId> = Vec::new();

        for start in &self.order {
            if marks.contains_key(start) {
                continue;
            }
            if let Some(cycle) = self.visit(start, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }

        None
    }

    fn visit<'a>(
        &'a self,
        id: &'a NodeId,
        marks: &mut HashMap<&'a NodeId, Mark>,
        stack: &mut Vec<&'a NodeId>,
    ) -> Option<Vec<NodeId>> {
        marks.insert(id, Mark::Visiting);
        stack.push(id);

        if let Some(node) = self.nodes.get(id) {
            for reference in &node.references {
                let target = &reference.target;
                match marks.get(target) {
                    Some(Mark::Visiting) => {
                        let start = stack.iter().position(|n| *n == target).unwrap_or(0);
                        let mut cycle: Vec<NodeId> =
                            stack[start..].iter().map(|n| (*n).clone()).collect();
                        cycle.push(target.clone());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        if let Some(cycle) = self.visit(target, marks, stack) {
                            return Some(cycle);
                        }
                    }
                }
            }
        }

        stack.pop();
        marks.insert(id, Mark::Done);
        None
    }

    /// Returns true once topology is frozen.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Returns a node by id.
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// Iterates nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Iterates nodes of one kind in declaration order.
    pub fn nodes_of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceNode> {
        self.nodes().filter(move |n| n.kind() == kind)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the referent's handle if that node is `Created`.
    ///
    /// # Errors
    ///
    /// Returns `UnresolvedReference` otherwise.
    pub fn resolve(&self, reference: &Reference) -> Result<&ProviderHandle> {
        self.nodes
            .get(&reference.target)
            .filter(|n| n.state == NodeState::Created)
            .and_then(|n| n.handle.as_ref())
            .ok_or_else(|| {
                VpnError::Plan(PlanError::UnresolvedReference {
                    reference: reference.target.to_string(),
                })
            })
    }

    /// Returns nodes that are not `Created`, in declaration order.
    #[must_use]
    pub fn unresolved_nodes(&self) -> Vec<String> {
        self.nodes()
            .filter(|n| n.state != NodeState::Created)
            .map(|n| n.id.to_string())
            .collect()
    }

    /// Returns true when every node is `Created`.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.nodes.values().all(|n| n.state == NodeState::Created)
    }

    fn node_mut(&mut self, id: &NodeId) -> Result<&mut ResourceNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| VpnError::internal(format!("Unknown node {id}")))
    }

    /// Moves a node to `Creating` on dispatch.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or failed nodes.
    pub fn mark_creating(&mut self, id: &NodeId) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.state == NodeState::Failed {
            return Err(VpnError::internal(format!("{id} already failed")));
        }
        node.state = NodeState::Creating;
        Ok(())
    }

    /// Moves a node to `Created` and attaches its handle.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown nodes.
    pub fn mark_created(&mut self, id: &NodeId, handle: ProviderHandle) -> Result<()> {
        let node = self.node_mut(id)?;
        node.state = NodeState::Created;
        node.handle = Some(handle);
        node.failure = None;
        Ok(())
    }

    /// Moves a node to `Failed` and records the cause.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown nodes.
    pub fn mark_failed(&mut self, id: &NodeId, failure: NodeFailure) -> Result<()> {
        let node = self.node_mut(id)?;
        node.state = NodeState::Failed;
        node.failure = Some(failure);
        Ok(())
    }

    /// Restores a node as `Created` from a previous run.
    ///
    /// Only pending nodes are restored; the engine still re-verifies them.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown nodes.
    pub fn restore_created(&mut self, id: &NodeId, handle: ProviderHandle) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.state == NodeState::Pending {
            node.state = NodeState::Created;
            node.handle = Some(handle);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::RefRole;

    fn graph_with_chain() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph
            .add_node(ResourceKind::PublicIp, "pip1", "pip-1", Properties::new(), vec![])
            .unwrap();
        graph
            .add_node(
                ResourceKind::GatewayIpConfig,
                "cfg",
                "gw/cfg",
                Properties::new(),
                vec![Reference::new(RefRole::PublicIp, "pip1")],
            )
            .unwrap();
        graph
    }

    #[test]
    fn test_duplicate_key() {
        let mut graph = graph_with_chain();
        let err = graph
            .add_node(ResourceKind::PublicIp, "pip1", "other", Properties::new(), vec![])
            .unwrap_err();
        assert!(matches!(
            err,
            VpnError::Config(ConfigError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_same_key_different_kind_is_allowed() {
        let mut graph = graph_with_chain();
        graph
            .add_node(ResourceKind::Nsg, "pip1", "nsg", Properties::new(), vec![])
            .unwrap();
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_frozen_after_finalize() {
        let mut graph = graph_with_chain();
        graph.finalize().unwrap();
        let err = graph
            .add_node(ResourceKind::Nsg, "late", "nsg", Properties::new(), vec![])
            .unwrap_err();
        assert!(matches!(err, VpnError::Plan(PlanError::TopologyFrozen { .. })));
    }

    #[test]
    fn test_missing_reference_target() {
        let mut graph = ResourceGraph::new();
        graph
            .add_node(
                ResourceKind::GatewayIpConfig,
                "cfg",
                "gw/cfg",
                Properties::new(),
                vec![Reference::new(RefRole::PublicIp, "nope")],
            )
            .unwrap();

        match graph.finalize().unwrap_err() {
            VpnError::Config(ConfigError::InvalidReference { target, reason, .. }) => {
                assert_eq!(target, "public_ip/nope");
                assert_eq!(reason, "does not exist");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!graph.is_finalized());
    }

    #[test]
    fn test_wrong_kind_reference() {
        let mut graph = graph_with_chain();
        graph
            .add_node(
                ResourceKind::VpnGateway,
                "gw",
                "gw",
                Properties::new(),
                vec![Reference {
                    role: RefRole::IpConfiguration,
                    target: NodeId::new(ResourceKind::PublicIp, "pip1"),
                }],
            )
            .unwrap();
        assert!(matches!(
            graph.finalize().unwrap_err(),
            VpnError::Config(ConfigError::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let mut graph = ResourceGraph::new();
        graph
            .add_node(
                ResourceKind::PublicIp,
                "a",
                "a",
                Properties::new(),
                vec![Reference::new(RefRole::IpConfiguration, "b")],
            )
            .unwrap();
        graph
            .add_node(
                ResourceKind::GatewayIpConfig,
                "b",
                "gw/b",
                Properties::new(),
                vec![Reference::new(RefRole::PublicIp, "a")],
            )
            .unwrap();

        match graph.finalize().unwrap_err() {
            VpnError::Config(ConfigError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, "public_ip/a -> gateway_ip_config/b -> public_ip/a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_requires_created() {
        let mut graph = graph_with_chain();
        graph.finalize().unwrap();
        let reference = Reference::new(RefRole::PublicIp, "pip1");

        assert!(matches!(
            graph.resolve(&reference).unwrap_err(),
            VpnError::Plan(PlanError::UnresolvedReference { .. })
        ));

        let id = NodeId::new(ResourceKind::PublicIp, "pip1");
        graph.mark_creating(&id).unwrap();
        assert!(graph.resolve(&reference).is_err());

        graph.mark_created(&id, ProviderHandle::new("/pip-1")).unwrap();
        assert_eq!(graph.resolve(&reference).unwrap().id, "/pip-1");
        assert_eq!(graph.unresolved_nodes(), vec!["gateway_ip_config/cfg"]);
    }

    #[test]
    fn test_restore_only_pending() {
        let mut graph = graph_with_chain();
        graph.finalize().unwrap();
        let id = NodeId::new(ResourceKind::PublicIp, "pip1");
        graph
            .mark_failed(
                &id,
                NodeFailure::new(crate::graph::FailureCause::Permanent, "quota_exceeded", "x"),
            )
            .unwrap();
        graph.restore_created(&id, ProviderHandle::new("/pip-1")).unwrap();
        assert_eq!(graph.get(&id).unwrap().state, NodeState::Failed);
    }
}
