//! The node registry: every replicated node of a session, keyed by id.
//!
//! The registry owns its nodes. Nodes refer to each other only by
//! [`NodeId`], so all graph traversal goes through the registry.

use crate::node::ReplicatedNode;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, trace};
use trellis_core::{NodeId, ObjectRef, ReplicationError, Result};

/// Map of all replicated nodes with dependency traversal.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    /// Ordered by id so traversal is deterministic.
    nodes: BTreeMap<NodeId, ReplicatedNode>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    /// Store a node, returning the one it replaced.
    pub fn insert(&mut self, node: ReplicatedNode) -> Option<ReplicatedNode> {
        self.nodes.insert(node.id(), node)
    }

    pub fn get(&self, id: &NodeId) -> Option<&ReplicatedNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut ReplicatedNode> {
        self.nodes.get_mut(id)
    }

    /// Like [`get`](Self::get) but fails with `NotRegistered`.
    pub fn try_get(&self, id: &NodeId) -> Result<&ReplicatedNode> {
        self.nodes.get(id).ok_or(ReplicationError::NotRegistered(*id))
    }

    pub fn try_get_mut(&mut self, id: &NodeId) -> Result<&mut ReplicatedNode> {
        self.nodes
            .get_mut(id)
            .ok_or(ReplicationError::NotRegistered(*id))
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Find the node wrapping `object` (linear scan on instance identity).
    pub fn get_by_reference(&self, object: &ObjectRef) -> Option<&ReplicatedNode> {
        self.nodes.values().find(|node| {
            node.instance()
                .map(|instance| instance.same_object(object))
                .unwrap_or(false)
        })
    }

    /// All node ids, optionally restricted to one `str_type`.
    pub fn list(&self, filter_type: Option<&str>) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| filter_type.map_or(true, |t| node.str_type() == t))
            .map(|node| node.id())
            .collect()
    }

    /// Remove a single node.
    ///
    /// Edges pointing at the removed node are dropped from the remaining
    /// nodes. Dependents themselves are left in place.
    pub fn remove(&mut self, id: &NodeId) -> Option<ReplicatedNode> {
        let removed = self.nodes.remove(id)?;
        for node in self.nodes.values_mut() {
            node.drop_dependency(id);
        }
        trace!(node = %id, str_type = removed.str_type(), "removed node");
        Some(removed)
    }

    /// Transitive dependencies of `id`, dependencies before dependents.
    ///
    /// The node itself is not included. Edges to ids that are not (yet)
    /// registered are skipped. Fails with `CyclicDependency` when the walk
    /// reaches a node already on the current path.
    pub fn dependencies_ordered(&self, id: &NodeId) -> Result<Vec<NodeId>> {
        if !self.nodes.contains_key(id) {
            return Err(ReplicationError::NotRegistered(*id));
        }

        let mut walk = Walk::default();
        self.visit(*id, &mut walk)?;
        walk.order.pop();
        Ok(walk.order)
    }

    /// Every node in an order where dependencies come before dependents.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut walk = Walk::default();
        for id in self.nodes.keys() {
            self.visit(*id, &mut walk)?;
        }
        Ok(walk.order)
    }

    fn visit(&self, id: NodeId, walk: &mut Walk) -> Result<()> {
        if walk.done.contains(&id) {
            return Ok(());
        }
        let Some(node) = self.nodes.get(&id) else {
            return Ok(());
        };
        if !walk.on_path.insert(id) {
            debug!(node = %id, "dependency cycle");
            return Err(ReplicationError::CyclicDependency(id));
        }

        for dependency in node.dependencies() {
            self.visit(*dependency, walk)?;
        }

        walk.on_path.remove(&id);
        walk.done.insert(id);
        walk.order.push(id);
        Ok(())
    }

    /// Nodes that list `id` as a direct dependency.
    pub fn dependents(&self, id: &NodeId) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| node.dependencies().contains(id))
            .map(|node| node.id())
            .collect()
    }

    /// Ids referenced as dependencies but absent from the registry.
    pub fn missing_dependencies(&self) -> BTreeSet<NodeId> {
        self.nodes
            .values()
            .flat_map(|node| node.dependencies().iter().copied())
            .filter(|dep| !self.nodes.contains_key(dep))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplicatedNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// DFS bookkeeping.
#[derive(Default)]
struct Walk {
    on_path: HashSet<NodeId>,
    done: HashSet<NodeId>,
    order: Vec<NodeId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestObject;
    use serde_json::json;
    use trellis_core::{Owner, UserId};

    fn add(registry: &mut NodeRegistry, object: &TestObject, deps: &[NodeId]) -> NodeId {
        let mut node = ReplicatedNode::new(
            NodeId::new(),
            Owner::user(UserId::new("alice")),
            Box::new(object.implementation()),
        );
        node.set_dependencies(deps.iter().copied());
        let id = node.id();
        registry.insert(node);
        id
    }

    fn position(order: &[NodeId], id: NodeId) -> usize {
        order.iter().position(|n| *n == id).unwrap()
    }

    #[test]
    fn test_lookup_by_id_and_reference() {
        let mut registry = NodeRegistry::new();
        let mesh = TestObject::new("mesh", json!(1));
        let other = TestObject::new("mesh", json!(1));
        let id = add(&mut registry, &mesh, &[]);

        assert!(registry.contains(&id));
        assert_eq!(registry.get(&id).unwrap().id(), id);
        assert_eq!(
            registry.get_by_reference(&mesh.object_ref()).map(|n| n.id()),
            Some(id)
        );
        assert!(registry.get_by_reference(&other.object_ref()).is_none());
        assert!(matches!(
            registry.try_get(&NodeId::new()),
            Err(ReplicationError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_list_with_filter() {
        let mut registry = NodeRegistry::new();
        let a = add(&mut registry, &TestObject::new("mesh", json!(1)), &[]);
        let b = add(&mut registry, &TestObject::new("material", json!(2)), &[]);
        let c = add(&mut registry, &TestObject::new("mesh", json!(3)), &[]);

        let mut all = vec![a, b, c];
        all.sort();
        let mut meshes = vec![a, c];
        meshes.sort();

        assert_eq!(registry.list(None), all);
        assert_eq!(registry.list(Some("mesh")), meshes);
        assert_eq!(registry.list(Some("material")), vec![b]);
        assert!(registry.list(Some("camera")).is_empty());
    }

    #[test]
    fn test_dependencies_ordered_diamond() {
        // object -> (mesh, material), mesh -> texture, material -> texture
        let mut registry = NodeRegistry::new();
        let texture = add(&mut registry, &TestObject::new("image", json!(0)), &[]);
        let mesh = add(&mut registry, &TestObject::new("mesh", json!(0)), &[texture]);
        let material = add(&mut registry, &TestObject::new("material", json!(0)), &[texture]);
        let object = add(
            &mut registry,
            &TestObject::new("object", json!(0)),
            &[mesh, material],
        );

        let order = registry.dependencies_ordered(&object).unwrap();
        assert_eq!(order.len(), 3);
        assert!(!order.contains(&object));
        assert!(position(&order, texture) < position(&order, mesh));
        assert!(position(&order, texture) < position(&order, material));

        assert!(registry.dependencies_ordered(&texture).unwrap().is_empty());
    }

    #[test]
    fn test_cycle_detection() {
        let mut registry = NodeRegistry::new();
        let a = add(&mut registry, &TestObject::new("a", json!(0)), &[]);
        let b = add(&mut registry, &TestObject::new("b", json!(0)), &[a]);
        registry.get_mut(&a).unwrap().set_dependencies(vec![b]);

        assert!(matches!(
            registry.dependencies_ordered(&a),
            Err(ReplicationError::CyclicDependency(_))
        ));
        assert!(registry.topological_order().is_err());
    }

    #[test]
    fn test_remove_scrubs_edges() {
        let mut registry = NodeRegistry::new();
        let texture = add(&mut registry, &TestObject::new("image", json!(0)), &[]);
        let mesh = add(&mut registry, &TestObject::new("mesh", json!(0)), &[texture]);

        assert_eq!(registry.dependents(&texture), vec![mesh]);
        assert!(registry.remove(&texture).is_some());
        assert!(registry.remove(&texture).is_none());

        assert!(registry.get(&mesh).unwrap().dependencies().is_empty());
        assert!(registry.missing_dependencies().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_dependencies_are_skipped() {
        let mut registry = NodeRegistry::new();
        let ghost = NodeId::new();
        let mesh = add(&mut registry, &TestObject::new("mesh", json!(0)), &[ghost]);

        assert_eq!(
            registry.missing_dependencies().into_iter().collect::<Vec<_>>(),
            vec![ghost]
        );
        assert!(registry.dependencies_ordered(&mesh).unwrap().is_empty());
    }

    #[test]
    fn test_topological_order_covers_all() {
        let mut registry = NodeRegistry::new();
        let a = add(&mut registry, &TestObject::new("a", json!(0)), &[]);
        let b = add(&mut registry, &TestObject::new("b", json!(0)), &[a]);
        let c = add(&mut registry, &TestObject::new("c", json!(0)), &[b]);
        let d = add(&mut registry, &TestObject::new("d", json!(0)), &[]);
        registry.get_mut(&a).unwrap().set_dependencies(vec![d]);

        let order = registry.topological_order().unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, d) < position(&order, a));
        assert!(position(&order, a) < position(&order, b));
        assert!(position(&order, b) < position(&order, c));
    }
}
