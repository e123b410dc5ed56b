use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;

use crate::error::{RuntimeError, RuntimeResult};

use super::types::*;
use super::validator::validate_graph;

/// Immutable graph definition an agent executes.
#[derive(Debug)]
pub struct Graph {
    pub id: String,
    pub name: String,
    graph: StableDiGraph<Node, Link>,
    node_index_map: NodeIndexMap,
}

impl Graph {
    /// Start building a graph.
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> GraphBuilder {
        GraphBuilder {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        let idx = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*idx)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of links targeting `node_id`. A count above one marks a merge
    /// node.
    pub fn incoming_count(&self, node_id: &str) -> usize {
        match self.node_index_map.get(node_id) {
            Some(idx) => self
                .graph
                .edges_directed(*idx, petgraph::Direction::Incoming)
                .count(),
            None => 0,
        }
    }

    /// Source node ids of every link targeting `node_id`, one entry per
    /// link.
    pub fn parent_ids(&self, node_id: &str) -> Vec<String> {
        match self.node_index_map.get(node_id) {
            Some(idx) => self
                .graph
                .edges_directed(*idx, petgraph::Direction::Incoming)
                .filter_map(|edge| self.graph.node_weight(edge.source()).map(|n| n.id.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Target node ids of every link originating from `node_id`, one entry
    /// per link.
    pub fn child_ids(&self, node_id: &str) -> Vec<String> {
        match self.node_index_map.get(node_id) {
            Some(idx) => self
                .graph
                .edges_directed(*idx, petgraph::Direction::Outgoing)
                .filter_map(|edge| self.graph.node_weight(edge.target()).map(|n| n.id.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// First enabled trigger node whose subtype equals `topic`.
    pub fn find_trigger(&self, topic: &str) -> Option<&Node> {
        self.nodes()
            .find(|n| n.node_type == NodeType::Trigger && n.subtype == topic && n.enabled)
    }

    pub fn has_enabled_trigger(&self, topic: &str) -> bool {
        self.find_trigger(topic).is_some()
    }

    /// Subtypes of enabled trigger nodes that are not lifecycle triggers —
    /// the topics an agent must subscribe to on the broker.
    pub fn trigger_topics(&self) -> Vec<String> {
        self.nodes()
            .filter(|n| {
                n.node_type == NodeType::Trigger
                    && !n.subtype.is_empty()
                    && !trigger::is_lifecycle(&n.subtype)
            })
            .map(|n| n.subtype.clone())
            .collect()
    }
}

/// Builder collecting nodes and links; `build` validates the result.
pub struct GraphBuilder {
    id: String,
    name: String,
    nodes: Vec<Node>,
    links: Vec<Link>,
}

impl GraphBuilder {
    pub fn add_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn add_link(mut self, source: &str, target: &str) -> Self {
        self.links.push(Link::new(source, target));
        self
    }

    /// Validate and assemble the graph. Fails on duplicate node ids, links
    /// referencing unknown nodes, and cycles.
    pub fn build(self) -> RuntimeResult<Graph> {
        let mut graph = StableDiGraph::new();
        let mut node_index_map = NodeIndexMap::new();

        for node in self.nodes {
            if node_index_map.contains_key(&node.id) {
                return Err(RuntimeError::GraphValidationError(format!(
                    "Duplicate node id: {}",
                    node.id
                )));
            }
            let id = node.id.clone();
            let idx = graph.add_node(node);
            node_index_map.insert(id, idx);
        }

        for link in self.links {
            let source = *node_index_map.get(&link.source).ok_or_else(|| {
                RuntimeError::GraphValidationError(format!(
                    "Link source references unknown node: {}",
                    link.source
                ))
            })?;
            let target = *node_index_map.get(&link.target).ok_or_else(|| {
                RuntimeError::GraphValidationError(format!(
                    "Link target references unknown node: {}",
                    link.target
                ))
            })?;
            graph.add_edge(source, target, link);
        }

        validate_graph(&graph, &self.id)?;

        Ok(Graph {
            id: self.id,
            name: self.name,
            graph,
            node_index_map,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_diamond() {
        let graph = Graph::builder("wf", "diamond")
            .add_node(Node::trigger("init", "Init", trigger::INIT))
            .add_node(Node::new("a", "A", NodeType::Action))
            .add_node(Node::new("b", "B", NodeType::Action))
            .add_node(Node::new("d", "D", NodeType::Action))
            .add_link("init", "a")
            .add_link("init", "b")
            .add_link("a", "d")
            .add_link("b", "d")
            .build()
            .unwrap();

        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.link_count(), 4);
        assert_eq!(graph.incoming_count("d"), 2);
        let mut parents = graph.parent_ids("d");
        parents.sort();
        assert_eq!(parents, vec!["a", "b"]);
        let mut children = graph.child_ids("init");
        children.sort();
        assert_eq!(children, vec!["a", "b"]);
    }

    #[test]
    fn test_link_to_unknown_node_rejected() {
        let err = Graph::builder("wf", "bad")
            .add_node(Node::trigger("init", "Init", trigger::INIT))
            .add_link("init", "ghost")
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::GraphValidationError(_)));
    }

    #[test]
    fn test_duplicate_node_id_rejected() {
        let err = Graph::builder("wf", "bad")
            .add_node(Node::new("a", "A", NodeType::Action))
            .add_node(Node::new("a", "A again", NodeType::Action))
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::GraphValidationError(_)));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = Graph::builder("wf", "cyclic")
            .add_node(Node::new("a", "A", NodeType::Action))
            .add_node(Node::new("b", "B", NodeType::Action))
            .add_link("a", "b")
            .add_link("b", "a")
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::CycleDetected(_)));
    }

    #[test]
    fn test_single_node_graph_is_valid() {
        let graph = Graph::builder("wf", "lone")
            .add_node(Node::trigger("init", "Init", trigger::INIT))
            .build()
            .unwrap();
        assert_eq!(graph.node_count(), 1);
        assert!(graph.has_enabled_trigger(trigger::INIT));
    }

    #[test]
    fn test_find_trigger_skips_disabled() {
        let graph = Graph::builder("wf", "g")
            .add_node(Node::trigger("t1", "T1", "/topic/a").disabled())
            .add_node(Node::trigger("t2", "T2", "/topic/a"))
            .build()
            .unwrap();
        assert_eq!(graph.find_trigger("/topic/a").unwrap().id, "t2");
    }

    #[test]
    fn test_trigger_topics_excludes_lifecycle() {
        let graph = Graph::builder("wf", "g")
            .add_node(Node::trigger("init", "Init", trigger::INIT))
            .add_node(Node::trigger("cyc", "Cyclic", trigger::CYCLIC))
            .add_node(Node::trigger("t", "Custom", "/self/inbox"))
            .build()
            .unwrap();
        assert_eq!(graph.trigger_topics(), vec!["/self/inbox"]);
    }
}
