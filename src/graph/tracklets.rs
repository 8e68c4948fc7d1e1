//! Collapse unambiguous chains of nodes into tracklet nodes.

use crate::graph::hypotheses::{HypothesesGraph, Link, LinkId, Node, NodeId};

impl HypothesesGraph {
    /// A link is absorbed into a tracklet when it is the only way out of its
    /// source and the only way into its target, and neither end is a
    /// division candidate.
    pub fn is_mergeable(&self, id: LinkId) -> bool {
        let Link { source, target } = self.link(id);
        self.outgoing(source).len() == 1
            && self.incoming(target).len() == 1
            && !self.node(source).is_division_candidate()
            && !self.node(target).is_division_candidate()
    }

    /// Number of links [`Self::tracklet_graph`] would absorb.
    pub fn mergeable_link_count(&self) -> usize {
        self.links().filter(|(id, _)| self.is_mergeable(*id)).count()
    }

    /// Build the tracklet graph: every maximal chain of mergeable links becomes
    /// one node owning the concatenated traxels; the remaining links are
    /// redirected to the chain endpoints.
    ///
    /// Node count of the result equals `node_count() - mergeable_link_count()`.
    pub fn tracklet_graph(&self) -> HypothesesGraph {
        let mut chain_of = vec![usize::MAX; self.node_count()];
        let mut nodes: Vec<Node> = Vec::new();

        let mut heads: Vec<NodeId> = self
            .nodes()
            .filter(|(id, _)| {
                !self
                    .incoming(*id)
                    .iter()
                    .any(|&l| self.is_mergeable(l))
            })
            .map(|(id, _)| id)
            .collect();
        heads.sort_by_key(|&id| (self.node(id).start(), id));

        for head in heads {
            let chain = nodes.len();
            let mut tracklet = self.node(head).clone();
            chain_of[head.0] = chain;

            let mut current = head;
            while let [only] = self.outgoing(current) {
                if !self.is_mergeable(*only) {
                    break;
                }
                let next = self.link(*only).target;
                tracklet.extend_with(self.node(next));
                chain_of[next.0] = chain;
                current = next;
            }
            nodes.push(tracklet);
        }
        debug_assert!(chain_of.iter().all(|&c| c != usize::MAX));

        let links: Vec<Link> = self
            .links()
            .filter(|(id, _)| !self.is_mergeable(*id))
            .map(|(_, link)| Link {
                source: NodeId(chain_of[link.source.0]),
                target: NodeId(chain_of[link.target.0]),
            })
            .collect();

        tracing::info!(
            "tracklet graph: {} nodes ({} before), {} links",
            nodes.len(),
            self.node_count(),
            links.len()
        );
        HypothesesGraph::from_parts(nodes, links)
    }
}
