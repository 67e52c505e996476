//! Rooted binary phylogenetic trees.
//!
//! Arena storage: nodes live in a flat `Vec<TreeNode>` and are referenced by
//! `NodeId` (a `usize` index that doubles as the node's id). An unrooted
//! tree is represented by rooting it on an arbitrary branch; the two
//! branches below the root then behave as a single branch.

use phylohmm_core::{PhyloHmmError, Result, Summarizable};

/// Index into the tree's node arena.
pub type NodeId = usize;

/// A single node of a binary tree.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub lchild: Option<NodeId>,
    pub rchild: Option<NodeId>,
    /// Length of the branch to the parent (0 at the root).
    pub dparent: f64,
    pub name: Option<String>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.lchild.is_none() && self.rchild.is_none()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Children, left first.
    pub fn children(&self) -> impl Iterator<Item = NodeId> {
        self.lchild.into_iter().chain(self.rchild)
    }
}

/// A rooted binary tree with branch lengths.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tree {
    nodes: Vec<TreeNode>,
    root: NodeId,
}

impl Tree {
    /// A tree from pre-built nodes. Every node must have zero or two
    /// children, ids must equal positions, and branch lengths must be
    /// non-negative.
    pub fn from_nodes(nodes: Vec<TreeNode>, root: NodeId) -> Result<Self> {
        if nodes.is_empty() {
            return Err(PhyloHmmError::InvalidInput("empty node list".into()));
        }
        if root >= nodes.len() {
            return Err(PhyloHmmError::InvalidInput(format!(
                "root index {} out of range ({})",
                root,
                nodes.len()
            )));
        }
        for (i, n) in nodes.iter().enumerate() {
            if n.id != i {
                return Err(PhyloHmmError::InvalidInput(format!(
                    "node at position {} has id {}",
                    i, n.id
                )));
            }
            if n.lchild.is_some() != n.rchild.is_some() {
                return Err(PhyloHmmError::InvalidInput(format!(
                    "node {i} has exactly one child; tree must be binary"
                )));
            }
            for c in n.children() {
                if nodes.get(c).and_then(|cn| cn.parent) != Some(i) {
                    return Err(PhyloHmmError::InvalidInput(format!(
                        "child {c} of node {i} does not point back to its parent"
                    )));
                }
            }
            if n.dparent < 0.0 || n.dparent.is_nan() {
                return Err(PhyloHmmError::NumericDegeneracy(format!(
                    "node {} has invalid branch length {}",
                    i, n.dparent
                )));
            }
        }
        if nodes[root].parent.is_some() {
            return Err(PhyloHmmError::InvalidInput("root node has a parent".into()));
        }
        Ok(Self { nodes, root })
    }

    /// Parse a Newick string.
    pub fn from_newick(input: &str) -> Result<Self> {
        crate::newick::parse(input)
    }

    /// Serialize to Newick.
    pub fn to_newick(&self) -> String {
        crate::newick::write(self)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn nnodes(&self) -> usize {
        self.nodes.len()
    }

    /// Leaf ids in arena order.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes.iter().filter(|n| n.is_leaf()).map(|n| n.id).collect()
    }

    /// Id of the leaf named `name`.
    pub fn leaf_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| n.is_leaf() && n.name.as_deref() == Some(name))
            .map(|n| n.id)
    }

    /// Whether `id` is a child of the root.
    pub fn is_root_child(&self, id: NodeId) -> bool {
        self.nodes.get(id).and_then(|n| n.parent) == Some(self.root)
    }

    /// Parent before children, left subtree first.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            let n = &self.nodes[id];
            stack.extend(n.rchild);
            stack.extend(n.lchild);
        }
        out
    }

    /// Children before parent, left subtree first.
    pub fn postorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            let n = &self.nodes[id];
            stack.extend(n.lchild);
            stack.extend(n.rchild);
        }
        out.reverse();
        out
    }

    /// Sum of all branch lengths.
    pub fn total_length(&self) -> f64 {
        self.nodes.iter().map(|n| n.dparent).sum()
    }

    /// Multiply every branch length by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for n in &mut self.nodes {
            n.dparent *= factor;
        }
    }
}

impl Summarizable for Tree {
    fn summary(&self) -> String {
        let leaves = self.leaves().len();
        format!(
            "Tree: {} nodes ({} leaves), total branch length {:.6}",
            self.nnodes(),
            leaves,
            self.total_length()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Tree {
        Tree::from_newick("((A:0.1,B:0.2)AB:0.3,(C:0.4,D:0.5)CD:0.6);").unwrap()
    }

    #[test]
    fn traversals() {
        let tree = sample_tree();
        let names = |ids: Vec<NodeId>| -> Vec<String> {
            ids.into_iter()
                .map(|i| tree.node(i).unwrap().name.clone().unwrap_or_default())
                .collect()
        };
        assert_eq!(names(tree.preorder()), vec!["", "AB", "A", "B", "CD", "C", "D"]);
        assert_eq!(names(tree.postorder()), vec!["A", "B", "AB", "C", "D", "CD", ""]);
    }

    #[test]
    fn leaves_and_lookup() {
        let tree = sample_tree();
        assert_eq!(tree.leaves().len(), 4);
        let c = tree.leaf_by_name("C").unwrap();
        assert_eq!(tree.node(c).unwrap().dparent, 0.4);
        assert!(tree.leaf_by_name("AB").is_none());
        let ab = tree.node(tree.root()).unwrap().lchild.unwrap();
        assert!(tree.is_root_child(ab));
        assert!(!tree.is_root_child(c));
    }

    #[test]
    fn scaling_multiplies_lengths() {
        let mut tree = sample_tree();
        let before = tree.total_length();
        tree.scale(2.0);
        assert!((tree.total_length() - 2.0 * before).abs() < 1e-12);
    }

    #[test]
    fn rejects_unary_nodes() {
        let nodes = vec![
            TreeNode {
                id: 0,
                parent: None,
                lchild: Some(1),
                rchild: None,
                dparent: 0.0,
                name: None,
            },
            TreeNode {
                id: 1,
                parent: Some(0),
                lchild: None,
                rchild: None,
                dparent: 0.1,
                name: Some("A".into()),
            },
        ];
        assert!(Tree::from_nodes(nodes, 0).is_err());
    }

    #[test]
    fn summary_format() {
        let tree = sample_tree();
        assert_eq!(tree.summary(), "Tree: 7 nodes (4 leaves), total branch length 2.100000");
    }
}
