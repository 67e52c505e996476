//! Newick reader and writer for binary trees.
//!
//! ```text
//! tree     = subtree ';'
//! subtree  = '(' subtree ',' subtree ')' label | label
//! label    = name? (':' length)?
//! ```
//!
//! A missing branch length reads as 0. Internal nodes may carry names.

use crate::tree::{NodeId, Tree, TreeNode};
use phylohmm_core::{PhyloHmmError, Result};

/// Parse a Newick string into a binary [`Tree`].
pub fn parse(input: &str) -> Result<Tree> {
    let mut reader = Reader {
        input: input.as_bytes(),
        pos: 0,
        nodes: Vec::new(),
    };
    reader.skip_ws();
    let root = reader.subtree(None)?;
    reader.skip_ws();
    if reader.peek() != Some(b';') {
        return Err(PhyloHmmError::Parse(format!(
            "expected ';' at offset {} of Newick string",
            reader.pos
        )));
    }
    // the root has no branch above it
    reader.nodes[root].dparent = 0.0;
    Tree::from_nodes(reader.nodes, root)
}

/// Serialize a tree to Newick, writing every non-root branch length.
pub fn write(tree: &Tree) -> String {
    let mut buf = String::new();
    write_node(tree, tree.root(), &mut buf);
    buf.push(';');
    buf
}

fn write_node(tree: &Tree, id: NodeId, buf: &mut String) {
    let Some(node) = tree.node(id) else {
        return;
    };
    if let (Some(l), Some(r)) = (node.lchild, node.rchild) {
        buf.push('(');
        write_node(tree, l, buf);
        buf.push(',');
        write_node(tree, r, buf);
        buf.push(')');
    }
    if let Some(name) = &node.name {
        buf.push_str(name);
    }
    if !node.is_root() {
        buf.push(':');
        buf.push_str(&format_length(node.dparent));
    }
}

fn format_length(len: f64) -> String {
    let s = format!("{:.10}", len);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() {
        "0".to_string()
    } else {
        s.to_string()
    }
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: Vec<TreeNode>,
}

impl Reader<'_> {
    fn subtree(&mut self, parent: Option<NodeId>) -> Result<NodeId> {
        self.skip_ws();
        let id = self.nodes.len();
        self.nodes.push(TreeNode {
            id,
            parent,
            lchild: None,
            rchild: None,
            dparent: 0.0,
            name: None,
        });

        if self.peek() == Some(b'(') {
            self.pos += 1;
            let mut children = vec![self.subtree(Some(id))?];
            loop {
                self.skip_ws();
                match self.peek() {
                    Some(b',') => {
                        self.pos += 1;
                        children.push(self.subtree(Some(id))?);
                    }
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => {
                        return Err(PhyloHmmError::Parse(format!(
                            "expected ',' or ')' at offset {} of Newick string",
                            self.pos
                        )))
                    }
                }
            }
            if children.len() != 2 {
                return Err(PhyloHmmError::Parse(format!(
                    "node with {} children; only binary trees are supported",
                    children.len()
                )));
            }
            self.nodes[id].lchild = Some(children[0]);
            self.nodes[id].rchild = Some(children[1]);
        }

        self.label(id)?;
        Ok(id)
    }

    fn label(&mut self, id: NodeId) -> Result<()> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, b':' | b',' | b')' | b'(' | b';') || c.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        if self.pos > start {
            self.nodes[id].name =
                Some(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned());
        }
        self.skip_ws();
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_ws();
            let start = self.pos;
            while let Some(c) = self.peek() {
                if !matches!(c, b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E') {
                    break;
                }
                self.pos += 1;
            }
            let text = String::from_utf8_lossy(&self.input[start..self.pos]);
            let len: f64 = text.parse().map_err(|_| {
                PhyloHmmError::Parse(format!("invalid branch length '{}'", text))
            })?;
            self.nodes[id].dparent = len;
        }
        Ok(())
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_nested_with_lengths() {
        let tree = parse("((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6);").unwrap();
        assert_eq!(tree.nnodes(), 7);
        let names: Vec<_> = tree
            .leaves()
            .into_iter()
            .map(|id| tree.node(id).unwrap().name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["A", "B", "C", "D"]);
        let b = tree.leaf_by_name("B").unwrap();
        assert_eq!(tree.node(b).unwrap().dparent, 0.2);
    }

    #[test]
    fn missing_lengths_read_as_zero() {
        let tree = parse("((A,B)x,C);").unwrap();
        assert!(tree.nodes().iter().all(|n| n.dparent == 0.0));
        assert_eq!(tree.node(1).unwrap().name.as_deref(), Some("x"));
    }

    #[test]
    fn whitespace_is_ignored() {
        let tree = parse(" ( A : 0.1 ,\n B : 0.2 ) ; ").unwrap();
        assert_eq!(tree.nnodes(), 3);
    }

    #[test]
    fn rejects_multifurcation_and_bad_syntax() {
        assert!(matches!(parse("(A,B,C);"), Err(PhyloHmmError::Parse(_))));
        assert!(parse("((A,B);").is_err());
        assert!(parse("(A,B)").is_err());
        assert!(parse("(A:x,B);").is_err());
        assert!(parse("(A:-1,B);").is_err());
    }

    #[test]
    fn write_then_parse_preserves_tree() {
        let text = "((A:0.1,B:0.25)AB:0.3,(C:0.4,D:1.5e-7):0);";
        let tree = parse(text).unwrap();
        let out = write(&tree);
        assert_eq!(out, "((A:0.1,B:0.25)AB:0.3,(C:0.4,D:0.00000015):0);");
        assert_eq!(parse(&out).unwrap(), tree);
    }
}
