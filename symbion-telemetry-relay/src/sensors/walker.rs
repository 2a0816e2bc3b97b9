//! Depth-first traversal over a sensor tree
//!
//! Every extraction rule is expressed as a visitor over this walker, so the
//! tree is never re-walked by hand. Paths are the slash-joined labels of the
//! ancestors and the node itself (unlabelled nodes contribute nothing).

use super::SensorNode;

/// What the walker does after visiting a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Descend into the node's children
    Continue,
    /// Do not descend below this node
    SkipChildren,
    /// End the traversal
    Stop,
}

/// Pre-order traversal in source order, driven by the visitor's decisions.
pub fn walk<'a, F>(root: &'a SensorNode, mut visitor: F)
where
    F: FnMut(&'a SensorNode, &str) -> Visit,
{
    let mut stack: Vec<(&'a SensorNode, String)> = vec![(root, String::new())];

    while let Some((node, parent_path)) = stack.pop() {
        let path = join_path(&parent_path, node.label());

        match visitor(node, &path) {
            Visit::Stop => return,
            Visit::SkipChildren => continue,
            Visit::Continue => {}
        }

        // Reversed so the first child is popped first
        for child in node.children.iter().rev() {
            stack.push((child, path.clone()));
        }
    }
}

/// Exhaustive traversal: every node is visited exactly once.
pub fn walk_all<'a, F>(root: &'a SensorNode, mut visitor: F)
where
    F: FnMut(&'a SensorNode, &str),
{
    walk(root, |node, path| {
        visitor(node, path);
        Visit::Continue
    });
}

/// Short-circuiting search: first node (pre-order) accepted by `predicate`.
pub fn find<'a, F>(root: &'a SensorNode, mut predicate: F) -> Option<(&'a SensorNode, String)>
where
    F: FnMut(&'a SensorNode, &str) -> bool,
{
    let mut found = None;
    walk(root, |node, path| {
        if predicate(node, path) {
            found = Some((node, path.to_string()));
            Visit::Stop
        } else {
            Visit::Continue
        }
    });
    found
}

/// Short-circuiting search that returns whatever the visitor extracted first.
pub fn find_map<'a, T, F>(root: &'a SensorNode, mut extract: F) -> Option<(T, String)>
where
    F: FnMut(&'a SensorNode, &str) -> Option<T>,
{
    let mut found = None;
    walk(root, |node, path| match extract(node, path) {
        Some(value) => {
            found = Some((value, path.to_string()));
            Visit::Stop
        }
        None => Visit::Continue,
    });
    found
}

fn join_path(parent: &str, label: Option<&str>) -> String {
    match label {
        Some(label) if parent.is_empty() => label.to_string(),
        Some(label) => format!("{}/{}", parent, label),
        None => parent.to_string(),
    }
}
