//! Test tree - roots, files and cases
//!
//! One root node per workspace folder, one file node per admitted
//! `test_*.cairo` file and one case node per discovered test function.
//! Children keep insertion order; inserting under an existing id replaces the
//! node in place.

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Separator between a file id and a case label, and between a root name and
/// a node id in qualified ids.
pub const ID_SEPARATOR: &str = "::";

/// Kind of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A workspace folder
    Root,
    /// A test source file
    File,
    /// A single test function
    Case,
}

impl NodeKind {
    /// Roots and files group other nodes; cases are leaves
    pub fn is_container(self) -> bool {
        !matches!(self, NodeKind::Case)
    }
}

/// Filesystem location of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    /// Absolute path of the root directory or source file
    pub path: PathBuf,
    /// Zero-based line of a case declaration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Location {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            line: None,
        }
    }

    pub fn with_line(path: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            path: path.into(),
            line: Some(line),
        }
    }
}

/// Handle naming one node of a [`TestTree`]
///
/// `root` is the workspace folder name and `id` the node id inside that root.
/// A root node is named by a ref with an empty `id`, so a file whose path
/// happens to equal its folder name is still addressed as a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NodeRef {
    pub root: String,
    pub id: String,
}

impl NodeRef {
    pub fn new(root: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            id: id.into(),
        }
    }

    /// Ref to the root node of a workspace folder
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            root: name.into(),
            id: String::new(),
        }
    }

    /// Parse a qualified id (`root` or `root::node id`)
    pub fn parse(qualified: &str) -> Option<Self> {
        if qualified.is_empty() {
            return None;
        }
        match qualified.split_once(ID_SEPARATOR) {
            Some((root, id)) if !root.is_empty() && !id.is_empty() => Some(Self::new(root, id)),
            Some(_) => None,
            None => Some(Self::root(qualified)),
        }
    }

    /// Whether this ref names a root node
    pub fn is_root(&self) -> bool {
        self.id.is_empty()
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "{}", self.root)
        } else {
            write!(f, "{}{}{}", self.root, ID_SEPARATOR, self.id)
        }
    }
}

/// A node of the test tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestNode {
    id: String,
    label: String,
    kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<Location>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    children: IndexMap<String, TestNode>,
    can_resolve_children: bool,
}

impl TestNode {
    fn new(id: String, label: String, kind: NodeKind, location: Option<Location>) -> Self {
        Self {
            id,
            label,
            kind,
            location,
            children: IndexMap::new(),
            can_resolve_children: false,
        }
    }

    /// Create a root node for a workspace folder
    pub fn root(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let name = name.into();
        Self::new(
            name.clone(),
            name,
            NodeKind::Root,
            Some(Location::new(path)),
        )
    }

    /// Create a file node whose cases still have to be resolved
    pub fn file(id: impl Into<String>, label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let mut node = Self::new(
            id.into(),
            label.into(),
            NodeKind::File,
            Some(Location::new(path)),
        );
        node.can_resolve_children = true;
        node
    }

    /// Create a case node declared at `line` of `path`
    pub fn case(
        id: impl Into<String>,
        label: impl Into<String>,
        path: impl Into<PathBuf>,
        line: usize,
    ) -> Self {
        Self::new(
            id.into(),
            label.into(),
            NodeKind::Case,
            Some(Location::with_line(path, line)),
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.location.as_ref().map(|l| l.path.as_path())
    }

    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }

    /// Whether children must be resolved before this node is used
    pub fn can_resolve_children(&self) -> bool {
        self.can_resolve_children
    }

    pub fn set_can_resolve_children(&mut self, value: bool) {
        self.can_resolve_children = value;
    }

    /// Children in insertion order
    pub fn children(&self) -> impl Iterator<Item = &TestNode> {
        self.children.values()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Direct child with exactly this id
    pub fn child(&self, id: &str) -> Option<&TestNode> {
        self.children.get(id)
    }

    pub fn child_mut(&mut self, id: &str) -> Option<&mut TestNode> {
        self.children.get_mut(id)
    }

    /// Insert a child, replacing any child with the same id in place
    pub fn add_child(&mut self, child: TestNode) {
        self.children.insert(child.id.clone(), child);
    }

    /// Remove a child by id, keeping the order of the remaining children
    pub fn remove_child(&mut self, id: &str) -> Option<TestNode> {
        self.children.shift_remove(id)
    }

    /// Replace every child at once; the node counts as resolved afterwards
    pub fn replace_children(&mut self, children: impl IntoIterator<Item = TestNode>) {
        self.children = children
            .into_iter()
            .map(|child| (child.id.clone(), child))
            .collect();
        self.can_resolve_children = false;
    }

    /// Depth-first search for a descendant (or this node) by id
    pub fn find(&self, id: &str) -> Option<&TestNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.values().find_map(|child| child.find(id))
    }
}

/// The whole test hierarchy, one root per workspace folder
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestTree {
    roots: IndexMap<String, TestNode>,
}

impl TestTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root node for `name`, created at `path` if absent
    pub fn get_or_insert_root(&mut self, name: &str, path: &Path) -> &mut TestNode {
        self.roots
            .entry(name.to_string())
            .or_insert_with(|| TestNode::root(name, path))
    }

    pub fn root(&self, name: &str) -> Option<&TestNode> {
        self.roots.get(name)
    }

    pub fn root_mut(&mut self, name: &str) -> Option<&mut TestNode> {
        self.roots.get_mut(name)
    }

    /// Tear down a root together with every node below it
    pub fn remove_root(&mut self, name: &str) -> Option<TestNode> {
        self.roots.shift_remove(name)
    }

    pub fn roots(&self) -> impl Iterator<Item = &TestNode> {
        self.roots.values()
    }

    /// Refs to every top-level node, in insertion order
    pub fn root_refs(&self) -> Vec<NodeRef> {
        self.roots.keys().map(NodeRef::root).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Look a node up by ref
    pub fn get(&self, node: &NodeRef) -> Option<&TestNode> {
        let root = self.roots.get(&node.root)?;
        if node.is_root() {
            return Some(root);
        }
        match node.id.split_once(ID_SEPARATOR) {
            Some((file, _)) => root.child(file)?.child(&node.id),
            None => root.child(&node.id),
        }
    }

    pub fn get_mut(&mut self, node: &NodeRef) -> Option<&mut TestNode> {
        let root = self.roots.get_mut(&node.root)?;
        if node.is_root() {
            return Some(root);
        }
        match node.id.split_once(ID_SEPARATOR) {
            Some((file, _)) => root.child_mut(file)?.child_mut(&node.id),
            None => root.child_mut(&node.id),
        }
    }

    /// Refs to every file node, root by root
    pub fn file_refs(&self) -> Vec<NodeRef> {
        self.roots
            .values()
            .flat_map(|root| {
                root.children()
                    .filter(|child| child.kind() == NodeKind::File)
                    .map(move |file| NodeRef::new(root.id(), file.id()))
            })
            .collect()
    }

    /// Globally unique id of a node (`root::id`)
    pub fn qualified_id(&self, node: &NodeRef) -> Option<String> {
        self.get(node).map(|_| node.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_tree() -> TestTree {
        let mut tree = TestTree::new();
        let root = tree.get_or_insert_root("starklings", Path::new("/ws/starklings"));
        let mut file = TestNode::file(
            "tests/test_main.cairo",
            "test_main.cairo",
            "/ws/starklings/tests/test_main.cairo",
        );
        file.replace_children([
            TestNode::case(
                "tests/test_main.cairo::test_alpha",
                "test_alpha",
                "/ws/starklings/tests/test_main.cairo",
                0,
            ),
            TestNode::case(
                "tests/test_main.cairo::test_beta",
                "test_beta",
                "/ws/starklings/tests/test_main.cairo",
                4,
            ),
        ]);
        root.add_child(file);
        tree
    }

    #[test]
    fn test_node_ref_display_and_parse() {
        let case = NodeRef::new("starklings", "tests/test_main.cairo::test_alpha");
        assert_eq!(
            case.to_string(),
            "starklings::tests/test_main.cairo::test_alpha"
        );
        assert_eq!(NodeRef::parse(&case.to_string()), Some(case));

        let root = NodeRef::root("starklings");
        assert!(root.is_root());
        assert_eq!(root.to_string(), "starklings");
        assert_eq!(NodeRef::parse("starklings"), Some(root));

        assert_eq!(NodeRef::parse(""), None);
        assert_eq!(NodeRef::parse("::tests/test_main.cairo"), None);
    }

    #[test]
    fn test_get_by_ref() {
        let tree = sample_tree();

        let root = tree.get(&NodeRef::root("starklings")).unwrap();
        assert_eq!(root.kind(), NodeKind::Root);

        let file = tree
            .get(&NodeRef::new("starklings", "tests/test_main.cairo"))
            .unwrap();
        assert_eq!(file.kind(), NodeKind::File);
        assert!(!file.can_resolve_children());

        let case = tree
            .get(&NodeRef::new(
                "starklings",
                "tests/test_main.cairo::test_beta",
            ))
            .unwrap();
        assert_eq!(case.label(), "test_beta");
        assert_eq!(case.location().unwrap().line, Some(4));

        assert!(tree.get(&NodeRef::new("starklings", "missing")).is_none());
        assert!(tree.get(&NodeRef::root("other")).is_none());
    }

    #[test]
    fn test_file_named_like_its_folder_is_not_the_root() {
        let mut tree = TestTree::new();
        let root = tree.get_or_insert_root("test_x.cairo", Path::new("/ws/test_x.cairo"));
        root.add_child(TestNode::file(
            "test_x.cairo",
            "test_x.cairo",
            "/ws/test_x.cairo/test_x.cairo",
        ));

        let file_ref = NodeRef::new("test_x.cairo", "test_x.cairo");
        assert!(!file_ref.is_root());
        assert_eq!(tree.get(&file_ref).unwrap().kind(), NodeKind::File);
        assert_eq!(file_ref.to_string(), "test_x.cairo::test_x.cairo");

        let root_ref = NodeRef::root("test_x.cairo");
        assert_eq!(tree.get(&root_ref).unwrap().kind(), NodeKind::Root);
        assert_eq!(tree.root_refs(), vec![root_ref]);
    }

    #[test]
    fn test_tree_serializes_to_json() {
        let json = serde_json::to_value(sample_tree()).unwrap();
        let root = &json["roots"]["starklings"];
        assert_eq!(root["kind"], "root");

        let file = &root["children"]["tests/test_main.cairo"];
        assert_eq!(file["kind"], "file");
        assert_eq!(file["can_resolve_children"], false);

        let case = &file["children"]["tests/test_main.cairo::test_beta"];
        assert_eq!(case["label"], "test_beta");
        assert_eq!(case["location"]["line"], 4);
        assert!(case.get("children").is_none());
    }

    #[test]
    fn test_add_child_replaces_in_place() {
        let mut root = TestNode::root("ws", "/ws");
        root.add_child(TestNode::file("test_a.cairo", "test_a.cairo", "/ws/test_a.cairo"));
        root.add_child(TestNode::file("test_b.cairo", "test_b.cairo", "/ws/test_b.cairo"));

        let mut replacement = TestNode::file("test_a.cairo", "renamed", "/ws/test_a.cairo");
        replacement.set_can_resolve_children(false);
        root.add_child(replacement);

        let labels: Vec<_> = root.children().map(|c| c.label().to_string()).collect();
        assert_eq!(labels, vec!["renamed", "test_b.cairo"]);
    }

    #[test]
    fn test_remove_child_keeps_order() {
        let mut root = TestNode::root("ws", "/ws");
        for name in ["test_a.cairo", "test_b.cairo", "test_c.cairo"] {
            root.add_child(TestNode::file(name, name, format!("/ws/{}", name)));
        }

        assert!(root.remove_child("test_b.cairo").is_some());
        assert!(root.remove_child("test_b.cairo").is_none());

        let ids: Vec<_> = root.children().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["test_a.cairo", "test_c.cairo"]);
    }

    #[test]
    fn test_file_refs_and_qualified_id() {
        let tree = sample_tree();
        let files = tree.file_refs();
        assert_eq!(
            files,
            vec![NodeRef::new("starklings", "tests/test_main.cairo")]
        );
        assert_eq!(
            tree.qualified_id(&files[0]),
            Some("starklings::tests/test_main.cairo".to_string())
        );
    }

    #[test]
    fn test_find_descendant() {
        let tree = sample_tree();
        let root = tree.root("starklings").unwrap();
        assert!(root.find("tests/test_main.cairo::test_alpha").is_some());
        assert!(root.find("starklings").is_some());
        assert!(root.find("nope").is_none());
    }
}
