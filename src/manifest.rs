//! Manifest tree builder.
//!
//! Converts the flat, ordered list of file paths derived from a design into
//! the hierarchical folder/file tree pushed to clients as the
//! `initial-structure` event, rooted at a single folder named after the
//! project.

use serde::{Deserialize, Serialize};

/// One node of the manifest tree. Serializes with `"type": "folder"` /
/// `"type": "file"`, the shape subscribed clients render directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ManifestNode {
    Folder {
        name: String,
        /// Root-relative, slash-joined; unique within a tree.
        path: String,
        children: Vec<ManifestNode>,
    },
    File {
        name: String,
        path: String,
        /// Empty at structure time; populated client-side as chunks stream in.
        content: String,
    },
}

impl ManifestNode {
    pub fn name(&self) -> &str {
        match self {
            ManifestNode::Folder { name, .. } | ManifestNode::File { name, .. } => name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            ManifestNode::Folder { path, .. } | ManifestNode::File { path, .. } => path,
        }
    }
}

/// Build the manifest tree for a project from an ordered path list.
///
/// Paths are stably sorted so everything under `src/` comes first, ties
/// broken lexicographically. Each distinct prefix yields exactly one folder
/// node and each distinct full path one file node; duplicates and malformed
/// paths collapse into the node already there. Total over any input.
pub fn build(project_name: &str, ordered_paths: &[String]) -> ManifestNode {
    let mut sorted: Vec<&String> = ordered_paths.iter().collect();
    sorted.sort_by(|a, b| {
        (!a.starts_with("src/"), a.as_str()).cmp(&(!b.starts_with("src/"), b.as_str()))
    });

    let mut children = Vec::new();
    for path in sorted {
        let parts: Vec<&str> = path.split('/').collect();
        insert(&mut children, &parts, "", path);
    }

    ManifestNode::Folder {
        name: project_name.to_string(),
        path: project_name.to_string(),
        children,
    }
}

fn insert(level: &mut Vec<ManifestNode>, parts: &[&str], prefix: &str, full_path: &str) {
    let Some((head, rest)) = parts.split_first() else {
        return;
    };

    if rest.is_empty() {
        if !level.iter().any(|n| n.name() == *head) {
            level.push(ManifestNode::File {
                name: head.to_string(),
                path: full_path.to_string(),
                content: String::new(),
            });
        }
        return;
    }

    let folder_path = if prefix.is_empty() {
        head.to_string()
    } else {
        format!("{prefix}/{head}")
    };

    let at = match level.iter().position(|n| n.name() == *head) {
        Some(at) => at,
        None => {
            level.push(ManifestNode::Folder {
                name: head.to_string(),
                path: folder_path.clone(),
                children: Vec::new(),
            });
            level.len() - 1
        }
    };

    if let ManifestNode::Folder { children, .. } = &mut level[at] {
        insert(children, rest, &folder_path, full_path);
    }
    // A file node already occupying the name swallows the rest of the path.
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn folder_children<'a>(node: &'a ManifestNode) -> &'a [ManifestNode] {
        match node {
            ManifestNode::Folder { children, .. } => children,
            ManifestNode::File { .. } => panic!("expected folder"),
        }
    }

    fn count_nodes(node: &ManifestNode) -> (usize, usize) {
        match node {
            ManifestNode::Folder { children, .. } => {
                let mut folders = 1;
                let mut files = 0;
                for child in children {
                    let (f, l) = count_nodes(child);
                    folders += f;
                    files += l;
                }
                (folders, files)
            }
            ManifestNode::File { .. } => (0, 1),
        }
    }

    #[test]
    fn test_build_rooted_at_project_folder() {
        let tree = build("liquidity_pool", &paths(&["src/lib.rs"]));
        assert_eq!(tree.name(), "liquidity_pool");
        assert_eq!(tree.path(), "liquidity_pool");
        let children = folder_children(&tree);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name(), "src");
    }

    #[test]
    fn test_four_leaf_example_tree() {
        let tree = build(
            "vault",
            &paths(&["src/lib.rs", "test/lib_test.rs", "Cargo.toml", "README.md"]),
        );
        let (folders, files) = count_nodes(&tree);
        // Root + src + test folders; four file leaves.
        assert_eq!(folders, 3);
        assert_eq!(files, 4);

        // src/ paths sort ahead of everything else.
        let children = folder_children(&tree);
        assert_eq!(children[0].name(), "src");
        let rest: Vec<&str> = children[1..].iter().map(|n| n.name()).collect();
        assert_eq!(rest, vec!["Cargo.toml", "README.md", "test"]);
    }

    #[test]
    fn test_shared_prefix_yields_one_folder() {
        let tree = build(
            "p",
            &paths(&["src/pool/math.rs", "src/pool/swap.rs", "src/lib.rs"]),
        );
        let children = folder_children(&tree);
        assert_eq!(children.len(), 1, "one src folder");
        let src = &children[0];
        let src_children = folder_children(src);
        // lib.rs sorts before pool/ lexicographically.
        assert_eq!(src_children[0].name(), "lib.rs");
        assert_eq!(src_children[1].name(), "pool");
        assert_eq!(src_children[1].path(), "src/pool");
        assert_eq!(folder_children(&src_children[1]).len(), 2);
    }

    #[test]
    fn test_duplicate_paths_collapse() {
        let tree = build("p", &paths(&["src/lib.rs", "src/lib.rs", "src/lib.rs"]));
        let (folders, files) = count_nodes(&tree);
        assert_eq!(folders, 2);
        assert_eq!(files, 1);
    }

    #[test]
    fn test_file_paths_are_root_relative() {
        let tree = build("p", &paths(&["src/pool/math.rs"]));
        let src = &folder_children(&tree)[0];
        let pool = &folder_children(src)[0];
        let math = &folder_children(pool)[0];
        assert_eq!(math.path(), "src/pool/math.rs");
        match math {
            ManifestNode::File { content, .. } => assert!(content.is_empty()),
            _ => panic!("expected file leaf"),
        }
    }

    #[test]
    fn test_serializes_with_type_tags() {
        let tree = build("p", &paths(&["src/lib.rs"]));
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["type"], "folder");
        assert_eq!(json["children"][0]["type"], "folder");
        assert_eq!(json["children"][0]["children"][0]["type"], "file");
        assert_eq!(json["children"][0]["children"][0]["path"], "src/lib.rs");
    }

    #[test]
    fn test_empty_path_list() {
        let tree = build("empty", &[]);
        assert!(folder_children(&tree).is_empty());
    }
}
