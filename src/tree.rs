use std::collections::BTreeMap;

#[derive(Default)]
struct Node {
    children: BTreeMap<String, Node>,
}

/// Render a deterministic textual tree from relative paths. Paths are split
/// on `/`, siblings are ordered lexicographically, and the synthetic root is
/// suppressed from the output.
pub fn render_tree(paths: &[String]) -> String {
    let mut root = Node::default();
    for path in paths {
        let norm = path.replace('\\', "/");
        let mut node = &mut root;
        for segment in norm.split('/').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
    }

    let mut out = String::new();
    render_children(&root, "", &mut out);
    out
}

fn render_children(node: &Node, prefix: &str, out: &mut String) {
    let count = node.children.len();
    for (i, (name, child)) in node.children.iter().enumerate() {
        let last = i + 1 == count;
        out.push_str(prefix);
        out.push_str(if last { "└─ " } else { "├─ " });
        out.push_str(name);
        out.push('\n');

        let child_prefix = format!("{prefix}{}", if last { "   " } else { "│  " });
        render_children(child, &child_prefix, out);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
