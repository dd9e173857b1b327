//! Rendering trees as box-drawn text
//!
//! ```text
//! secret
//! ├── a/
//! │   └── c
//! └── b
//! ```

use super::node::{NodeType, TreeNode};
use console::style;

const BRANCH: &str = "├── ";
const LAST_BRANCH: &str = "└── ";
const PIPE: &str = "│   ";
const SPACE: &str = "    ";

impl TreeNode {
    /// Render this tree
    ///
    /// With `leaves` unset, plain secrets are left out so only the directory
    /// structure remains. Colour: directories blue, secrets green, keys
    /// yellow.
    pub fn draw(&self, color: bool, leaves: bool) -> String {
        if hidden(self, leaves) {
            return String::new();
        }

        let mut out = String::new();
        out.push_str(&label(self, &self.name, color));
        out.push('\n');
        draw_branches(&mut out, self, "", color, leaves);
        out
    }
}

fn hidden(node: &TreeNode, leaves: bool) -> bool {
    node.node_type == NodeType::Secret && !leaves
}

fn draw_branches(out: &mut String, node: &TreeNode, prefix: &str, color: bool, leaves: bool) {
    let visible: Vec<&TreeNode> = node.branches.iter().filter(|b| !hidden(b, leaves)).collect();

    for (i, branch) in visible.iter().enumerate() {
        let last = i + 1 == visible.len();
        out.push_str(prefix);
        out.push_str(if last { LAST_BRANCH } else { BRANCH });
        out.push_str(&label(branch, &branch.basename(), color));
        out.push('\n');

        let child_prefix = format!("{}{}", prefix, if last { SPACE } else { PIPE });
        draw_branches(out, branch, &child_prefix, color, leaves);
    }
}

fn label(node: &TreeNode, text: &str, color: bool) -> String {
    if !color {
        return text.to_string();
    }

    let styled = style(text).force_styling(true);
    match node.node_type {
        NodeType::Root | NodeType::Directory => styled.blue().to_string(),
        NodeType::Secret | NodeType::DirectoryAndSecret => styled.green().to_string(),
        NodeType::Key => styled.yellow().to_string(),
        NodeType::Version => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TreeNode {
        TreeNode::new("secret/", NodeType::Directory).with_branches(vec![
            TreeNode::new("secret/a/", NodeType::Directory).with_branches(vec![
                TreeNode::new("secret/a/c", NodeType::Secret)
                    .with_branches(vec![TreeNode::key("secret/a/c", "key", "v", 1, false)]),
            ]),
            TreeNode::new("secret/b", NodeType::Secret),
        ])
    }

    #[test]
    fn test_draw_plain() {
        let drawn = sample().draw(false, true);
        let expected = "\
secret/
├── a/
│   └── c
│       └── :key
└── b
";
        assert_eq!(drawn, expected);
    }

    #[test]
    fn test_draw_without_leaves() {
        let drawn = sample().draw(false, false);
        assert_eq!(drawn, "secret/\n└── a/\n");

        let secret = TreeNode::new("secret/x", NodeType::Secret);
        assert_eq!(secret.draw(false, false), "");
    }

    #[test]
    fn test_draw_colored() {
        let drawn = sample().draw(true, true);
        assert!(drawn.contains("\u{1b}["));
        assert_eq!(console::strip_ansi_codes(&drawn), sample().draw(false, true));
    }
}
