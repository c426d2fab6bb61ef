use chrono::{Local, TimeZone};

use scribe_sync_lib::sync::{NodeType, SnapshotChildren, SnapshotNode, SnapshotTree};

/// ANSI color codes
pub struct Color;

impl Color {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const BLUE: &str = "\x1b[34m";
}

/// Wrap `text` in `color` when colors are enabled
pub fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("{}{}{}", color, text, Color::RESET)
    } else {
        text.to_string()
    }
}

/// Local time of an epoch-seconds timestamp; 0 means never
pub fn format_epoch(epoch: i64) -> String {
    if epoch <= 0 {
        return "never".to_string();
    }
    match Local.timestamp_opt(epoch, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M").to_string(),
        None => epoch.to_string(),
    }
}

/// Box-drawing tree of the snapshot, folders first, each level sorted by name
pub fn render_tree(tree: &SnapshotTree, use_color: bool) -> Vec<String> {
    let mut lines = Vec::new();
    render_children(&tree.items, "", use_color, &mut lines);
    lines
}

fn sorted_children(items: &SnapshotChildren) -> Vec<&SnapshotNode> {
    let mut children: Vec<&SnapshotNode> = items.values().collect();
    children.sort_by(|a, b| {
        let a_key = (a.node_type != NodeType::Folder, a.name.to_lowercase());
        let b_key = (b.node_type != NodeType::Folder, b.name.to_lowercase());
        a_key.cmp(&b_key)
    });
    children
}

fn render_children(
    items: &SnapshotChildren,
    prefix: &str,
    use_color: bool,
    lines: &mut Vec<String>,
) {
    let children = sorted_children(items);
    let total = children.len();

    for (idx, node) in children.into_iter().enumerate() {
        let is_last = idx + 1 == total;
        let connector = if is_last { "\u{2514}\u{2500}\u{2500} " } else { "\u{251c}\u{2500}\u{2500} " };

        match node.node_type {
            NodeType::Folder => {
                let name = paint(&format!("{}/", node.name), Color::BLUE, use_color);
                lines.push(format!("{}{}{}", prefix, connector, name));
                let child_prefix = format!("{}{}", prefix, if is_last { "    " } else { "\u{2502}   " });
                render_children(&node.items, &child_prefix, use_color, lines);
            }
            NodeType::Notebook => {
                let updated = paint(
                    &format!("({})", format_epoch(node.update_time)),
                    Color::DIM,
                    use_color,
                );
                lines.push(format!("{}{}{}.pdf {}", prefix, connector, node.name, updated));
            }
        }
    }
}
