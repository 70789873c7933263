//! KDL parsing helper functions.
//!
//! Common utilities for extracting values from KDL nodes.

/// Convert a byte offset to line and column numbers (1-indexed)
pub fn offset_to_line_col(content: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in content.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// Helper to get a string entry from a KDL node
pub fn get_string_entry(node: &kdl::KdlNode, name: &str) -> Option<String> {
    node.children()
        .and_then(|children| children.get(name))
        .and_then(|n| n.entries().first())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Helper to get an integer entry from a KDL node
pub fn get_int_entry(node: &kdl::KdlNode, name: &str) -> Option<i128> {
    node.children()
        .and_then(|children| children.get(name))
        .and_then(|n| n.entries().first())
        .and_then(|e| e.value().as_integer())
}

/// Helper to get a non-negative integer entry that fits the target type.
///
/// Returns an error naming the field when the value is negative or too large.
pub fn get_uint_entry<T>(node: &kdl::KdlNode, name: &str) -> anyhow::Result<Option<T>>
where
    T: TryFrom<i128>,
{
    match get_int_entry(node, name) {
        Some(value) => T::try_from(value).map(Some).map_err(|_| {
            anyhow::anyhow!(
                "Value {} for '{}' in '{}' block is out of range",
                value,
                name,
                node.name().value()
            )
        }),
        None => Ok(None),
    }
}

/// Names of all child nodes of a KDL node
pub fn child_names(node: &kdl::KdlNode) -> Vec<&str> {
    node.children()
        .map(|children| children.nodes().iter().map(|n| n.name().value()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_to_line_col() {
        let content = "a\nbc\ndef";
        assert_eq!(offset_to_line_col(content, 0), (1, 1));
        assert_eq!(offset_to_line_col(content, 3), (2, 2));
        assert_eq!(offset_to_line_col(content, 5), (3, 1));
    }
}
