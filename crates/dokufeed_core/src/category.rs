/// Flattens a hierarchical page path into a single category string: strip
/// the prefix when set and matching, turn underscores into spaces, then
/// rejoin the delimiter-separated pieces with underscores.
///
/// `category("foo:category_name:page", ":", "foo:")` is
/// `"category name_page"`.
pub fn category(path: &str, delimiter: &str, prefix: &str) -> String {
    let stripped = if !prefix.is_empty() {
        path.strip_prefix(prefix).unwrap_or(path)
    } else {
        path
    };
    let spaced = stripped.replace('_', " ");
    spaced
        .split(delimiter)
        .collect::<Vec<&str>>()
        .join("_")
}
