use std::cmp::Ordering;
use std::collections::HashSet;

/// A materialized path is the slash-joined chain of ancestor ids ending in
/// the comment's own id, e.g. `"3/7/12"`. Segments are decimal digit
/// strings; anything else is rejected.
pub fn is_valid_path(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    path.split('/')
        .all(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
}

/// Path of a comment with the given id under an optional parent path.
pub fn child_path(parent_path: Option<&str>, id: i64) -> String {
    match parent_path {
        Some(parent) => format!("{parent}/{id}"),
        None => id.to_string(),
    }
}

/// Depth = number of path segments (a root comment has depth 1).
pub fn depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split('/').count()
    }
}

/// Originating root comment id, parsed from the first segment.
pub fn root_id(path: &str) -> Option<i64> {
    path.split('/').next()?.parse().ok()
}

/// Ids of all ancestors (every segment but the last), as a membership set.
pub fn ancestor_ids(path: &str) -> HashSet<i64> {
    let segments: Vec<&str> = path.split('/').collect();
    segments
        .iter()
        .take(segments.len().saturating_sub(1))
        .filter_map(|segment| segment.parse().ok())
        .collect()
}

/// Segment-wise numeric path ordering: parents sort before their children,
/// siblings sort by id. Ids are assigned monotonically, so this equates to
/// creation order at each level. Lexicographic comparison would put "10"
/// before "9"; comparing parsed segments does not.
pub fn compare_paths(left: &str, right: &str) -> Ordering {
    let mut lhs = left.split('/');
    let mut rhs = right.split('/');
    loop {
        match (lhs.next(), rhs.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => {
                let a: i64 = a.parse().unwrap_or(i64::MAX);
                let b: i64 = b.parse().unwrap_or(i64::MAX);
                match a.cmp(&b) {
                    Ordering::Equal => continue,
                    unequal => return unequal,
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{ancestor_ids, child_path, compare_paths, depth, is_valid_path, root_id};

    #[test]
    fn is_valid_path_accepts_digit_chains() {
        assert!(is_valid_path("3"));
        assert!(is_valid_path("3/7/12"));
    }

    #[test]
    fn is_valid_path_rejects_malformed_strings() {
        assert!(!is_valid_path(""));
        assert!(!is_valid_path("3/"));
        assert!(!is_valid_path("/3"));
        assert!(!is_valid_path("3//7"));
        assert!(!is_valid_path("3/a/12"));
        assert!(!is_valid_path("-3/7"));
    }

    #[test]
    fn child_path_appends_to_parent_or_starts_a_root() {
        assert_eq!(child_path(None, 3), "3");
        assert_eq!(child_path(Some("3/7"), 12), "3/7/12");
    }

    #[test]
    fn depth_counts_segments() {
        assert_eq!(depth("3"), 1);
        assert_eq!(depth("3/7/12"), 3);
    }

    #[test]
    fn root_id_parses_first_segment() {
        assert_eq!(root_id("3/7/12"), Some(3));
        assert_eq!(root_id("42"), Some(42));
    }

    #[test]
    fn ancestor_ids_excludes_self() {
        let ancestors = ancestor_ids("3/7/12");
        assert!(ancestors.contains(&3));
        assert!(ancestors.contains(&7));
        assert!(!ancestors.contains(&12));
        assert!(ancestor_ids("3").is_empty());
    }

    #[test]
    fn compare_paths_orders_numerically_per_segment() {
        assert_eq!(compare_paths("9", "10"), Ordering::Less);
        assert_eq!(compare_paths("3/9", "3/10"), Ordering::Less);
        assert_eq!(compare_paths("3", "3/7"), Ordering::Less);
        assert_eq!(compare_paths("3/7", "3/7"), Ordering::Equal);
        assert_eq!(compare_paths("4", "3/7"), Ordering::Greater);
    }
}
