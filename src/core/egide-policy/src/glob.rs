//! Dotted-segment glob matching for secret paths.
//!
//! `*` matches exactly one segment, `**` matches zero or more segments,
//! anything else matches literally. Matching is case-sensitive.

/// Returns whether `path` matches `pattern` under dotted-segment glob rules.
pub fn matches(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    let path_segments: Vec<&str> = path.split('.').collect();
    matches_segments(&pattern_segments, &path_segments)
}

fn matches_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(&"**") => {
            // Zero-or-more: try consuming 0, 1, 2, ... path segments.
            for skip in 0..=path.len() {
                if matches_segments(&pattern[1..], &path[skip..]) {
                    return true;
                }
            }
            false
        }
        Some(&"*") => !path.is_empty() && matches_segments(&pattern[1..], &path[1..]),
        Some(seg) => {
            !path.is_empty() && path[0] == *seg && matches_segments(&pattern[1..], &path[1..])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match() {
        assert!(matches("prod.db.password", "prod.db.password"));
        assert!(!matches("prod.db.password", "prod.db.username"));
    }

    #[test]
    fn single_star_matches_one_segment() {
        assert!(matches("prod.*.password", "prod.db.password"));
        assert!(!matches("prod.*.password", "prod.db.replica.password"));
        assert!(!matches("prod.*.password", "prod.password"));
    }

    #[test]
    fn double_star_matches_zero_or_more_segments() {
        assert!(matches("prod.**", "prod.db.password"));
        assert!(matches("prod.**", "prod"));
        assert!(matches("**.password", "prod.db.password"));
        assert!(matches("**", "anything.at.all"));
        assert!(matches("**", ""));
    }

    #[test]
    fn mixed_pattern() {
        assert!(matches("prod.**.password", "prod.db.replica.password"));
        assert!(matches("prod.**.password", "prod.password"));
        assert!(!matches("prod.**.password", "prod.db.username"));
    }
}
