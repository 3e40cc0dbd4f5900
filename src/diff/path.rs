//! Dotted diff paths rooted at `state`.
//!
//! Keys containing `.` or `\` are escaped with a backslash so that every key,
//! including the empty one, survives a join/split round trip.

use crate::error::{DiffError, DiffResult};

pub const ROOT: &str = "state";

pub fn escape_segment(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for ch in key.chars() {
        if ch == '.' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

pub fn child_path(parent: &str, key: &str) -> String {
    format!("{}.{}", parent, escape_segment(key))
}

/// Split a path into its key segments below `state`.
pub fn parse_path(path: &str) -> DiffResult<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some(next) => current.push(next),
                None => return Err(DiffError::InvalidPath(path.to_string())),
            },
            '.' => segments.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    segments.push(current);

    if segments.first().map(String::as_str) != Some(ROOT) {
        return Err(DiffError::OutsideState(path.to_string()));
    }
    segments.remove(0);
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path() {
        assert_eq!(
            parse_path("state.user.age").unwrap(),
            vec!["user".to_string(), "age".to_string()]
        );
        assert!(parse_path("state").unwrap().is_empty());
    }

    #[test]
    fn test_escaped_keys_round_trip() {
        for key in ["a.b", "back\\slash", "", "plain"] {
            let path = child_path(ROOT, key);
            assert_eq!(parse_path(&path).unwrap(), vec![key.to_string()]);
        }
    }

    #[test]
    fn test_rejects_foreign_root_and_dangling_escape() {
        assert_eq!(
            parse_path("props.x"),
            Err(DiffError::OutsideState("props.x".into()))
        );
        assert!(matches!(parse_path("state.x\\"), Err(DiffError::InvalidPath(_))));
    }
}
