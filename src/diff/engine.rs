//! Structural diff and patch over snapshot state.
//!
//! Only mappings are recursed into. Sequences and scalars are compared as whole
//! values, so a changed sequence always yields a single `replace` carrying both
//! complete sequences.

use serde_json::{Map, Value};

use crate::error::{DiffError, DiffResult};
use crate::trace::types::{RequestTrace, SnapshotToken};

use super::path::{child_path, parse_path, ROOT};
use super::types::{Diff, DiffOperation};

/// Compute the operations that turn `from.state` into `to.state`.
pub fn compute_diff(from: &SnapshotToken, to: &SnapshotToken) -> Diff {
    diff_states(&from.state, &to.state)
}

/// Same as [`compute_diff`] over bare state maps.
///
/// Keys are visited in `from`'s iteration order, followed by keys only present
/// in `to`, so equal inputs always produce identical output.
pub fn diff_states(from: &Map<String, Value>, to: &Map<String, Value>) -> Diff {
    let mut operations = Vec::new();
    diff_maps(ROOT, from, to, &mut operations);
    Diff { operations }
}

fn diff_maps(
    path: &str,
    from: &Map<String, Value>,
    to: &Map<String, Value>,
    ops: &mut Vec<DiffOperation>,
) {
    for (key, old) in from {
        let key_path = child_path(path, key);
        match to.get(key) {
            Some(new) => diff_values(key_path, old, new, ops),
            None => ops.push(DiffOperation::Remove {
                path: key_path,
                old_value: old.clone(),
            }),
        }
    }
    for (key, new) in to {
        if !from.contains_key(key) {
            ops.push(DiffOperation::Add {
                path: child_path(path, key),
                new_value: new.clone(),
            });
        }
    }
}

fn diff_values(path: String, old: &Value, new: &Value, ops: &mut Vec<DiffOperation>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => diff_maps(&path, a, b, ops),
        _ => ops.push(DiffOperation::Replace {
            path,
            old_value: old.clone(),
            new_value: new.clone(),
        }),
    }
}

/// Apply `diff` to a copy of `snapshot`. The input is never mutated.
///
/// `add` and `replace` create missing intermediate mappings; `remove` of an
/// absent path is a no-op.
pub fn apply_diff(snapshot: &SnapshotToken, diff: &Diff) -> DiffResult<SnapshotToken> {
    let mut patched = snapshot.clone();
    for op in &diff.operations {
        apply_operation(&mut patched.state, op)?;
    }
    Ok(patched)
}

fn apply_operation(state: &mut Map<String, Value>, op: &DiffOperation) -> DiffResult<()> {
    let path = op.path();
    let mut segments = parse_path(path)?;
    let Some(last) = segments.pop() else {
        return apply_to_root(state, op);
    };

    match op {
        DiffOperation::Add { new_value, .. } | DiffOperation::Replace { new_value, .. } => {
            let parent = descend(state, &segments, true, path)?;
            if let Some(parent) = parent {
                parent.insert(last, new_value.clone());
            }
        }
        DiffOperation::Remove { .. } => {
            if let Some(parent) = descend(state, &segments, false, path)? {
                parent.remove(&last);
            }
        }
    }
    Ok(())
}

fn apply_to_root(state: &mut Map<String, Value>, op: &DiffOperation) -> DiffResult<()> {
    match op {
        DiffOperation::Add { new_value, .. } | DiffOperation::Replace { new_value, .. } => {
            match new_value {
                Value::Object(map) => {
                    *state = map.clone();
                    Ok(())
                }
                _ => Err(DiffError::InvalidRootValue(op.path().to_string())),
            }
        }
        DiffOperation::Remove { .. } => {
            state.clear();
            Ok(())
        }
    }
}

/// Walk to the mapping that holds the final segment.
///
/// With `create`, absent levels are inserted as empty mappings; without it an
/// absent level yields `Ok(None)`.
fn descend<'a>(
    state: &'a mut Map<String, Value>,
    segments: &[String],
    create: bool,
    path: &str,
) -> DiffResult<Option<&'a mut Map<String, Value>>> {
    let mut current = state;
    for (depth, key) in segments.iter().enumerate() {
        let next = if create {
            current
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new()))
        } else {
            match current.get_mut(key) {
                Some(value) => value,
                None => return Ok(None),
            }
        };
        current = match next {
            Value::Object(map) => map,
            _ => {
                let at = segments[..=depth]
                    .iter()
                    .fold(ROOT.to_string(), |acc, k| child_path(&acc, k));
                return Err(DiffError::NotAMapping {
                    path: path.to_string(),
                    at,
                });
            }
        };
    }
    Ok(Some(current))
}

/// Diff the snapshots captured at two named stages of one trace.
///
/// `None` if either stage is missing or has no snapshot.
pub fn diff_stages(trace: &RequestTrace, from_stage: &str, to_stage: &str) -> Option<Diff> {
    let from = trace.snapshot_for_stage(from_stage)?;
    let to = trace.snapshot_for_stage(to_stage)?;
    Some(compute_diff(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap(state: Value) -> SnapshotToken {
        match state {
            Value::Object(map) => SnapshotToken::from_state(map),
            other => panic!("expected object state, got {:?}", other),
        }
    }

    fn round_trip(a: &SnapshotToken, b: &SnapshotToken) {
        let diff = compute_diff(a, b);
        let patched = apply_diff(a, &diff).unwrap();
        assert_eq!(patched.state, b.state, "diff was {:?}", diff);
    }

    #[test]
    fn test_identical_states_produce_empty_diff() {
        let a = snap(json!({"user": {"id": 1, "tags": ["x"]}, "n": 3}));
        assert!(compute_diff(&a, &a).is_empty());
        assert!(compute_diff(&a, &a.clone()).is_empty());
    }

    #[test]
    fn test_add_remove_replace() {
        let a = snap(json!({"keep": 1, "gone": "x", "user": {"age": 30}}));
        let b = snap(json!({"keep": 1, "user": {"age": 31}, "fresh": true}));
        let diff = compute_diff(&a, &b);

        assert_eq!(
            diff.operations,
            vec![
                DiffOperation::Remove {
                    path: "state.gone".into(),
                    old_value: json!("x"),
                },
                DiffOperation::Replace {
                    path: "state.user.age".into(),
                    old_value: json!(30),
                    new_value: json!(31),
                },
                DiffOperation::Add {
                    path: "state.fresh".into(),
                    new_value: json!(true),
                },
            ]
        );
        round_trip(&a, &b);
    }

    #[test]
    fn test_sequence_change_is_single_replace() {
        let a = snap(json!({"items": [1, 2, 3], "nested": {"list": ["a"]}}));
        let b = snap(json!({"items": [1, 2, 4, 5], "nested": {"list": []}}));
        let diff = compute_diff(&a, &b);
        assert_eq!(diff.len(), 2);
        assert_eq!(
            diff.operations[0],
            DiffOperation::Replace {
                path: "state.items".into(),
                old_value: json!([1, 2, 3]),
                new_value: json!([1, 2, 4, 5]),
            }
        );
        assert_eq!(diff.operations[1].path(), "state.nested.list");
        round_trip(&a, &b);
    }

    #[test]
    fn test_type_change_between_mapping_and_scalar() {
        let a = snap(json!({"cfg": {"a": 1}, "v": "text"}));
        let b = snap(json!({"cfg": 5, "v": {"wrapped": "text"}}));
        let diff = compute_diff(&a, &b);
        assert_eq!(diff.len(), 2);
        assert!(diff
            .operations
            .iter()
            .all(|op| matches!(op, DiffOperation::Replace { .. })));
        round_trip(&a, &b);
    }

    #[test]
    fn test_null_is_distinct_from_absent() {
        let a = snap(json!({}));
        let b = snap(json!({"x": null}));
        let diff = compute_diff(&a, &b);
        assert_eq!(
            diff.operations,
            vec![DiffOperation::Add {
                path: "state.x".into(),
                new_value: Value::Null
            }]
        );
        round_trip(&a, &b);
        round_trip(&b, &a);
    }

    #[test]
    fn test_nested_add_into_new_branch() {
        let a = snap(json!({"user": {}}));
        let b = snap(json!({"user": {"profile": {"name": "ada"}}}));
        round_trip(&a, &b);
    }

    #[test]
    fn test_keys_with_dots_round_trip() {
        let a = snap(json!({"a.b": 1, "a": {"b": 2}}));
        let b = snap(json!({"a.b": 10, "a": {"b": 20}}));
        let diff = compute_diff(&a, &b);
        let paths: Vec<_> = diff.paths().collect();
        assert!(paths.contains(&"state.a\\.b"));
        assert!(paths.contains(&"state.a.b"));
        round_trip(&a, &b);
    }

    #[test]
    fn test_apply_does_not_mutate_input() {
        let a = snap(json!({"user": {"age": 30}}));
        let b = snap(json!({"user": {"age": 31}}));
        let original = a.clone();
        let _ = apply_diff(&a, &compute_diff(&a, &b)).unwrap();
        assert_eq!(a, original);
    }

    #[test]
    fn test_apply_empty_diff_is_identity() {
        let a = snap(json!({"x": [1, {"y": 2}]}));
        assert_eq!(apply_diff(&a, &Diff::default()).unwrap(), a);
    }

    #[test]
    fn test_apply_creates_intermediate_levels() {
        let a = snap(json!({}));
        let diff = Diff {
            operations: vec![DiffOperation::Add {
                path: "state.a.b.c".into(),
                new_value: json!(1),
            }],
        };
        let patched = apply_diff(&a, &diff).unwrap();
        assert_eq!(Value::Object(patched.state), json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn test_apply_remove_of_missing_path_is_noop() {
        let a = snap(json!({"x": 1}));
        let diff = Diff {
            operations: vec![DiffOperation::Remove {
                path: "state.missing.deep".into(),
                old_value: json!(0),
            }],
        };
        assert_eq!(apply_diff(&a, &diff).unwrap().state, a.state);
    }

    #[test]
    fn test_apply_rejects_invalid_paths() {
        let a = snap(json!({"x": 1}));
        let through_scalar = Diff {
            operations: vec![DiffOperation::Add {
                path: "state.x.y".into(),
                new_value: json!(2),
            }],
        };
        assert_eq!(
            apply_diff(&a, &through_scalar),
            Err(DiffError::NotAMapping {
                path: "state.x.y".into(),
                at: "state.x".into()
            })
        );

        let outside = Diff {
            operations: vec![DiffOperation::Add {
                path: "props.x".into(),
                new_value: json!(2),
            }],
        };
        assert!(matches!(
            apply_diff(&a, &outside),
            Err(DiffError::OutsideState(_))
        ));

        let scalar_root = Diff {
            operations: vec![DiffOperation::Replace {
                path: "state".into(),
                old_value: json!({}),
                new_value: json!(3),
            }],
        };
        assert!(matches!(
            apply_diff(&a, &scalar_root),
            Err(DiffError::InvalidRootValue(_))
        ));
    }

    #[test]
    fn test_diff_is_deterministic() {
        let a = snap(json!({"b": 1, "a": 2, "c": {"z": 1, "y": 2}}));
        let b = snap(json!({"a": 3, "d": 4, "c": {"y": 5}}));
        assert_eq!(compute_diff(&a, &b), compute_diff(&a, &b));
        round_trip(&a, &b);
        round_trip(&b, &a);
    }
}
