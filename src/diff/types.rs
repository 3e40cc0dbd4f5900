use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step of a [`Diff`]. Serializes as `{op, path, oldValue?, newValue?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DiffOperation {
    #[serde(rename_all = "camelCase")]
    Add { path: String, new_value: Value },
    #[serde(rename_all = "camelCase")]
    Remove { path: String, old_value: Value },
    #[serde(rename_all = "camelCase")]
    Replace {
        path: String,
        old_value: Value,
        new_value: Value,
    },
}

impl DiffOperation {
    pub fn path(&self) -> &str {
        match self {
            DiffOperation::Add { path, .. }
            | DiffOperation::Remove { path, .. }
            | DiffOperation::Replace { path, .. } => path,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DiffOperation::Add { .. } => "add",
            DiffOperation::Remove { .. } => "remove",
            DiffOperation::Replace { .. } => "replace",
        }
    }
}

/// Ordered operations turning one snapshot's state into another's.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub operations: Vec<DiffOperation>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(DiffOperation::path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_wire_shape() {
        let add = DiffOperation::Add {
            path: "state.a".into(),
            new_value: json!(null),
        };
        assert_eq!(
            serde_json::to_value(&add).unwrap(),
            json!({"op": "add", "path": "state.a", "newValue": null})
        );

        let replace: DiffOperation = serde_json::from_value(json!({
            "op": "replace", "path": "state.b", "oldValue": 1, "newValue": 2
        }))
        .unwrap();
        assert_eq!(replace.kind(), "replace");
        assert_eq!(replace.path(), "state.b");

        let remove = DiffOperation::Remove {
            path: "state.c".into(),
            old_value: json!([1]),
        };
        let json = serde_json::to_value(&remove).unwrap();
        assert!(json.get("newValue").is_none());
        assert_eq!(json["oldValue"], json!([1]));
    }
}
