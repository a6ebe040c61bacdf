//! Composition of peer answers into one addressable response tree.

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::LookupError;
use crate::query_planner::{Selection, SelectionKind};
use crate::schema_builder::ScalarType;

/// Outcome of a path lookup. Exactly one of the two is set.
#[derive(Debug, PartialEq)]
pub struct PathResult<'a> {
    pub result: Option<&'a Value>,
    pub error: Option<LookupError>,
}

impl<'a> PathResult<'a> {
    pub fn is_found(&self) -> bool {
        self.error.is_none()
    }
}

/// Walks `value` key by key. Only mappings can be descended into.
pub fn lookup<'a, S: AsRef<str>>(value: &'a Value, path: &[S]) -> PathResult<'a> {
    let mut current = value;
    for (depth, segment) in path.iter().enumerate() {
        let segment = segment.as_ref();
        match current.as_object().and_then(|map| map.get(segment)) {
            Some(next) => current = next,
            None => {
                return PathResult {
                    result: None,
                    error: Some(LookupError::NotFound {
                        segment: segment.to_string(),
                        depth,
                    }),
                };
            }
        }
    }
    PathResult {
        result: Some(current),
        error: None,
    }
}

/// A field-level failure attached to a partial response.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldError {
    pub message: String,
    pub path: Vec<String>,
    pub peer: String,
}

/// The composed answer to one federated query.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResponseTree {
    data: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<FieldError>,
}

impl ResponseTree {
    pub fn new() -> Self {
        ResponseTree {
            data: Value::Object(Map::new()),
            errors: Vec::new(),
        }
    }

    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> PathResult<'_> {
        lookup(&self.data, path)
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn push_error(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// Writes `value` at `path`, creating intermediate mappings. A non-mapping
    /// node in the way is replaced.
    pub fn insert<S: AsRef<str>>(&mut self, path: &[S], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            self.data = value;
            return;
        };

        let mut current = &mut self.data;
        for segment in parents {
            let Some(map) = ensure_object(current) else { return };
            current = map
                .entry(segment.as_ref().to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        if let Some(map) = ensure_object(current) {
            map.insert(last.as_ref().to_string(), value);
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn ensure_object(value: &mut Value) -> Option<&mut Map<String, Value>> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    value.as_object_mut()
}

/// Projects a peer answer onto the requested selection.
pub fn complete_selections(value: &Value, selections: &[Selection]) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| complete_selections(item, selections))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::new();
            for selection in selections {
                let key = selection.response_key();
                let child = map.get(key).unwrap_or(&Value::Null);
                out.insert(key.to_string(), complete_selection(child, &selection.kind));
            }
            Value::Object(out)
        }
        _ => Value::Null,
    }
}

fn complete_selection(value: &Value, kind: &SelectionKind) -> Value {
    match kind {
        SelectionKind::Leaf { scalar, .. } => complete_leaf(value, *scalar),
        SelectionKind::Object(children) => complete_selections(value, children),
        SelectionKind::Fragments(fragments) => complete_fragments(value, fragments),
    }
}

fn complete_leaf(value: &Value, scalar: ScalarType) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| complete_leaf(v, scalar)).collect()),
        Value::Null => Value::Null,
        _ => match scalar {
            ScalarType::Float => coerce_json_number(value)
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ScalarType::Int => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => value.clone(),
                Value::Number(n) => n
                    .as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| Value::from(f as i64))
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            },
            ScalarType::String | ScalarType::Boolean => value.clone(),
        },
    }
}

/// Reference values carry no type tag, so each item keeps whichever
/// fragment fields it actually has.
fn complete_fragments(value: &Value, fragments: &[(String, Vec<Selection>)]) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| complete_fragments(item, fragments))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::new();
            for (_, selections) in fragments {
                for selection in selections {
                    let key = selection.response_key();
                    if let Some(child) = map.get(key) {
                        out.insert(key.to_string(), complete_selection(child, &selection.kind));
                    }
                }
            }
            Value::Object(out)
        }
        _ => Value::Null,
    }
}

/// Accepts integers, floats and numeric strings.
pub fn coerce_json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn leaf(name: &str, scalar: ScalarType) -> Selection {
        Selection {
            name: name.to_string(),
            alias: None,
            kind: SelectionKind::Leaf { scalar, list: false },
        }
    }

    #[test]
    fn json_number_coercion() {
        for input in [json!(10), json!(10.0), json!("10"), json!(10u64)] {
            assert_eq!(coerce_json_number(&input), Some(10.0), "{}", input);
        }
        assert_eq!(coerce_json_number(&json!("ten")), None);
        assert_eq!(coerce_json_number(&json!(true)), None);
    }

    #[test]
    fn get_walks_nested_mappings() {
        let mut tree = ResponseTree::new();
        tree.insert(&["Aggregate", "PeerA", "Things", "Car"], json!([{"horsepower": {"mean": 1.0}}]));

        assert_eq!(
            tree.get(&["Aggregate", "PeerA", "Things", "Car"]).result,
            Some(&json!([{"horsepower": {"mean": 1.0}}]))
        );
        assert_eq!(tree.get(&["Aggregate", "PeerA"]).result, Some(&json!({"Things": {"Car": [{"horsepower": {"mean": 1.0}}]}})));
        assert_eq!(tree.get::<&str>(&[]).result, Some(tree.data()));
    }

    #[test]
    fn get_reports_missing_keys_and_non_mapping_nodes() {
        let mut tree = ResponseTree::new();
        tree.insert(&["Get", "PeerA", "Things", "Car"], json!([{"name": "a"}]));

        let missing = tree.get(&["Get", "PeerB"]);
        assert_eq!(missing.result, None);
        assert_eq!(
            missing.error,
            Some(LookupError::NotFound {
                segment: "PeerB".to_string(),
                depth: 1
            })
        );

        // sequences are not addressable by key
        let through_list = tree.get(&["Get", "PeerA", "Things", "Car", "name"]);
        assert!(!through_list.is_found());
        assert_eq!(through_list.result, None);
    }

    #[test]
    fn null_at_a_path_is_found() {
        let mut tree = ResponseTree::new();
        tree.insert(&["Get", "PeerA"], Value::Null);
        let result = tree.get(&["Get", "PeerA"]);
        assert!(result.is_found());
        assert_eq!(result.result, Some(&Value::Null));
    }

    #[test]
    fn completion_projects_aliases_and_coerces_floats() {
        let selections = vec![
            Selection {
                name: "horsepower".to_string(),
                alias: None,
                kind: SelectionKind::Object(vec![
                    leaf("mean", ScalarType::Float),
                    leaf("count", ScalarType::Int),
                ]),
            },
            Selection {
                name: "name".to_string(),
                alias: Some("label".to_string()),
                kind: SelectionKind::Leaf { scalar: ScalarType::String, list: false },
            },
        ];
        let peer_answer = json!([
            {"horsepower": {"mean": 200, "count": 3, "sum": 600}, "label": "x", "extra": 1},
            {"horsepower": {"mean": "150.5"}}
        ]);

        let completed = complete_selections(&peer_answer, &selections);

        assert_eq!(
            completed,
            json!([
                {"horsepower": {"mean": 200.0, "count": 3}, "label": "x"},
                {"horsepower": {"mean": 150.5, "count": null}, "label": null}
            ])
        );
    }

    #[test]
    fn serializes_partial_response_shape() {
        let mut tree = ResponseTree::new();
        tree.insert(&["Get", "PeerA"], Value::Null);
        tree.push_error(FieldError {
            message: "peer PeerA timed out".to_string(),
            path: vec!["Get".to_string(), "PeerA".to_string()],
            peer: "PeerA".to_string(),
        });

        assert_eq!(
            tree.into_value(),
            json!({
                "data": {"Get": {"PeerA": null}},
                "errors": [{"message": "peer PeerA timed out", "path": ["Get", "PeerA"], "peer": "PeerA"}]
            })
        );
    }
}
