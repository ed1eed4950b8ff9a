//! Path-addressed, in-place edits of a mock body.
//!
//! Paths use the editor notation `Items[0].Name`: dot-separated keys, each
//! optionally followed by one or more `[index]` suffixes.

use std::fmt;

use serde_json::{Map, Value};

use crate::CoreError;
use crate::mock::STATUS_ERROR_FIELDS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldPath(Vec<Segment>);

impl FieldPath {
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let invalid = || CoreError::PathNotFound(text.to_string());
        let mut segments = Vec::new();

        for part in text.split('.') {
            let (name, mut rest) = match part.find('[') {
                Some(open) => part.split_at(open),
                None => (part, ""),
            };
            if name.is_empty() && (rest.is_empty() || !segments.is_empty()) {
                return Err(invalid());
            }
            if !name.is_empty() {
                segments.push(Segment::Key(name.to_string()));
            }
            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(invalid)?;
                let index = rest
                    .get(1..close)
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(invalid)?;
                segments.push(Segment::Index(index));
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(invalid());
                }
            }
        }

        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Key of the addressed field, if the path ends in a key.
    pub fn last_key(&self) -> Option<&str> {
        match self.0.last() {
            Some(Segment::Key(key)) => Some(key),
            _ => None,
        }
    }

    fn child(&self, segment: Segment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    /// Same path with every index replaced by 0, for looking up the
    /// template shape of an element.
    fn first_elements(&self) -> Self {
        Self(
            self.0
                .iter()
                .map(|s| match s {
                    Segment::Index(_) => Segment::Index(0),
                    key => key.clone(),
                })
                .collect(),
        )
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => write!(f, "{key}")?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

pub fn get<'a>(root: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.0.iter().try_fold(root, |node, segment| match segment {
        Segment::Key(key) => node.get(key.as_str()),
        Segment::Index(index) => node.get(*index),
    })
}

fn get_mut<'a>(root: &'a mut Value, segments: &[Segment]) -> Option<&'a mut Value> {
    segments.iter().try_fold(root, |node, segment| match segment {
        Segment::Key(key) => node.get_mut(key.as_str()),
        Segment::Index(index) => node.get_mut(*index),
    })
}

/// Every editable scalar in document order.
pub fn leaf_fields(root: &Value) -> Vec<(FieldPath, &Value)> {
    fn walk<'a>(node: &'a Value, path: FieldPath, out: &mut Vec<(FieldPath, &'a Value)>) {
        match node {
            Value::Object(map) => {
                for (key, child) in map {
                    walk(child, path.child(Segment::Key(key.clone())), out);
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    walk(child, path.child(Segment::Index(index)), out);
                }
            }
            scalar => out.push((path, scalar)),
        }
    }

    let mut out = Vec::new();
    walk(root, FieldPath::default(), &mut out);
    out
}

/// Interpret raw editor text in light of the value it replaces.
pub fn coerce_input(path: &FieldPath, raw: &str, current: &Value) -> Value {
    if path
        .last_key()
        .is_some_and(|key| STATUS_ERROR_FIELDS.contains(&key))
    {
        return Value::from(0);
    }

    if current.is_boolean() {
        return Value::Bool(matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "on" | "yes"
        ));
    }

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::String(raw.to_string());
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => Value::from(n),
        _ => Value::String(raw.to_string()),
    }
}

/// Replace (or insert, for object keys) the value at `path`.
pub fn set_field(root: &mut Value, path: &FieldPath, value: Value) -> Result<(), CoreError> {
    let not_found = || CoreError::PathNotFound(path.to_string());
    let (last, parent) = path.0.split_last().ok_or_else(not_found)?;
    let parent = get_mut(root, parent).ok_or_else(not_found)?;

    match (last, parent) {
        (Segment::Key(key), Value::Object(map)) => {
            map.insert(key.clone(), value);
            Ok(())
        }
        (Segment::Index(index), Value::Array(items)) if *index < items.len() => {
            items[*index] = value;
            Ok(())
        }
        _ => Err(not_found()),
    }
}

/// Append an element to the array at `path`: a copy of its first element,
/// else the first element of the same array in `structure`, else `{}`.
pub fn push_array_item(
    root: &mut Value,
    path: &FieldPath,
    structure: Option<&Value>,
) -> Result<(), CoreError> {
    let items = get_mut(root, &path.0)
        .and_then(Value::as_array_mut)
        .ok_or_else(|| CoreError::PathNotFound(path.to_string()))?;

    let item = items.first().cloned().unwrap_or_else(|| {
        structure
            .and_then(|s| get(s, &path.first_elements().child(Segment::Index(0))))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    });
    items.push(item);
    Ok(())
}

pub fn remove_array_item(root: &mut Value, path: &FieldPath, index: usize) -> Result<(), CoreError> {
    let items = get_mut(root, &path.0)
        .and_then(Value::as_array_mut)
        .ok_or_else(|| CoreError::PathNotFound(path.to_string()))?;

    if index >= items.len() {
        return Err(CoreError::PathNotFound(format!("{path}[{index}]")));
    }
    items.remove(index);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn parse_and_display() {
        let p = path("Data.Items[2][0].Name");
        assert_eq!(
            p.segments(),
            [
                Segment::Key("Data".into()),
                Segment::Key("Items".into()),
                Segment::Index(2),
                Segment::Index(0),
                Segment::Key("Name".into()),
            ]
        );
        assert_eq!(p.to_string(), "Data.Items[2][0].Name");
        assert_eq!(path("[1].x").to_string(), "[1].x");
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "a..b", "a[x]", "a[1", "a[1]b", "a.[0]"] {
            assert!(FieldPath::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn set_nested_field() {
        let mut body = json!({"Data": {"Items": [{"Name": "a"}, {"Name": "b"}]}});
        set_field(&mut body, &path("Data.Items[1].Name"), json!("z")).unwrap();
        assert_eq!(body["Data"]["Items"][1]["Name"], "z");

        let err = set_field(&mut body, &path("Data.Items[5].Name"), json!(1));
        assert!(matches!(err, Err(CoreError::PathNotFound(_))));
    }

    #[test]
    fn coerce_follows_current_type() {
        let p = path("Count");
        assert_eq!(coerce_input(&p, "12", &json!(0)), json!(12));
        assert_eq!(coerce_input(&p, "1.5", &json!(0)), json!(1.5));
        assert_eq!(coerce_input(&p, "abc", &json!(0)), json!("abc"));
        assert_eq!(coerce_input(&p, "", &json!(3)), json!(""));
        assert_eq!(coerce_input(&p, "true", &json!(false)), json!(true));
        assert_eq!(coerce_input(&p, "no", &json!(true)), json!(false));
        assert_eq!(coerce_input(&path("ResponseStatus.ErrorCode"), "77", &json!(0)), json!(0));
    }

    #[test]
    fn push_clones_first_item() {
        let mut body = json!({"Items": [{"Id": 1}]});
        push_array_item(&mut body, &path("Items"), None).unwrap();
        assert_eq!(body["Items"], json!([{"Id": 1}, {"Id": 1}]));
    }

    #[test]
    fn push_into_empty_array_uses_structure() {
        let structure = json!({"Groups": [{"Members": [{"Name": "x", "Age": 1}]}]});
        let mut body = json!({"Groups": [{"Members": []}, {"Members": []}]});
        push_array_item(&mut body, &path("Groups[1].Members"), Some(&structure)).unwrap();
        assert_eq!(body["Groups"][1]["Members"], json!([{"Name": "x", "Age": 1}]));

        let mut body = json!({"Tags": []});
        push_array_item(&mut body, &path("Tags"), Some(&json!({}))).unwrap();
        assert_eq!(body["Tags"], json!([{}]));
    }

    #[test]
    fn remove_checks_bounds() {
        let mut body = json!({"Items": [1, 2, 3]});
        remove_array_item(&mut body, &path("Items"), 1).unwrap();
        assert_eq!(body["Items"], json!([1, 3]));
        assert!(remove_array_item(&mut body, &path("Items"), 2).is_err());
        assert!(remove_array_item(&mut body, &path("Missing"), 0).is_err());
    }

    #[test]
    fn leaf_fields_in_document_order() {
        let body = json!({"b": 1, "a": {"c": [true, null]}});
        let leaves: Vec<String> = leaf_fields(&body)
            .into_iter()
            .map(|(p, v)| format!("{p}={v}"))
            .collect();
        assert_eq!(leaves, ["b=1", "a.c[0]=true", "a.c[1]=null"]);
    }
}
