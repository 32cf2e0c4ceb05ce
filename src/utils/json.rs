use serde_json::{Map, Value};

/// A PATCH field that can be left out, cleared with `null`, or set.
#[derive(Debug, PartialEq)]
pub enum Nullable<T> {
    Omitted,
    Null,
    Value(T),
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<Nullable<String>, String> {
    match optional_value {
        None => Ok(Nullable::Omitted),
        Some(Value::Null) => Ok(Nullable::Null),
        Some(Value::String(s)) => Ok(Nullable::Value(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

pub fn classify_nullable_object(
    optional_value: Option<&Value>,
) -> Result<Nullable<Map<String, Value>>, String> {
    match optional_value {
        None => Ok(Nullable::Omitted),
        Some(Value::Null) => Ok(Nullable::Null),
        Some(Value::Object(map)) => Ok(Nullable::Value(map.to_owned())),
        Some(other) => Err(format!("expected object or null, got {other}")),
    }
}

pub fn classify_bool(optional_value: Option<&Value>) -> Result<Option<bool>, String> {
    match optional_value {
        None => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(*flag)),
        Some(other) => Err(format!("expected boolean, got {other}")),
    }
}

/// Trims a string field, turning a blank value into `None`.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strings_distinguish_missing_from_null() {
        let body = json!({ "niche": null, "website": "https://shop.test" });
        assert_eq!(classify_nullable(body.get("description")), Ok(Nullable::Omitted));
        assert_eq!(classify_nullable(body.get("niche")), Ok(Nullable::Null));
        assert_eq!(
            classify_nullable(body.get("website")),
            Ok(Nullable::Value("https://shop.test".to_string()))
        );
        assert!(classify_nullable(Some(&json!(3))).is_err());
    }

    #[test]
    fn objects_reject_other_json_types() {
        let body = json!({ "integrations": { "shopify": true } });
        match classify_nullable_object(body.get("integrations")) {
            Ok(Nullable::Value(map)) => assert_eq!(map["shopify"], json!(true)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(classify_nullable_object(Some(&json!(["a"]))).is_err());
        assert!(classify_nullable_object(Some(&json!("x"))).is_err());
    }

    #[test]
    fn booleans_must_be_booleans() {
        assert_eq!(classify_bool(None), Ok(None));
        assert_eq!(classify_bool(Some(&json!(false))), Ok(Some(false)));
        assert!(classify_bool(Some(&json!("yes"))).is_err());
    }

    #[test]
    fn blank_strings_become_none() {
        assert_eq!(non_blank(Some("  ".into())), None);
        assert_eq!(non_blank(Some(" shop ".into())), Some("shop".into()));
        assert_eq!(non_blank(None), None);
    }
}
