//! Property value converters for `ChangePropertyType`

use serde_json::{Number, Value};

/// Two-way conversion of one property value
///
/// `is_upgraded` lets the operation skip values that already have the new
/// shape, which keeps re-runs harmless. Null is left alone in both
/// directions by the built-in converters.
pub trait PropertyConverter: Send + Sync {
    fn name(&self) -> &str;

    fn is_upgraded(&self, value: &Value) -> bool;

    fn upgrade(&self, value: &Value) -> Result<Value, String>;

    fn downgrade(&self, value: &Value) -> Result<Value, String>;
}

/// Look up a built-in converter by its schema-file name
pub fn builtin(name: &str) -> Option<Box<dyn PropertyConverter>> {
    match name {
        "number_to_string" => Some(Box::new(NumberToString)),
        "string_to_number" => Some(Box::new(StringToNumber)),
        "scalar_to_list" => Some(Box::new(ScalarToList)),
        _ => None,
    }
}

/// Numbers become their decimal string form
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberToString;

impl PropertyConverter for NumberToString {
    fn name(&self) -> &str {
        "number_to_string"
    }

    fn is_upgraded(&self, value: &Value) -> bool {
        !value.is_number()
    }

    fn upgrade(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::Number(n) => Ok(Value::String(n.to_string())),
            other => Err(format!("expected a number, found {}", kind(other))),
        }
    }

    fn downgrade(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::String(s) => parse_number(s),
            Value::Null => Ok(Value::Null),
            other => Err(format!("expected a string, found {}", kind(other))),
        }
    }
}

/// Numeric strings become numbers
#[derive(Debug, Clone, Copy, Default)]
pub struct StringToNumber;

impl PropertyConverter for StringToNumber {
    fn name(&self) -> &str {
        "string_to_number"
    }

    fn is_upgraded(&self, value: &Value) -> bool {
        !value.is_string()
    }

    fn upgrade(&self, value: &Value) -> Result<Value, String> {
        NumberToString.downgrade(value)
    }

    fn downgrade(&self, value: &Value) -> Result<Value, String> {
        NumberToString.upgrade(value)
    }
}

/// A single value becomes a one-element list
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarToList;

impl PropertyConverter for ScalarToList {
    fn name(&self) -> &str {
        "scalar_to_list"
    }

    fn is_upgraded(&self, value: &Value) -> bool {
        value.is_array() || value.is_null()
    }

    fn upgrade(&self, value: &Value) -> Result<Value, String> {
        Ok(Value::Array(vec![value.clone()]))
    }

    fn downgrade(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::Array(items) if items.is_empty() => Ok(Value::Null),
            Value::Array(items) if items.len() == 1 => Ok(items[0].clone()),
            Value::Array(items) => Err(format!(
                "list of {} values cannot be narrowed to one",
                items.len()
            )),
            other => Ok(other.clone()),
        }
    }
}

fn parse_number(s: &str) -> Result<Value, String> {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(Value::Number(i.into()));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("'{}' is not a number", s))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_to_string_round_trip() {
        let up = NumberToString.upgrade(&json!(42)).unwrap();
        assert_eq!(up, json!("42"));
        assert!(NumberToString.is_upgraded(&up));
        assert_eq!(NumberToString.downgrade(&up).unwrap(), json!(42));

        let up = NumberToString.upgrade(&json!(2.5)).unwrap();
        assert_eq!(NumberToString.downgrade(&up).unwrap(), json!(2.5));
    }

    #[test]
    fn test_string_to_number_rejects_text() {
        let err = StringToNumber.upgrade(&json!("forty-two")).unwrap_err();
        assert!(err.contains("not a number"));
    }

    #[test]
    fn test_scalar_to_list() {
        assert_eq!(ScalarToList.upgrade(&json!("a")).unwrap(), json!(["a"]));
        assert_eq!(ScalarToList.downgrade(&json!(["a"])).unwrap(), json!("a"));
        assert!(ScalarToList.downgrade(&json!(["a", "b"])).is_err());
    }

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(builtin("scalar_to_list").unwrap().name(), "scalar_to_list");
        assert!(builtin("nope").is_none());
    }
}
