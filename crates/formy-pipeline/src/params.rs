//! Parameter extraction with `InvalidParameters` failures.

use serde_json::{Map, Value};

use crate::error::{PipelineError, PipelineResult};

pub type Params = Map<String, Value>;

/// Read a required non-empty string, trying `keys` in order.
pub fn required_str(params: &Params, keys: &[&str]) -> PipelineResult<String> {
    optional_str(params, keys)?.ok_or_else(|| {
        PipelineError::invalid_parameters(format!("missing required parameter '{}'", keys[0]))
    })
}

/// Read an optional non-empty string, trying `keys` in order.
///
/// A present key holding anything but a non-empty string is an error.
pub fn optional_str(params: &Params, keys: &[&str]) -> PipelineResult<Option<String>> {
    for key in keys {
        match params.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) if !s.trim().is_empty() => return Ok(Some(s.clone())),
            Some(_) => {
                return Err(PipelineError::invalid_parameters(format!(
                    "parameter '{key}' must be a non-empty string"
                )))
            }
        }
    }
    Ok(None)
}

/// Read an optional number in `[0, 1]`.
pub fn optional_unit_f64(params: &Params, key: &str) -> PipelineResult<Option<f64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_f64() {
            Some(v) if (0.0..=1.0).contains(&v) => Ok(Some(v)),
            _ => Err(PipelineError::invalid_parameters(format!(
                "parameter '{key}' must be a number between 0 and 1"
            ))),
        },
    }
}

/// Read an optional non-negative integer.
pub fn optional_u64(params: &Params, key: &str) -> PipelineResult<Option<u64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            PipelineError::invalid_parameters(format!(
                "parameter '{key}' must be a non-negative integer"
            ))
        }),
    }
}

/// Read an optional boolean.
pub fn optional_bool(params: &Params, key: &str) -> PipelineResult<Option<bool>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(PipelineError::invalid_parameters(format!(
            "parameter '{key}' must be a boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formy_models::ErrorKind;
    use serde_json::json;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_required_str_uses_aliases_in_order() {
        let p = params(json!({ "pose_reference": "/uploads/pose.png" }));
        assert_eq!(
            required_str(&p, &["pose_image", "pose_reference"]).unwrap(),
            "/uploads/pose.png"
        );

        let err = required_str(&p, &["source_image"]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParameters);
        assert!(err.detail.contains("source_image"));
    }

    #[test]
    fn test_blank_or_wrong_type_is_invalid() {
        let p = params(json!({ "a": "  ", "b": 3 }));
        assert!(required_str(&p, &["a"]).is_err());
        assert!(required_str(&p, &["b"]).is_err());
    }

    #[test]
    fn test_numeric_knobs() {
        let p = params(json!({ "strength": 0.4, "too_big": 1.5, "seed": 42, "neg": -1 }));
        assert_eq!(optional_unit_f64(&p, "strength").unwrap(), Some(0.4));
        assert_eq!(optional_unit_f64(&p, "missing").unwrap(), None);
        assert!(optional_unit_f64(&p, "too_big").is_err());
        assert_eq!(optional_u64(&p, "seed").unwrap(), Some(42));
        assert!(optional_u64(&p, "neg").is_err());
    }

    #[test]
    fn test_optional_bool() {
        let p = params(json!({ "edge_refine": true, "bad": "yes" }));
        assert_eq!(optional_bool(&p, "edge_refine").unwrap(), Some(true));
        assert!(optional_bool(&p, "bad").is_err());
    }
}
