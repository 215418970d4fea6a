//! Value coercion between the loosely typed value tree and typed templates.
//!
//! Providers answer with `serde_json::Value`. Typed fields and implementation
//! templates are obtained by a canonical round trip through serde, and the
//! reverse direction produces the same canonical form.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{BoxError, ConfigError};

/// Validation contract for decoded values.
pub trait Validate {
    fn validate(&self) -> Result<(), BoxError>;
}

/// Decode a value into `T`.
pub fn decode<T: DeserializeOwned>(value: &Value, reference: &str) -> Result<T, ConfigError> {
    T::deserialize(value).map_err(|source| ConfigError::Decode {
        reference: reference.to_string(),
        source,
    })
}

/// Decode a value into `T` and run its validation contract.
pub fn decode_validated<T>(value: &Value, reference: &str) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Validate,
{
    let decoded: T = decode(value, reference)?;
    decoded
        .validate()
        .map_err(|source| ConfigError::Validation {
            reference: reference.to_string(),
            source,
        })?;
    Ok(decoded)
}

/// Encode a typed value into its canonical value-tree form.
pub fn encode<T: Serialize>(value: &T, reference: &str) -> Result<Value, ConfigError> {
    serde_json::to_value(value).map_err(|source| ConfigError::Decode {
        reference: reference.to_string(),
        source,
    })
}

/// Walk a dotted path through nested objects.
///
/// An empty path returns the value itself. Any non-object on the way means absent.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        name: String,
        age: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nickname: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Team {
        lead: Person,
        members: Vec<Person>,
        budget: Option<f64>,
    }

    impl Validate for Person {
        fn validate(&self) -> Result<(), BoxError> {
            if self.name.is_empty() {
                return Err("name must not be empty".into());
            }
            Ok(())
        }
    }

    fn round_trip<T>(value: T)
    where
        T: Serialize + DeserializeOwned + PartialEq + std::fmt::Debug,
    {
        let wire = encode(&value, "test").unwrap();
        let back: T = decode(&wire, "test").unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_round_trip_shapes() {
        round_trip(42u16);
        round_trip(-7i64);
        round_trip(true);
        round_trip("Jan".to_string());
        round_trip(Some(3.5f64));
        round_trip(None::<String>);
        round_trip(Person { name: "Jan".into(), age: 10, nickname: None });
        round_trip(Team {
            lead: Person { name: "Koos".into(), age: 20, nickname: Some("K".into()) },
            members: vec![Person { name: "Jan".into(), age: 10, nickname: None }],
            budget: None,
        });
    }

    #[test]
    fn test_decode_matching_value_is_identity() {
        let raw = json!({"any": ["shape", 1]});
        let same: Value = decode(&raw, "raw").unwrap();
        assert_eq!(same, raw);
    }

    #[test]
    fn test_decode_shape_mismatch() {
        let err = decode::<Person>(&json!({"name": 5}), "p1").unwrap_err();
        assert!(matches!(err, ConfigError::Decode { ref reference, .. } if reference == "p1"));
    }

    #[test]
    fn test_validation_is_distinct_from_decode() {
        let err = decode_validated::<Person>(&json!({"name": "", "age": 1}), "p1").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));

        let ok = decode_validated::<Person>(&json!({"name": "Jan", "age": 1}), "p1").unwrap();
        assert_eq!(ok.name, "Jan");
    }

    #[test]
    fn test_lookup_paths() {
        let doc = json!({"ms": {"server": {"http": {"addr": "localhost:8080"}}}, "name": "x"});
        assert_eq!(lookup(&doc, "name"), Some(&json!("x")));
        assert_eq!(
            lookup(&doc, "ms.server.http.addr"),
            Some(&json!("localhost:8080"))
        );
        assert_eq!(lookup(&doc, "ms.client"), None);
        assert_eq!(lookup(&doc, "name.deeper"), None);
        assert_eq!(lookup(&doc, ""), Some(&doc));
    }
}
