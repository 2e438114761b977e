//! Method descriptors and the per-endpoint registry.
//!
//! A [`JsonRpcMethod`] is the schema a method was registered with: its
//! parameter types, result type, and whether it is a request or a
//! notification. The registry is supplied at endpoint construction and
//! immutable afterwards; the reserved [`CANCEL_METHOD`] descriptor is
//! always present.

use std::collections::HashMap;

use serde_json::Value;

use crate::message::CANCEL_METHOD;

/// Structural description of a JSON value, checked at the codec boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeDescriptor {
    /// Matches anything.
    Any,
    Null,
    Bool,
    Integer,
    Number,
    String,
    Object,
    List(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    pub fn list_of(element: TypeDescriptor) -> Self {
        TypeDescriptor::List(Box::new(element))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, TypeDescriptor::List(_))
    }

    pub fn name(&self) -> String {
        match self {
            TypeDescriptor::Any => "any".to_string(),
            TypeDescriptor::Null => "null".to_string(),
            TypeDescriptor::Bool => "boolean".to_string(),
            TypeDescriptor::Integer => "integer".to_string(),
            TypeDescriptor::Number => "number".to_string(),
            TypeDescriptor::String => "string".to_string(),
            TypeDescriptor::Object => "object".to_string(),
            TypeDescriptor::List(element) => format!("list<{}>", element.name()),
        }
    }

    /// Check that `value` has this shape. `null` always passes: absent
    /// and right-padded arguments decode as null whatever their declared
    /// type.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return Ok(());
        }
        let matches = match self {
            TypeDescriptor::Any => true,
            TypeDescriptor::Null => false,
            TypeDescriptor::Bool => value.is_boolean(),
            TypeDescriptor::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
            TypeDescriptor::Number => value.is_number(),
            TypeDescriptor::String => value.is_string(),
            TypeDescriptor::Object => value.is_object(),
            TypeDescriptor::List(element) => match value.as_array() {
                Some(items) => return check_elements(element, items),
                None => false,
            },
        };
        if matches {
            Ok(())
        } else {
            Err(format!(
                "expected {}, found {}",
                self.name(),
                json_type_name(value)
            ))
        }
    }
}

fn check_elements(element: &TypeDescriptor, items: &[Value]) -> Result<(), String> {
    for (index, item) in items.iter().enumerate() {
        element
            .check(item)
            .map_err(|mismatch| format!("element {index}: {mismatch}"))?;
    }
    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodKind {
    Request,
    Notification,
}

/// The registered schema of one method.
#[derive(Clone, Debug)]
pub struct JsonRpcMethod {
    name: String,
    parameter_types: Vec<TypeDescriptor>,
    result_type: TypeDescriptor,
    kind: MethodKind,
}

impl JsonRpcMethod {
    pub fn request(
        name: impl Into<String>,
        parameter_types: Vec<TypeDescriptor>,
        result_type: TypeDescriptor,
    ) -> Self {
        Self {
            name: name.into(),
            parameter_types,
            result_type,
            kind: MethodKind::Request,
        }
    }

    pub fn notification(name: impl Into<String>, parameter_types: Vec<TypeDescriptor>) -> Self {
        Self {
            name: name.into(),
            parameter_types,
            result_type: TypeDescriptor::Null,
            kind: MethodKind::Notification,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_types(&self) -> &[TypeDescriptor] {
        &self.parameter_types
    }

    pub fn result_type(&self) -> &TypeDescriptor {
        &self.result_type
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }
}

/// Methods whose name starts with `$/` are optional: an unknown optional
/// method is answered with a null result instead of `MethodNotFound`.
pub fn is_optional_method(name: &str) -> bool {
    name.starts_with("$/")
}

/// Immutable method-descriptor table for one endpoint.
#[derive(Debug)]
pub struct MethodRegistry {
    methods: HashMap<String, JsonRpcMethod>,
    cancel: JsonRpcMethod,
}

impl MethodRegistry {
    /// Build a registry from descriptors. Duplicate names keep the last
    /// registration.
    pub fn new(methods: impl IntoIterator<Item = JsonRpcMethod>) -> Self {
        let methods = methods
            .into_iter()
            .map(|method| (method.name.clone(), method))
            .collect();
        Self {
            methods,
            cancel: JsonRpcMethod::notification(CANCEL_METHOD, vec![TypeDescriptor::Object]),
        }
    }

    /// Look up a descriptor by method name. The reserved cancellation
    /// notification always resolves.
    pub fn resolve(&self, name: &str) -> Option<&JsonRpcMethod> {
        self.methods
            .get(name)
            .or_else(|| (name == CANCEL_METHOD).then_some(&self.cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptors_check_shapes() {
        assert!(TypeDescriptor::String.check(&json!("x")).is_ok());
        assert!(TypeDescriptor::String.check(&json!(1)).is_err());
        assert!(TypeDescriptor::Integer.check(&json!(3)).is_ok());
        assert!(TypeDescriptor::Integer.check(&json!(3.5)).is_err());
        assert!(TypeDescriptor::Number.check(&json!(3.5)).is_ok());
        assert!(TypeDescriptor::Object.check(&json!({"a": 1})).is_ok());
        assert!(TypeDescriptor::Any.check(&json!([1, "two"])).is_ok());
    }

    #[test]
    fn null_passes_any_descriptor() {
        assert!(TypeDescriptor::String.check(&json!(null)).is_ok());
        assert!(TypeDescriptor::list_of(TypeDescriptor::Integer)
            .check(&json!(null))
            .is_ok());
    }

    #[test]
    fn list_descriptors_check_every_element() {
        let list = TypeDescriptor::list_of(TypeDescriptor::String);
        assert!(list.check(&json!(["a", "b"])).is_ok());
        let mismatch = list.check(&json!(["a", 2])).unwrap_err();
        assert!(mismatch.contains("element 1"), "{mismatch}");
    }

    #[test]
    fn registry_resolves_registered_and_reserved_methods() {
        let registry = MethodRegistry::new([JsonRpcMethod::request(
            "request",
            vec![TypeDescriptor::String],
            TypeDescriptor::String,
        )]);
        assert_eq!(registry.resolve("request").unwrap().name(), "request");
        assert_eq!(
            registry.resolve(CANCEL_METHOD).unwrap().kind(),
            MethodKind::Notification
        );
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn optional_methods_are_dollar_slash_prefixed() {
        assert!(is_optional_method("$/cancelRequest"));
        assert!(is_optional_method("$/status"));
        assert!(!is_optional_method("initialize"));
    }
}
