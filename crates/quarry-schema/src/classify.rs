//! Native type name to JSON type classification.

use crate::JsonType;

/// Classify a native catalog type into its JSON-facing bucket.
///
/// Arrays always classify as [`JsonType::Array`] regardless of the
/// element type; JSON-native types are [`JsonType::Object`]; enums are
/// [`JsonType::String`]. Everything else goes through a fixed table of
/// native type names, with string as the fallback.
pub fn classify_type(type_name: &str, is_array: bool, is_enum: bool, is_json: bool) -> JsonType {
    if is_array {
        return JsonType::Array;
    }
    if is_json {
        return JsonType::Object;
    }
    if is_enum {
        return JsonType::String;
    }

    // Catalog names come back as typname; strip the array-element marker
    // so `_int4` and `int4` classify the same when callers pass either.
    let name = type_name.strip_prefix('_').unwrap_or(type_name);

    match name.to_ascii_lowercase().as_str() {
        "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "smallserial"
        | "serial" | "bigserial" | "oid" => JsonType::Integer,
        "float4" | "float8" | "real" | "double precision" | "numeric" | "decimal" | "money" => {
            JsonType::Number
        }
        "bool" | "boolean" => JsonType::Boolean,
        "json" | "jsonb" => JsonType::Object,
        _ => JsonType::String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_types() {
        for name in ["int2", "int4", "int8", "smallint", "integer", "bigint", "serial"] {
            assert_eq!(classify_type(name, false, false, false), JsonType::Integer);
        }
    }

    #[test]
    fn test_number_types() {
        for name in ["float4", "float8", "numeric", "decimal", "double precision"] {
            assert_eq!(classify_type(name, false, false, false), JsonType::Number);
        }
    }

    #[test]
    fn test_boolean_types() {
        assert_eq!(classify_type("bool", false, false, false), JsonType::Boolean);
        assert_eq!(classify_type("boolean", false, false, false), JsonType::Boolean);
    }

    #[test]
    fn test_json_types() {
        assert_eq!(classify_type("jsonb", false, false, true), JsonType::Object);
        assert_eq!(classify_type("json", false, false, true), JsonType::Object);
    }

    #[test]
    fn test_arrays_always_win() {
        // Arrays classify as array no matter what the element type is.
        assert_eq!(classify_type("_int4", true, false, false), JsonType::Array);
        assert_eq!(classify_type("_text", true, false, false), JsonType::Array);
        assert_eq!(classify_type("_jsonb", true, false, true), JsonType::Array);
    }

    #[test]
    fn test_enums_are_strings() {
        assert_eq!(classify_type("mood", false, true, false), JsonType::String);
    }

    #[test]
    fn test_fallback_is_string() {
        assert_eq!(classify_type("text", false, false, false), JsonType::String);
        assert_eq!(classify_type("uuid", false, false, false), JsonType::String);
        assert_eq!(classify_type("timestamptz", false, false, false), JsonType::String);
        assert_eq!(classify_type("inet", false, false, false), JsonType::String);
    }
}
