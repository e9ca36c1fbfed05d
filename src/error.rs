//! Error types with fix suggestions
//!
//! Only configuration defects surface here: they describe mistakes in the
//! declared metadata (loaders, rules, callbacks, bind names), not in the
//! data being validated. Validation failures are never errors; they are
//! collected per field path on the service node.

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Fatal configuration errors. Any of these aborts the run.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("validation dependency circular reference [{path}] occurred in {service}")]
    CircularDependency { path: String, service: String },

    #[error("{key} {kind} key is not a supported pattern in {service}")]
    InvalidKeyPattern {
        key: String,
        kind: &'static str,
        service: String,
    },

    #[error("{key} {kind} key is duplicated in traits of {service}")]
    DuplicateDeclaration {
        key: String,
        kind: &'static str,
        service: String,
    },

    #[error("nested key '{key}' cannot exist in bind names of {service}")]
    NestedBindKey { key: String, service: String },

    #[error("wildcard(*) key cannot exist in a rule dependency in {class}")]
    WildcardRuleDependency { class: String },

    #[error("'{key}' key must have a collection rule in {class}")]
    MissingCollectionRule { key: String, class: String },

    #[error("'{key}' name does not exist in {service}")]
    UnknownBindName { key: String, service: String },

    #[error("'{key}' bind name references itself in {service}")]
    CircularBindName { key: String, service: String },

    #[error("'{name}' has multiple \"[...]\" markers in {service}")]
    MultiplePositionMarkers { name: String, service: String },

    #[error("'{key}' name requires a \"[...]\" marker in {service}")]
    MissingPositionMarker { key: String, service: String },

    #[error("result data key does not exist in {service}")]
    MissingResult { service: String },

    #[error("already run service [{service}]")]
    AlreadyRun { service: String },
}

impl FixSuggestion for ServiceError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            ServiceError::CircularDependency { .. } => {
                Some("Break the loop: a loader or rule dependency chain revisits its own key")
            }
            ServiceError::InvalidKeyPattern { .. } => {
                Some("Keys start with a letter; callback keys use <field>#<label> with an optional @defer suffix")
            }
            ServiceError::DuplicateDeclaration { .. } => {
                Some("Declare the key in one trait only, or shadow it from the host blueprint")
            }
            ServiceError::NestedBindKey { .. } => {
                Some("Bind names are declared per main key; use the [...] marker for nested labels")
            }
            ServiceError::WildcardRuleDependency { .. } => {
                Some("Reference a concrete key in the rule; wildcards only expand on rule paths")
            }
            ServiceError::MissingCollectionRule { .. } => {
                Some("Give the parent key an Object or Array rule so nested keys can expand")
            }
            ServiceError::UnknownBindName { .. } => {
                Some("Declare the key in bind_names or pass a name override when constructing the service")
            }
            ServiceError::CircularBindName { .. } => {
                Some("Break the loop: a label template cannot reach its own key through {{..}} placeholders")
            }
            ServiceError::MultiplePositionMarkers { .. } => {
                Some("Keep a single [...] marker per label template")
            }
            ServiceError::MissingPositionMarker { .. } => {
                Some("Add [...] to the label of a key that carries a collection rule")
            }
            ServiceError::MissingResult { .. } => {
                Some("An error-free service must produce a 'result' data key via an input or loader")
            }
            ServiceError::AlreadyRun { .. } => {
                Some("Construct a fresh service instance per invocation")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_path_and_service() {
        let err = ServiceError::CircularDependency {
            path: "result|aaa|result".into(),
            service: "OrderService".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("result|aaa|result"));
        assert!(msg.contains("OrderService"));
    }

    #[test]
    fn every_variant_has_a_suggestion() {
        let err = ServiceError::MissingResult {
            service: "OrderService".into(),
        };
        assert!(err.fix_suggestion().is_some());
    }
}
