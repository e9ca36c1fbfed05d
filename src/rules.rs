//! Rule library and evaluation backend
//!
//! The engine treats rule evaluation as an external collaborator behind
//! the [`RuleBackend`] trait: it hands over a data snapshot, the filtered
//! rule lists, resolved labels and a message catalog, and gets back error
//! messages per path. [`StdRules`] is the concrete adapter shipped with
//! the crate.

use indexmap::IndexMap;
use serde_json::Value;

use crate::keypath;

/// Ordered rule lists per field path
pub type RuleListMap = IndexMap<String, Vec<Rule>>;

/// Resolved human-readable labels per field path
pub type NameMap = IndexMap<String, String>;

/// Error messages per field path
pub type ErrorMap = IndexMap<String, Vec<String>>;

/// A single validation rule
///
/// Cross-field variants carry a root-anchored field key the engine
/// resolves before the rule is evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Value must be present
    Required,
    /// Value must be a JSON string
    Str,
    /// Value must be a JSON integer
    Integer,
    /// Value must be a JSON number
    Number,
    /// Value must be a JSON boolean
    Boolean,
    /// Value must be a JSON object
    Object,
    /// Value must be a JSON array
    Array,
    /// String/array length lower bound
    MinLength(usize),
    /// String/array length upper bound
    MaxLength(usize),
    /// Numeric lower bound
    Min(f64),
    /// Numeric upper bound
    Max(f64),
    /// Value must be one of the listed values
    In(Vec<Value>),
    /// Value must equal the value at another field key
    EqualsKey(String),
    /// Value must differ from the value at another field key
    NotEqualsKey(String),
    /// Value is required whenever another field key is present
    RequiredWith(String),
}

/// Catalog of human-readable error message templates
///
/// Templates use `{label}`, `{other}` and `{limit}` placeholders.
#[derive(Debug, Clone)]
pub struct MessageCatalog {
    templates: IndexMap<&'static str, String>,
}

impl MessageCatalog {
    pub fn new(templates: IndexMap<&'static str, String>) -> Self {
        Self { templates }
    }

    /// The default English catalog
    pub fn default_english() -> Self {
        let entries: [(&'static str, &str); 14] = [
            ("required", "{label} is required"),
            ("string", "{label} must be a string"),
            ("integer", "{label} must be an integer"),
            ("number", "{label} must be a number"),
            ("boolean", "{label} must be a boolean"),
            ("object", "{label} must be an object"),
            ("array", "{label} must be an array"),
            ("min_length", "{label} length must be at least {limit}"),
            ("max_length", "{label} length must be at most {limit}"),
            ("min", "{label} must be at least {limit}"),
            ("max", "{label} must be at most {limit}"),
            ("one_of", "{label} must be one of the allowed values"),
            ("equals", "{label} must equal {other}"),
            ("not_equals", "{label} must not equal {other}"),
        ];
        let mut templates = IndexMap::new();
        for (code, template) in entries {
            templates.insert(code, template.to_string());
        }
        Self { templates }
    }

    /// Render a template with substitutions
    pub fn render(&self, code: &str, vars: &[(&str, &str)]) -> String {
        let mut message = self
            .templates
            .get(code)
            .cloned()
            .unwrap_or_else(|| format!("{{label}} failed rule '{code}'"));
        for (name, value) in vars {
            message = message.replace(&format!("{{{name}}}"), value);
        }
        message
    }
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self::default_english()
    }
}

/// The rule-evaluation collaborator seam
///
/// Implementations are pure: no side effects, no engine state.
pub trait RuleBackend: Send + Sync {
    /// Evaluate rule lists against a data snapshot, returning error
    /// messages per path
    fn validation_errors(
        &self,
        data: &Value,
        rule_lists: &RuleListMap,
        names: &NameMap,
        messages: &MessageCatalog,
    ) -> ErrorMap;

    /// Field keys a rule references as cross-field dependencies
    fn dependency_keys(&self, rule: &Rule) -> Vec<String>;

    /// Project a rule down to its presence semantics; `None` when the
    /// rule says nothing about presence
    fn presence_only(&self, rule: &Rule) -> Option<Rule>;

    /// Whether the list carries a collection-typed (object/array) rule
    fn has_collection_rule(&self, rules: &[Rule]) -> bool;

    /// The message catalog this backend renders errors from
    fn template_messages(&self) -> MessageCatalog;
}

/// The built-in rule backend
#[derive(Debug, Default, Clone)]
pub struct StdRules;

impl StdRules {
    /// Evaluate one rule against the value at `path`. Returns a rendered
    /// message on failure.
    fn check(
        &self,
        data: &Value,
        path: &str,
        rule: &Rule,
        names: &NameMap,
        messages: &MessageCatalog,
    ) -> Option<String> {
        let value = keypath::get_in(data, path);
        let label = names
            .get(path)
            .cloned()
            .unwrap_or_else(|| path.to_string());

        let fail = |code: &str, vars: &[(&str, &str)]| {
            let mut all: Vec<(&str, &str)> = vec![("label", label.as_str())];
            all.extend_from_slice(vars);
            Some(messages.render(code, &all))
        };

        match rule {
            Rule::Required => match value {
                Some(_) => None,
                None => fail("required", &[]),
            },
            Rule::RequiredWith(other) => {
                if keypath::has_in(data, other) && value.is_none() {
                    fail("required", &[])
                } else {
                    None
                }
            }
            // Every other rule passes vacuously on an absent value
            _ => {
                let value = value?;
                match rule {
                    Rule::Str if !value.is_string() => fail("string", &[]),
                    Rule::Integer if !value.is_i64() && !value.is_u64() => fail("integer", &[]),
                    Rule::Number if !value.is_number() => fail("number", &[]),
                    Rule::Boolean if !value.is_boolean() => fail("boolean", &[]),
                    Rule::Object if !value.is_object() => fail("object", &[]),
                    Rule::Array if !value.is_array() => fail("array", &[]),
                    Rule::MinLength(limit) => {
                        if length_of(value).is_some_and(|len| len < *limit) {
                            fail("min_length", &[("limit", &limit.to_string())])
                        } else {
                            None
                        }
                    }
                    Rule::MaxLength(limit) => {
                        if length_of(value).is_some_and(|len| len > *limit) {
                            fail("max_length", &[("limit", &limit.to_string())])
                        } else {
                            None
                        }
                    }
                    Rule::Min(limit) => {
                        if value.as_f64().is_some_and(|n| n < *limit) {
                            fail("min", &[("limit", &limit.to_string())])
                        } else {
                            None
                        }
                    }
                    Rule::Max(limit) => {
                        if value.as_f64().is_some_and(|n| n > *limit) {
                            fail("max", &[("limit", &limit.to_string())])
                        } else {
                            None
                        }
                    }
                    Rule::In(allowed) => {
                        if allowed.contains(value) {
                            None
                        } else {
                            fail("one_of", &[])
                        }
                    }
                    Rule::EqualsKey(other) => match keypath::get_in(data, other) {
                        Some(expected) if expected != value => {
                            let other_label =
                                names.get(other).cloned().unwrap_or_else(|| other.clone());
                            fail("equals", &[("other", &other_label)])
                        }
                        _ => None,
                    },
                    Rule::NotEqualsKey(other) => match keypath::get_in(data, other) {
                        Some(forbidden) if forbidden == value => {
                            let other_label =
                                names.get(other).cloned().unwrap_or_else(|| other.clone());
                            fail("not_equals", &[("other", &other_label)])
                        }
                        _ => None,
                    },
                    _ => None,
                }
            }
        }
    }
}

/// String character count or array element count
fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

impl RuleBackend for StdRules {
    fn validation_errors(
        &self,
        data: &Value,
        rule_lists: &RuleListMap,
        names: &NameMap,
        messages: &MessageCatalog,
    ) -> ErrorMap {
        let mut errors = ErrorMap::new();

        for (path, rules) in rule_lists {
            for rule in rules {
                if let Some(message) = self.check(data, path, rule, names, messages) {
                    errors.entry(path.clone()).or_default().push(message);
                }
            }
        }

        errors
    }

    fn dependency_keys(&self, rule: &Rule) -> Vec<String> {
        match rule {
            Rule::EqualsKey(key) | Rule::NotEqualsKey(key) | Rule::RequiredWith(key) => {
                vec![key.clone()]
            }
            _ => vec![],
        }
    }

    fn presence_only(&self, rule: &Rule) -> Option<Rule> {
        match rule {
            Rule::Required => Some(Rule::Required),
            Rule::RequiredWith(key) => Some(Rule::RequiredWith(key.clone())),
            _ => None,
        }
    }

    fn has_collection_rule(&self, rules: &[Rule]) -> bool {
        rules
            .iter()
            .any(|rule| matches!(rule, Rule::Object | Rule::Array))
    }

    fn template_messages(&self) -> MessageCatalog {
        MessageCatalog::default_english()
    }
}
