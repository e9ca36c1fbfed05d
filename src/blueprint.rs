//! Service blueprints
//!
//! A blueprint is the declarative metadata a concrete service type
//! supplies: loaders with explicit parameter lists, callbacks keyed
//! `field#label` (with an optional `@defer` suffix), per-class rule
//! lists, bind-name label templates, promise (ordering) lists and trait
//! mixins. Composition flattens the trait tree into one declaration
//! table, validated once, before the first field resolves.

use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::ServiceError;
use crate::rules::{Rule, RuleListMap};

/// Pattern for main keys: loader/input/bind-name keys, loader params
static MAIN_KEY_EXP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z][\w-]*$").unwrap());

/// Pattern for rule keys: dotted paths with optional `*` segments
static RULE_KEY_EXP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][\w-]*(\.([\w-]+|\*))*$").unwrap());

/// Pattern for callback keys: `field#label` or `field#label@defer`
static CALLBACK_KEY_EXP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][\w-]*#[a-zA-Z][\w-]*(@defer)?$").unwrap());

/// A loader or callback function's declared parameter
///
/// The name is a main-key dependency; the default is used only when the
/// dependency validated without producing a value.
#[derive(Debug, Clone)]
pub struct Param {
    pub(crate) name: String,
    pub(crate) default: Option<Value>,
}

impl Param {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            default: Some(default),
        }
    }
}

impl From<&str> for Param {
    fn from(name: &str) -> Self {
        Param::new(name)
    }
}

/// What a loader (or caller input) produced for a field
#[derive(Clone)]
pub enum Sourced {
    /// A plain value
    Value(Value),
    /// Delegate the field to one nested service
    One(Spawn),
    /// Delegate to one nested service per element
    Many(Vec<Spawn>),
}

impl From<Value> for Sourced {
    fn from(value: Value) -> Self {
        Sourced::Value(value)
    }
}

impl From<Spawn> for Sourced {
    fn from(spawn: Spawn) -> Self {
        Sourced::One(spawn)
    }
}

impl From<Vec<Spawn>> for Sourced {
    fn from(spawns: Vec<Spawn>) -> Self {
        Sourced::Many(spawns)
    }
}

/// Descriptor for a nested service instance
///
/// Name templates are resolved in the parent's bind scope before the
/// child is constructed.
#[derive(Clone)]
pub struct Spawn {
    pub(crate) blueprint: Arc<Blueprint>,
    pub(crate) inputs: IndexMap<String, Sourced>,
    pub(crate) names: IndexMap<String, String>,
}

impl Spawn {
    pub fn new(blueprint: Arc<Blueprint>) -> Self {
        Self {
            blueprint,
            inputs: IndexMap::new(),
            names: IndexMap::new(),
        }
    }

    pub fn input(mut self, key: impl Into<String>, value: impl Into<Sourced>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn name(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.names.insert(key.into(), template.into());
        self
    }
}

/// Loader function: resolved parameter values in, sourced datum out
pub type LoaderFn = Arc<dyn Fn(&[Value]) -> Sourced + Send + Sync>;

/// Callback function: mutates the owning key's value in place
pub type CallbackFn = Arc<dyn Fn(&mut Value, &[Value]) + Send + Sync>;

/// A named loader with its declared parameter list
#[derive(Clone)]
pub struct Loader {
    pub(crate) params: Vec<Param>,
    pub(crate) func: LoaderFn,
}

/// A callback attached to a field key
#[derive(Clone)]
pub struct Callback {
    pub(crate) field: String,
    pub(crate) defer: bool,
    pub(crate) params: Vec<Param>,
    pub(crate) func: CallbackFn,
}

/// Declarative metadata for one service type
pub struct Blueprint {
    pub(crate) name: String,
    traits: Vec<Arc<Blueprint>>,
    loaders: IndexMap<String, Loader>,
    callbacks: IndexMap<String, Callback>,
    rule_lists: RuleListMap,
    bind_names: IndexMap<String, String>,
    promises: IndexMap<String, Vec<String>>,
}

/// Flattened declaration tables, produced once per service construction
#[derive(Clone)]
pub(crate) struct Composed {
    pub loaders: IndexMap<String, Loader>,
    pub callbacks: IndexMap<String, Callback>,
    pub bind_names: IndexMap<String, String>,
    pub promises: IndexMap<String, Vec<String>>,
    /// Rule lists per rule-owning class, traits first, host last
    pub rule_lists: Vec<(String, RuleListMap)>,
}

impl Blueprint {
    pub fn builder(name: impl Into<String>) -> BlueprintBuilder {
        BlueprintBuilder {
            name: name.into(),
            traits: Vec::new(),
            loaders: IndexMap::new(),
            callbacks: IndexMap::new(),
            rule_lists: RuleListMap::new(),
            bind_names: IndexMap::new(),
            promises: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recursively flatten the trait tree, deduplicated, depth-first
    fn all_traits(&self) -> Vec<Arc<Blueprint>> {
        let mut flattened: Vec<Arc<Blueprint>> = Vec::new();
        for mixin in &self.traits {
            for inherited in mixin.all_traits() {
                if !flattened.iter().any(|t| Arc::ptr_eq(t, &inherited)) {
                    flattened.push(inherited);
                }
            }
            if !flattened.iter().any(|t| Arc::ptr_eq(t, mixin)) {
                flattened.push(Arc::clone(mixin));
            }
        }
        flattened
    }

    /// Merge trait declarations into one table
    ///
    /// Duplicate loader/callback keys across traits are a configuration
    /// error unless both refer to the same shared function handle. The
    /// host blueprint may shadow a trait's key.
    pub(crate) fn compose(&self) -> Result<Composed, ServiceError> {
        let traits = self.all_traits();

        let mut loaders: IndexMap<String, Loader> = IndexMap::new();
        let mut callbacks: IndexMap<String, Callback> = IndexMap::new();
        let mut bind_names: IndexMap<String, String> = IndexMap::new();
        let mut promises: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut rule_lists: Vec<(String, RuleListMap)> = Vec::new();

        for class in &traits {
            for (key, loader) in &class.loaders {
                if let Some(existing) = loaders.get(key) {
                    if !Arc::ptr_eq(&existing.func, &loader.func) {
                        return Err(ServiceError::DuplicateDeclaration {
                            key: key.clone(),
                            kind: "loader",
                            service: self.name.clone(),
                        });
                    }
                }
                loaders.insert(key.clone(), loader.clone());
            }
            for (key, callback) in &class.callbacks {
                if let Some(existing) = callbacks.get(key) {
                    if !Arc::ptr_eq(&existing.func, &callback.func) {
                        return Err(ServiceError::DuplicateDeclaration {
                            key: key.clone(),
                            kind: "callback",
                            service: self.name.clone(),
                        });
                    }
                }
                callbacks.insert(key.clone(), callback.clone());
            }
        }
        loaders.extend(self.loaders.clone());
        callbacks.extend(self.callbacks.clone());

        for class in traits.iter().map(AsRef::as_ref).chain([self]) {
            for (key, template) in &class.bind_names {
                bind_names.insert(key.clone(), template.clone());
            }
            for (key, list) in &class.promises {
                let merged = promises.entry(key.clone()).or_default();
                for dep in list {
                    if !merged.contains(dep) {
                        merged.push(dep.clone());
                    }
                }
            }
            rule_lists.push((class.name.clone(), class.rule_lists.clone()));
        }

        Ok(Composed {
            loaders,
            callbacks,
            bind_names,
            promises,
            rule_lists,
        })
    }
}

/// Builder for [`Blueprint`]
///
/// `build` validates every declared key against its pattern, so a
/// malformed declaration fails at registration time, not mid-run.
pub struct BlueprintBuilder {
    name: String,
    traits: Vec<Arc<Blueprint>>,
    loaders: IndexMap<String, Loader>,
    callbacks: IndexMap<String, Callback>,
    rule_lists: RuleListMap,
    bind_names: IndexMap<String, String>,
    promises: IndexMap<String, Vec<String>>,
}

impl BlueprintBuilder {
    /// Mix a trait blueprint into this one
    pub fn uses(mut self, mixin: &Arc<Blueprint>) -> Self {
        self.traits.push(Arc::clone(mixin));
        self
    }

    /// Declare a loader for a main key
    pub fn loader<P, T, F>(mut self, key: impl Into<String>, params: P, func: F) -> Self
    where
        P: IntoIterator,
        P::Item: Into<Param>,
        T: Into<Sourced>,
        F: Fn(&[Value]) -> T + Send + Sync + 'static,
    {
        self.loaders.insert(
            key.into(),
            Loader {
                params: params.into_iter().map(Into::into).collect(),
                func: Arc::new(move |args| func(args).into()),
            },
        );
        self
    }

    /// Declare a callback under `field#label` (append `@defer` for the
    /// deferred phase)
    pub fn callback<P, F>(mut self, key: impl Into<String>, params: P, func: F) -> Self
    where
        P: IntoIterator,
        P::Item: Into<Param>,
        F: Fn(&mut Value, &[Value]) + Send + Sync + 'static,
    {
        let key = key.into();
        let field = key.split('#').next().unwrap_or(&key).to_string();
        let defer = key.ends_with("@defer");
        self.callbacks.insert(
            key,
            Callback {
                field,
                defer,
                params: params.into_iter().map(Into::into).collect(),
                func: Arc::new(func),
            },
        );
        self
    }

    /// Attach a rule list to a field key
    pub fn rules(mut self, key: impl Into<String>, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rule_lists
            .entry(key.into())
            .or_default()
            .extend(rules);
        self
    }

    /// Declare a label template for a main key
    pub fn bind_name(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.bind_names.insert(key.into(), template.into());
        self
    }

    /// Declare ordering dependencies: every key in `before` must settle
    /// (or run, for callback keys) before `key`
    pub fn promise<I>(mut self, key: impl Into<String>, before: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let merged = self.promises.entry(key.into()).or_default();
        for dep in before {
            let dep = dep.into();
            if !merged.contains(&dep) {
                merged.push(dep);
            }
        }
        self
    }

    /// Validate declared keys and freeze the blueprint
    pub fn build(self) -> Result<Arc<Blueprint>, ServiceError> {
        for (key, loader) in &self.loaders {
            if !MAIN_KEY_EXP.is_match(key) {
                return Err(self.bad_key(key, "loader"));
            }
            for param in &loader.params {
                if !MAIN_KEY_EXP.is_match(&param.name) {
                    return Err(self.bad_key(&param.name, "loader param"));
                }
            }
        }
        for (key, callback) in &self.callbacks {
            if !CALLBACK_KEY_EXP.is_match(key) {
                return Err(self.bad_key(key, "callback"));
            }
            for param in &callback.params {
                if !MAIN_KEY_EXP.is_match(&param.name) {
                    return Err(self.bad_key(&param.name, "callback param"));
                }
            }
        }
        for key in self.rule_lists.keys() {
            if !RULE_KEY_EXP.is_match(key) {
                return Err(self.bad_key(key, "rule"));
            }
        }
        for key in self.bind_names.keys() {
            if key.contains('.') {
                return Err(ServiceError::NestedBindKey {
                    key: key.clone(),
                    service: self.name.clone(),
                });
            }
            if !MAIN_KEY_EXP.is_match(key) {
                return Err(self.bad_key(key, "bind name"));
            }
        }

        Ok(Arc::new(Blueprint {
            name: self.name,
            traits: self.traits,
            loaders: self.loaders,
            callbacks: self.callbacks,
            rule_lists: self.rule_lists,
            bind_names: self.bind_names,
            promises: self.promises,
        }))
    }

    fn bad_key(&self, key: &str, kind: &'static str) -> ServiceError {
        ServiceError::InvalidKeyPattern {
            key: key.to_string(),
            kind,
            service: self.name.clone(),
        }
    }
}

/// Whether a caller-supplied input key is well-formed
pub(crate) fn is_valid_input_key(key: &str) -> bool {
    MAIN_KEY_EXP.is_match(key)
}
