//! Service nodes and the resolution engine
//!
//! A [`Service`] is one instance of the service-object pattern: it owns
//! its inputs, resolved data, errors, per-key validation states and child
//! services, and drives the lazy resolve/validate/callback cycle for
//! every declared field key. Resolution is synchronous and depth-first;
//! each key settles exactly once per run.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::bindname::{self, BindScope};
use crate::blueprint::{self, Blueprint, Callback, Composed, Loader, Sourced, Spawn};
use crate::error::ServiceError;
use crate::keypath;
use crate::rules::{NameMap, RuleBackend, RuleListMap, StdRules};

/// Per-key validation state. Absent map entries read as `Unresolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Unresolved,
    Valid,
    Invalid,
}

/// Hierarchical error tree: a node's own message lists merged with each
/// child's tree nested under the child's field path
pub type ErrorTree = BTreeMap<String, ErrorNode>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ErrorNode {
    Messages(Vec<String>),
    Nested(ErrorTree),
}

/// What a finished root run yields
#[derive(Debug, Clone)]
pub struct Response {
    /// The `result` data key, when the tree produced one
    pub result: Option<Value>,
    /// Aggregated error tree; empty on success
    pub errors: ErrorTree,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// One node of the service tree
pub struct Service {
    blueprint: Arc<Blueprint>,
    composed: Composed,
    backend: Arc<dyn RuleBackend>,
    inputs: IndexMap<String, Sourced>,
    names: IndexMap<String, String>,
    data: IndexMap<String, Value>,
    errors: IndexMap<String, Vec<String>>,
    validations: IndexMap<String, Validation>,
    children: IndexMap<String, Service>,
    is_child: bool,
    is_run: bool,
    start_hooks: Vec<Hook>,
    success_hooks: Vec<Hook>,
    fail_hooks: Vec<Hook>,
}

impl Service {
    /// Construct a root service, composing the blueprint's declarations
    pub fn new(blueprint: &Arc<Blueprint>) -> Result<Self, ServiceError> {
        Self::with_backend(blueprint, Arc::new(StdRules))
    }

    /// Construct a root service over a custom rule backend
    pub fn with_backend(
        blueprint: &Arc<Blueprint>,
        backend: Arc<dyn RuleBackend>,
    ) -> Result<Self, ServiceError> {
        let composed = blueprint.compose()?;
        Ok(Self {
            blueprint: Arc::clone(blueprint),
            composed,
            backend,
            inputs: IndexMap::new(),
            names: IndexMap::new(),
            data: IndexMap::new(),
            errors: IndexMap::new(),
            validations: IndexMap::new(),
            children: IndexMap::new(),
            is_child: false,
            is_run: false,
            start_hooks: Vec::new(),
            success_hooks: Vec::new(),
            fail_hooks: Vec::new(),
        })
    }

    /// Construct a child node from a spawn descriptor whose name
    /// templates were already resolved in the parent's scope
    fn from_spawn(
        spawn: Spawn,
        resolved_names: IndexMap<String, String>,
        backend: Arc<dyn RuleBackend>,
    ) -> Result<Self, ServiceError> {
        let mut child = Self::with_backend(&spawn.blueprint, backend)?;
        child.inputs = spawn.inputs;
        child.names = resolved_names;
        child.is_child = true;
        Ok(child)
    }

    /// Supply a raw input value (or spawn descriptor) for a main key
    pub fn input(mut self, key: impl Into<String>, value: impl Into<Sourced>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Override a key's label template for this instance
    pub fn name(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.names.insert(key.into(), template.into());
        self
    }

    /// Register a hook that fires when a root run starts
    pub fn on_start(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.start_hooks.push(Box::new(hook));
        self
    }

    /// Register a hook that fires after an error-free root run
    pub fn on_success(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.success_hooks.push(Box::new(hook));
        self
    }

    /// Register a hook that fires after a root run that collected errors
    pub fn on_fail(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.fail_hooks.push(Box::new(hook));
        self
    }

    // ─────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────

    pub fn data(&self) -> &IndexMap<String, Value> {
        &self.data
    }

    pub fn errors(&self) -> &IndexMap<String, Vec<String>> {
        &self.errors
    }

    pub fn children(&self) -> &IndexMap<String, Service> {
        &self.children
    }

    pub fn validation(&self, key: &str) -> Validation {
        self.validations
            .get(key)
            .copied()
            .unwrap_or(Validation::Unresolved)
    }

    pub fn validations(&self) -> &IndexMap<String, Validation> {
        &self.validations
    }

    /// Merge this node's errors with every child's, nested per field path
    pub fn total_errors(&self) -> ErrorTree {
        let mut tree: ErrorTree = self
            .errors
            .iter()
            .map(|(key, msgs)| (key.clone(), ErrorNode::Messages(msgs.clone())))
            .collect();

        for (path, child) in &self.children {
            let child_errors = child.total_errors();
            if !child_errors.is_empty() {
                tree.insert(path.clone(), ErrorNode::Nested(child_errors));
            }
        }

        tree
    }

    /// Resolve a label template in this node's bind scope
    pub fn resolve_bind_name(&self, template: &str) -> Result<String, ServiceError> {
        bindname::resolve(self, template)
    }

    // ─────────────────────────────────────────────────────────────
    // Run loop
    // ─────────────────────────────────────────────────────────────

    /// Resolve and validate every declared field key, then assemble the
    /// response. Re-running a node is a configuration error.
    pub fn run(&mut self) -> Result<Response, ServiceError> {
        if self.is_run {
            return Err(ServiceError::AlreadyRun {
                service: self.blueprint.name.clone(),
            });
        }
        self.prepare_inputs()?;

        self.children.clear();
        self.data.clear();
        self.errors.clear();
        self.validations.clear();

        debug!(service = %self.blueprint.name, child = self.is_child, "run");

        if !self.is_child {
            for hook in &self.start_hooks {
                hook();
            }
        }

        for key in self.declared_keys() {
            self.validate(&key, &[])?;
        }

        let total = self.total_errors();

        if !self.is_child {
            if total.is_empty() {
                debug!(service = %self.blueprint.name, "tree valid, running deferred callbacks");
                self.run_all_defer_callbacks();
                for hook in &self.success_hooks {
                    hook();
                }
            } else {
                for hook in &self.fail_hooks {
                    hook();
                }
            }
        }

        self.is_run = true;

        if total.is_empty() && !self.data.contains_key("result") {
            return Err(ServiceError::MissingResult {
                service: self.blueprint.name.clone(),
            });
        }

        Ok(Response {
            result: self.data.get("result").cloned(),
            errors: total,
        })
    }

    /// Run as a nested node: `Some(result)` on success, `None` when the
    /// child collected errors (they stay attached here for aggregation)
    fn run_as_child(&mut self) -> Result<Option<Value>, ServiceError> {
        let response = self.run()?;
        if response.is_success() {
            Ok(response.result)
        } else {
            Ok(None)
        }
    }

    /// Every key a run must settle: inputs, rule keys per class, loaders
    fn declared_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inputs.keys().cloned().collect();
        for (_, class_rules) in &self.composed.rule_lists {
            for key in class_rules.keys() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        for key in self.composed.loaders.keys() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }

    /// Reject malformed input keys and drop empty-string values
    fn prepare_inputs(&mut self) -> Result<(), ServiceError> {
        for key in self.inputs.keys() {
            if !blueprint::is_valid_input_key(key) {
                return Err(ServiceError::InvalidKeyPattern {
                    key: key.clone(),
                    kind: "input",
                    service: self.blueprint.name.clone(),
                });
            }
        }
        self.inputs
            .retain(|_, value| !matches!(value, Sourced::Value(Value::String(s)) if s.is_empty()));
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Resolution engine
    // ─────────────────────────────────────────────────────────────

    /// Settle one key: cycle guard, memo, ancestor short-circuit,
    /// ordering and loader dependencies, data acquisition, rule
    /// validation, callbacks. Always returns a settled verdict.
    fn validate(&mut self, key: &str, depth: &[String]) -> Result<bool, ServiceError> {
        let mut path = depth.to_vec();
        path.push(key.to_string());

        if path.iter().filter(|k| k.as_str() == key).count() >= 2 {
            return Err(ServiceError::CircularDependency {
                path: path.join("|"),
                service: self.blueprint.name.clone(),
            });
        }

        if let Some(state) = self.validations.get(key) {
            return Ok(*state == Validation::Valid);
        }

        // A validated parent object implicitly validates sub-paths that
        // have no verdict of their own
        for prefix in keypath::ancestors(key) {
            if self.validation(&prefix) == Validation::Valid {
                self.settle(key, Validation::Valid);
                return Ok(true);
            }
        }

        let main = keypath::main_key(key).to_string();

        if let Some(promised) = self.composed.promises.get(&main).cloned() {
            for dep in promised {
                if !self.validate(&dep, &path)? {
                    self.settle(&main, Validation::Invalid);
                    if key != main {
                        self.settle(key, Validation::Invalid);
                    }
                    return Ok(false);
                }
            }
        }

        let loader_params: Vec<String> = self
            .composed
            .loaders
            .get(&main)
            .map(|loader| loader.params.iter().map(|p| p.name.clone()).collect())
            .unwrap_or_default();
        for dep in loader_params {
            if !self.validate(&dep, &path)? {
                self.settle(&main, Validation::Invalid);
            }
        }

        self.load_data(&main)?;
        self.validate_with(key, &path)?;

        let ordered = self.ordered_callback_keys(key);
        for cb_key in &ordered {
            let params: Vec<String> = self.composed.callbacks[cb_key]
                .params
                .iter()
                .map(|p| p.name.clone())
                .collect();
            for dep in params {
                if dep != key && !self.validate(&dep, &path)? {
                    self.settle(key, Validation::Invalid);
                }
            }
        }

        if self.validation(key) == Validation::Valid {
            for cb_key in &ordered {
                let cb = self.composed.callbacks[cb_key].clone();
                if !cb.defer {
                    trace!(service = %self.blueprint.name, callback = %cb_key, "callback");
                    self.invoke_callback(&cb);
                }
            }
        }

        trace!(service = %self.blueprint.name, key, state = ?self.validation(key), "settled");
        Ok(self.validation(key) != Validation::Invalid)
    }

    /// Record a verdict. `Invalid` is terminal; `Valid` never overwrites
    /// it.
    fn settle(&mut self, key: &str, state: Validation) {
        match state {
            Validation::Invalid => {
                self.validations.insert(key.to_string(), Validation::Invalid);
            }
            Validation::Valid => {
                if self.validation(key) != Validation::Invalid {
                    self.validations.insert(key.to_string(), Validation::Valid);
                }
            }
            Validation::Unresolved => {}
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Data acquisition
    // ─────────────────────────────────────────────────────────────

    /// Produce the datum for a main key: memoized data first, then a
    /// caller input, then the declared loader. Spawns become children.
    fn load_data(&mut self, main: &str) -> Result<(), ServiceError> {
        if self.data.contains_key(main) {
            return Ok(());
        }

        let sourced = if let Some(input) = self.inputs.get(main) {
            Some(input.clone())
        } else if let Some(loader) = self.composed.loaders.get(main).cloned() {
            self.invoke_loader(main, &loader)
        } else {
            None
        };

        let Some(sourced) = sourced else {
            // No input, no loader (or unresolvable arguments): the key
            // stays absent without error
            return Ok(());
        };

        match sourced {
            Sourced::Value(value) => {
                self.data.insert(main.to_string(), value);
            }
            Sourced::One(spawn) => match self.absorb_child(main.to_string(), spawn)? {
                Some(value) => {
                    self.data.insert(main.to_string(), value);
                }
                None => self.settle(main, Validation::Invalid),
            },
            Sourced::Many(spawns) => {
                let mut values = Vec::new();
                let mut failed = false;
                for (index, spawn) in spawns.into_iter().enumerate() {
                    match self.absorb_child(format!("{main}.{index}"), spawn)? {
                        Some(value) => values.push(value),
                        None => {
                            failed = true;
                            self.settle(main, Validation::Invalid);
                        }
                    }
                }
                if !failed {
                    self.data.insert(main.to_string(), Value::Array(values));
                }
            }
        }

        Ok(())
    }

    /// Call a loader with its resolved arguments; `None` when an
    /// argument could not be materialized
    fn invoke_loader(&self, main: &str, loader: &Loader) -> Option<Sourced> {
        let args = self.resolve_args(&loader.params)?;
        trace!(service = %self.blueprint.name, key = main, "loader");
        Some((loader.func)(&args))
    }

    /// Materialize declared parameters: a validated dependency's value,
    /// or its literal default when the dependency validated without
    /// producing data
    fn resolve_args(&self, params: &[blueprint::Param]) -> Option<Vec<Value>> {
        let mut args = Vec::with_capacity(params.len());
        for param in params {
            if self.validation(&param.name) != Validation::Valid {
                return None;
            }
            match self.data.get(&param.name) {
                Some(value) => args.push(value.clone()),
                None => match &param.default {
                    Some(default) => args.push(default.clone()),
                    None => return None,
                },
            }
        }
        Some(args)
    }

    /// Spawn, run and register one child service, resolving its name
    /// templates in this node's scope first
    fn absorb_child(&mut self, path: String, spawn: Spawn) -> Result<Option<Value>, ServiceError> {
        let mut resolved_names = IndexMap::new();
        for (key, template) in &spawn.names {
            resolved_names.insert(key.clone(), self.resolve_bind_name(template)?);
        }

        debug!(service = %self.blueprint.name, child = %spawn.blueprint.name(), %path, "spawn");
        let mut child = Service::from_spawn(spawn, resolved_names, Arc::clone(&self.backend))?;
        let resolved = child.run_as_child()?;
        self.children.insert(path, child);
        Ok(resolved)
    }

    // ─────────────────────────────────────────────────────────────
    // Rule composition & validation
    // ─────────────────────────────────────────────────────────────

    /// Validate one key against every rule-owning class in composition
    /// order, short-circuiting on the first class that fails
    fn validate_with(&mut self, key: &str, path: &[String]) -> Result<bool, ServiceError> {
        for index in 0..self.composed.rule_lists.len() {
            let (class_name, class_rules) = self.composed.rule_lists[index].clone();
            let mut rule_lists = Self::related_rule_lists(key, &class_rules);
            self.require_collection_ancestors(&class_name, &rule_lists)?;
            let loaded = self.snapshot();
            expand_wildcards(&loaded, &mut rule_lists);
            self.prune_absent(&loaded, &mut rule_lists);

            let mut names = NameMap::new();

            // Cross-field rule dependencies: validate each first; an
            // absent or failing dependency drops that rule instance
            let rule_keys: Vec<String> = rule_lists.keys().cloned().collect();
            for rkey in &rule_keys {
                let rules = rule_lists[rkey].clone();
                let mut kept = Vec::new();
                for rule in rules {
                    let mut keep = true;
                    for dep in self.backend.clone().dependency_keys(&rule) {
                        if keypath::has_wildcard(&dep) {
                            return Err(ServiceError::WildcardRuleDependency {
                                class: class_name.clone(),
                            });
                        }
                        if !self.validate(&dep, path)? {
                            self.settle(key, Validation::Invalid);
                            keep = false;
                        }
                        if self.data_value(&dep).is_none() {
                            keep = false;
                        }
                        let label = self.resolve_bind_name(&format!("{{{{{dep}}}}}"))?;
                        names.insert(dep, label);
                    }
                    if keep {
                        kept.push(rule);
                    }
                }
                *rule_lists.get_mut(rkey).expect("related key") = kept;
            }

            for rkey in &rule_keys {
                if !rule_lists[rkey].is_empty() {
                    let label = self.resolve_bind_name(&format!("{{{{{rkey}}}}}"))?;
                    names.insert(rkey.clone(), label);
                }
            }

            // Dependency loaders may have produced data since the
            // pruning pass, so evaluate against a fresh snapshot
            let snapshot = self.snapshot();

            let messages = self.backend.template_messages();
            for (rkey, rules) in &rule_lists {
                let mut single = RuleListMap::new();
                single.insert(rkey.clone(), rules.clone());
                let found = self
                    .backend
                    .validation_errors(&snapshot, &single, &names, &messages);
                if found.is_empty() {
                    continue;
                }

                for (epath, msgs) in found {
                    let entry = self.errors.entry(epath).or_default();
                    for msg in msgs {
                        if !entry.contains(&msg) {
                            entry.push(msg);
                        }
                    }
                }
                self.settle(key, Validation::Invalid);
                return Ok(false);
            }
        }

        if self.validation(key) == Validation::Invalid {
            return Ok(false);
        }
        self.settle(key, Validation::Valid);
        Ok(true)
    }

    /// The loaded data as one JSON object, for rule evaluation
    fn snapshot(&self) -> Value {
        Value::Object(
            self.data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Look a full field key up in the loaded data
    fn data_value(&self, key: &str) -> Option<&Value> {
        let main = keypath::main_key(key);
        let root = self.data.get(main)?;
        let rest = &key[main.len()..];
        if rest.is_empty() {
            Some(root)
        } else {
            keypath::get_in(root, &rest[1..])
        }
    }

    /// This class's rule lists for the key, its strict descendants, and
    /// every ancestor key that declares rules of its own
    fn related_rule_lists(key: &str, class_rules: &RuleListMap) -> RuleListMap {
        let mut related = RuleListMap::new();
        let child_prefix = format!("{key}.");
        for (k, rules) in class_rules {
            if k == key || k.starts_with(&child_prefix) {
                related.insert(k.clone(), rules.clone());
            }
        }
        for prefix in keypath::ancestors(key) {
            if let Some(rules) = class_rules.get(&prefix) {
                related.insert(prefix, rules.clone());
            }
        }
        related
    }

    /// Every proper ancestor of a nested rule key must carry a
    /// collection-typed rule in some class
    fn require_collection_ancestors(
        &self,
        class_name: &str,
        rule_lists: &RuleListMap,
    ) -> Result<(), ServiceError> {
        for key in rule_lists.keys() {
            for prefix in keypath::ancestors(key) {
                if !self.has_collection_rule_for(&prefix) {
                    return Err(ServiceError::MissingCollectionRule {
                        key: prefix,
                        class: class_name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether any class attaches a collection-typed rule to the key
    fn has_collection_rule_for(&self, key: &str) -> bool {
        self.composed.rule_lists.iter().any(|(_, class_rules)| {
            class_rules
                .get(key)
                .is_some_and(|rules| self.backend.has_collection_rule(rules))
        })
    }

    /// Drop or project rules whose paths are absent from the loaded data
    ///
    /// A missing leaf keeps only the presence projection of its rules
    /// (so requiredness still fires); anything below a missing or
    /// non-container node is removed outright.
    fn prune_absent(&self, snapshot: &Value, rule_lists: &mut RuleListMap) {
        let keys: Vec<String> = rule_lists.keys().cloned().collect();
        for rkey in keys {
            if !rule_lists.contains_key(&rkey) {
                continue;
            }
            let segs: Vec<&str> = rkey.split('.').collect();
            let typed = keypath::parse(&rkey);
            let mut cursor: Option<&Value> = Some(snapshot);

            for i in 0..segs.len() {
                let prefix = segs[..=i].join(".");
                if !rule_lists.contains_key(&prefix) {
                    break;
                }

                let is_container =
                    cursor.is_some_and(|v| v.is_object() || v.is_array());
                let next = cursor.and_then(|v| keypath::child(v, &typed[i]));

                if is_container && next.is_none() {
                    let projected: Vec<_> = rule_lists[&prefix]
                        .iter()
                        .filter_map(|rule| self.backend.presence_only(rule))
                        .collect();
                    *rule_lists.get_mut(&prefix).expect("prefix key") = projected;
                }

                if !is_container || (i + 1 < segs.len() && next.is_none()) {
                    let deeper_prefix = format!("{prefix}.");
                    rule_lists.retain(|k, _| !k.starts_with(&deeper_prefix));
                    break;
                }

                cursor = next;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Callback ordering
    // ─────────────────────────────────────────────────────────────

    /// All callbacks for a key: promised orderings first (transitively
    /// expanded, earliest requirement first), then the rest in
    /// declaration order
    fn ordered_callback_keys(&self, key: &str) -> Vec<String> {
        let prefix = format!("{key}#");
        let promised: Vec<String> = self
            .composed
            .promises
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();

        let mut ordered = Vec::new();
        let mut trail = Vec::new();
        self.expand_promised(&promised, &mut trail, &mut ordered);

        let mut keys: Vec<String> = ordered
            .into_iter()
            .filter(|k| self.composed.callbacks.contains_key(k))
            .collect();
        for k in self.composed.callbacks.keys() {
            if k.starts_with(&prefix) && !keys.contains(k) {
                keys.push(k.clone());
            }
        }
        keys
    }

    /// Depth-first expansion of promised callback orderings,
    /// deduplicated keep-first
    fn expand_promised(&self, keys: &[String], trail: &mut Vec<String>, out: &mut Vec<String>) {
        for key in keys {
            if trail.iter().any(|k| k == key) {
                continue;
            }
            trail.push(key.clone());
            let deps = self.composed.promises.get(key).cloned().unwrap_or_default();
            self.expand_promised(&deps, trail, out);
            trail.pop();
            if !out.contains(key) {
                out.push(key.clone());
            }
        }
    }

    /// Run one callback against the owning key's in-flight value; a
    /// callback whose arguments cannot be materialized is skipped
    fn invoke_callback(&mut self, cb: &Callback) {
        let Some(args) = self.resolve_args(&cb.params) else {
            return;
        };
        let main = keypath::main_key(&cb.field).to_string();
        if let Some(value) = self.data.get_mut(&main) {
            (cb.func)(value, &args);
        }
    }

    /// Second pass: run `@defer` callbacks, root first, then each child
    /// in tree order. Only invoked on a fully valid root tree.
    fn run_all_defer_callbacks(&mut self) {
        let defer_keys: Vec<String> = self
            .composed
            .callbacks
            .iter()
            .filter(|(_, cb)| cb.defer)
            .map(|(k, _)| k.clone())
            .collect();
        for key in defer_keys {
            let cb = self.composed.callbacks[&key].clone();
            trace!(service = %self.blueprint.name, callback = %key, "defer callback");
            self.invoke_callback(&cb);
        }

        let paths: Vec<String> = self.children.keys().cloned().collect();
        for path in paths {
            if let Some(child) = self.children.get_mut(&path) {
                child.run_all_defer_callbacks();
            }
        }
    }
}

impl BindScope for Service {
    fn label_template(&self, main_key: &str) -> Option<String> {
        self.names
            .get(main_key)
            .or_else(|| self.composed.bind_names.get(main_key))
            .cloned()
    }

    fn requires_position_marker(&self, main_key: &str) -> bool {
        self.has_collection_rule_for(main_key)
    }

    fn type_name(&self) -> &str {
        &self.blueprint.name
    }
}

/// Expand `*` segments in rule keys against the loaded data: one
/// concrete key per element present at the wildcard's parent path. A
/// wildcard whose parent is absent disappears.
fn expand_wildcards(snapshot: &Value, rule_lists: &mut RuleListMap) {
    loop {
        let Some(wkey) = rule_lists
            .keys()
            .find(|k| keypath::has_wildcard(k))
            .cloned()
        else {
            break;
        };
        let rules = rule_lists.shift_remove(&wkey).expect("wildcard key");

        let segs: Vec<&str> = wkey.split('.').collect();
        let pos = segs.iter().position(|s| *s == "*").expect("wildcard seg");
        let parent = segs[..pos].join(".");

        let element_keys: Vec<String> = match keypath::get_in(snapshot, &parent) {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            Some(Value::Array(items)) => (0..items.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        };

        for element in element_keys {
            let mut concrete = segs.clone();
            concrete[pos] = &element;
            rule_lists.insert(concrete.join("."), rules.clone());
        }
    }
}
