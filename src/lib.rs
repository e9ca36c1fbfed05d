//! Fieldflow - lazy field resolution and validation for service objects
//!
//! A service object declares *what* each field needs (loaders with
//! parameter lists, validation rules, callbacks, labels) and the engine
//! works out *when*: fields resolve lazily, on first reference, with
//! memoized tri-state verdicts, cycle detection and hierarchical error
//! aggregation across nested child services.

mod bindname;
pub mod blueprint;
pub mod error;
pub mod keypath;
pub mod rules;
pub mod service;

pub use blueprint::{Blueprint, BlueprintBuilder, Param, Sourced, Spawn};
pub use error::{FixSuggestion, ServiceError};
pub use rules::{MessageCatalog, Rule, RuleBackend, StdRules};
pub use service::{ErrorNode, ErrorTree, Response, Service, Validation};
