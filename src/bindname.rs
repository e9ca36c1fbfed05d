//! Bind-name resolution
//!
//! Labels shown in error messages are templates: `{{key}}` placeholders
//! resolve to the referenced key's own label (itself possibly a
//! template), and a single `[...]` position marker rewrites to bracketed
//! sub-key notation once the referencing path's later segments are known
//! (`result[a][b]`). Unresolvable placeholders are configuration errors.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ServiceError;
use crate::keypath;

/// Pattern for `{{key}}` placeholders inside a label template
static BIND_NAME_EXP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([a-zA-Z][\w.*]*)\}\}").unwrap());

/// The array-position marker inside a label template
const POSITION_MARKER: &str = "[...]";

/// Lookup surface a resolution pass needs from its owning service
pub(crate) trait BindScope {
    /// Label template declared for a main key, instance overrides first
    fn label_template(&self, main_key: &str) -> Option<String>;

    /// Whether the key carries a collection rule, which makes the
    /// position marker mandatory in its label
    fn requires_position_marker(&self, main_key: &str) -> bool;

    /// Service type name, for error reporting
    fn type_name(&self) -> &str;
}

/// Resolve every placeholder in `name` within the given scope
pub(crate) fn resolve(scope: &dyn BindScope, name: &str) -> Result<String, ServiceError> {
    resolve_inner(scope, name, &mut Vec::new())
}

/// The trail holds the main keys currently being expanded; revisiting
/// one is a template cycle
fn resolve_inner(
    scope: &dyn BindScope,
    name: &str,
    trail: &mut Vec<String>,
) -> Result<String, ServiceError> {
    let mut name = name.to_string();

    while let Some(caps) = BIND_NAME_EXP.captures(&name) {
        let token = caps.get(0).expect("match").as_str().to_string();
        let key = caps.get(1).expect("group").as_str().to_string();
        let main = keypath::main_key(&key).to_string();

        if trail.iter().any(|k| k == &main) {
            return Err(ServiceError::CircularBindName {
                key: main,
                service: scope.type_name().to_string(),
            });
        }

        let template =
            scope
                .label_template(&main)
                .ok_or_else(|| ServiceError::UnknownBindName {
                    key: main.clone(),
                    service: scope.type_name().to_string(),
                })?;
        trail.push(main.clone());
        let replacement = resolve_inner(scope, &template, trail)?;
        trail.pop();
        name = name.replacen(&token, &replacement, 1);

        let marker_count = name.matches(POSITION_MARKER).count();
        if marker_count > 1 {
            return Err(ServiceError::MultiplePositionMarkers {
                name,
                service: scope.type_name().to_string(),
            });
        }
        if scope.requires_position_marker(&main) && marker_count == 0 {
            return Err(ServiceError::MissingPositionMarker {
                key: main,
                service: scope.type_name().to_string(),
            });
        }

        let segs: Vec<&str> = key.split('.').collect();
        if segs.len() > 1 {
            let brackets = format!("[{}]", segs[1..].join("]["));
            name = name.replacen(POSITION_MARKER, &brackets, 1);
        }
    }

    Ok(name)
}
