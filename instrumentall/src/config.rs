//! The engine's one configuration seam: resolving a parameter's
//! default value from outside the process (`spec.md` \S6 ambient
//! stack). Kept minimal and trait-based rather than tied to a specific
//! file format, the way `nervosnetwork-ckb`'s crates take a resolved
//! config struct rather than parsing inline.

use std::collections::HashMap;
use std::env;

use crate::parameter::ParamValue;

/// Resolves a parameter's default value by module and parameter name,
/// ahead of [`crate::module::ModuleBuilder::build`]. Implementations
/// typically wrap a config file, environment variables, or a
/// command-line argument map.
pub trait ParamDefaultResolver: Send + Sync {
    /// Returns the raw string form of `module_name`'s `param_name`
    /// default, if overridden.
    fn resolve(&self, module_name: &str, param_name: &str) -> Option<String>;
}

/// Resolves defaults from `INSTRUMENTALL_PARAM_<MODULE>_<NAME>`
/// environment variables, uppercased with non-alphanumerics replaced by
/// `_`.
pub struct EnvParamDefaultResolver {
    prefix: String,
}

impl EnvParamDefaultResolver {
    /// Creates a resolver using the default `INSTRUMENTALL_PARAM_`
    /// prefix.
    pub fn new() -> Self {
        EnvParamDefaultResolver { prefix: "INSTRUMENTALL_PARAM_".to_string() }
    }

    fn env_key(&self, module_name: &str, param_name: &str) -> String {
        let mut key = self.prefix.clone();
        for ch in module_name.chars().chain(std::iter::once('_')).chain(param_name.chars()) {
            key.push(if ch.is_ascii_alphanumeric() { ch.to_ascii_uppercase() } else { '_' });
        }
        key
    }
}

impl Default for EnvParamDefaultResolver {
    fn default() -> Self {
        EnvParamDefaultResolver::new()
    }
}

impl ParamDefaultResolver for EnvParamDefaultResolver {
    fn resolve(&self, module_name: &str, param_name: &str) -> Option<String> {
        env::var(self.env_key(module_name, param_name)).ok()
    }
}

/// A resolver backed by a plain in-memory map keyed
/// `module.<module-name>.<param-name>`, useful for tests and for
/// callers that have already parsed a config file themselves.
#[derive(Default)]
pub struct MapParamDefaultResolver {
    values: HashMap<String, String>,
}

impl MapParamDefaultResolver {
    /// An empty resolver.
    pub fn new() -> Self {
        MapParamDefaultResolver::default()
    }

    /// Builds a resolver from an iterator of `(key, value)` pairs, where
    /// each key is already in `module.<module-name>.<param-name>` form.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        MapParamDefaultResolver { values: pairs.into_iter().collect() }
    }

    /// The hierarchical key this resolver looks values up under.
    pub fn key(module_name: &str, param_name: &str) -> String {
        format!("module.{module_name}.{param_name}")
    }
}

impl ParamDefaultResolver for MapParamDefaultResolver {
    fn resolve(&self, module_name: &str, param_name: &str) -> Option<String> {
        self.values.get(&Self::key(module_name, param_name)).cloned()
    }
}

/// Re-parses `default` as the resolved string form if the resolver has
/// an override for `module_name`/`param_name`, otherwise returns
/// `default` unchanged. Kept free-standing so
/// [`crate::module::ModuleBuilder`] doesn't need to depend on this
/// module's error-formatting details.
pub fn apply_override(resolver: &dyn ParamDefaultResolver, module_name: &str, param_name: &str, default: ParamValue) -> ParamValue {
    let Some(text) = resolver.resolve(module_name, param_name) else {
        return default;
    };
    match ParamValue::parse(default.kind(), &text) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("ignoring unparseable default override for parameter {module_name}.{param_name:?}: {err}");
            default
        }
    }
}
