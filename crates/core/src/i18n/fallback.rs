use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::types::ResourceSet;

/// Named placeholder values, keyed without braces.
pub type Replacements = HashMap<String, String>;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

fn non_blank<'a>(set: &'a ResourceSet, key: &str) -> Option<&'a str> {
    set.get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

/// Pick the best available template for `key`.
///
/// Order: active set, default set (both must be non-blank), bundled constants
/// (taken as-is when present), then the key itself.
pub fn select<'a>(
    key: &'a str,
    active: &'a ResourceSet,
    default: &'a ResourceSet,
    builtin: &'a ResourceSet,
) -> &'a str {
    non_blank(active, key)
        .or_else(|| non_blank(default, key))
        .or_else(|| builtin.get(key).map(String::as_str))
        .unwrap_or(key)
}

/// Substitute `{name}` tokens.
///
/// With a map, known names are replaced and unknown ones are removed.
/// Without a map the template comes back verbatim, tokens included.
pub fn render(template: &str, replacements: Option<&Replacements>) -> String {
    let Some(map) = replacements else {
        return template.to_owned();
    };
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            map.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Resolve `key` through the chain and render it.
pub fn resolve(
    key: &str,
    active: &ResourceSet,
    default: &ResourceSet,
    builtin: &ResourceSet,
    replacements: Option<&Replacements>,
) -> String {
    render(select(key, active, default, builtin), replacements)
}
