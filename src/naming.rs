//! Name normalization and inflection helpers.
//!
//! All case folding is ASCII-only so identical paths produce identical names
//! regardless of locale.

use std::sync::LazyLock;

use regex::Regex;

static KEBAB_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").expect("valid regex"));

static TOOL_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// Maximum length of an MCP tool name.
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Irregular singular/plural pairs. Checked before any suffix rule.
const IRREGULARS: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("foot", "feet"),
    ("tooth", "teeth"),
    ("goose", "geese"),
    ("mouse", "mice"),
    ("leaf", "leaves"),
    ("life", "lives"),
    ("knife", "knives"),
    ("wife", "wives"),
    ("half", "halves"),
    ("self", "selves"),
    ("index", "indices"),
    ("matrix", "matrices"),
    ("vertex", "vertices"),
    ("ox", "oxen"),
    ("criterion", "criteria"),
    ("datum", "data"),
    ("medium", "media"),
    ("shoe", "shoes"),
    ("movie", "movies"),
    ("cookie", "cookies"),
    ("hero", "heroes"),
    ("potato", "potatoes"),
    ("tomato", "tomatoes"),
    ("echo", "echoes"),
    ("veto", "vetoes"),
];

/// Lowercase and strip `-` and `_`.
///
/// `"Pet-Store_Items"` becomes `"petstoreitems"`.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '-' && *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Convert camelCase / snake_case to kebab-case.
///
/// A `-` is inserted before every uppercase letter except a leading one.
pub fn to_kebab(s: &str) -> String {
    split_case(s, '-')
}

/// Convert camelCase / kebab-case to snake_case.
pub fn to_snake(s: &str) -> String {
    split_case(s, '_').replace('-', "_")
}

fn split_case(s: &str, sep: char) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && c.is_ascii_uppercase() {
            out.push(sep);
        }
        out.push(c.to_ascii_lowercase());
    }
    out.replace('_', &sep.to_string())
}

/// Convert a plural noun to its singular form.
///
/// Words that already look singular are returned unchanged.
pub fn singularize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let lower = word.to_ascii_lowercase();
    if let Some((singular, _)) = IRREGULARS.iter().find(|(_, plural)| *plural == lower) {
        return singular.to_string();
    }
    if IRREGULARS.iter().any(|(singular, _)| *singular == lower) {
        return word.to_string();
    }
    if !lower.ends_with('s')
        || lower.ends_with("ss")
        || lower.ends_with("us")
        || lower.ends_with("is")
    {
        return word.to_string();
    }

    let stem = |n: usize| &word[..word.len() - n];
    if lower.ends_with("ies") && lower.len() > 3 {
        return format!("{}y", stem(3));
    }
    if lower.ends_with("lves") {
        return format!("{}f", stem(3));
    }
    for suffix in ["ches", "shes", "xes", "sses", "uses", "zzes"] {
        if lower.ends_with(suffix) {
            return stem(2).to_string();
        }
    }
    if lower.ends_with("oes") && lower.len() > 4 {
        return stem(2).to_string();
    }
    stem(1).to_string()
}

/// Convert a singular noun to its plural form.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let lower = word.to_ascii_lowercase();
    if let Some((_, plural)) = IRREGULARS.iter().find(|(singular, _)| *singular == lower) {
        return plural.to_string();
    }
    if IRREGULARS.iter().any(|(_, plural)| *plural == lower) {
        return word.to_string();
    }

    let stem = |n: usize| &word[..word.len() - n];
    let before_last = lower.chars().rev().nth(1);
    if lower.ends_with('y') && before_last.is_some_and(|c| !is_vowel(c)) {
        return format!("{}ies", stem(1));
    }
    if lower.ends_with("lf") {
        return format!("{}ves", stem(1));
    }
    if lower.ends_with("fe") {
        return format!("{}ves", stem(2));
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        return format!("{word}es");
    }
    format!("{word}s")
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// Reduce `s` to `[a-z0-9-]`, collapsing runs of `-`.
///
/// A result starting with a digit is prefixed with `lead`.
pub fn sanitize_identifier(s: &str, lead: char) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, lead);
    }
    out
}

/// Canonical CLI resource name for a raw segment or extension value.
pub fn canonical_resource(raw: &str) -> String {
    let name = sanitize_identifier(&normalize(raw), 'r');
    if name.is_empty() {
        "resource".to_string()
    } else {
        name
    }
}

/// Whether `s` matches `^[a-z][a-z0-9-]*$`.
pub fn is_kebab_identifier(s: &str) -> bool {
    KEBAB_IDENT.is_match(s)
}

/// Whether `s` is a valid MCP tool name.
pub fn is_tool_identifier(s: &str) -> bool {
    s.len() <= MAX_TOOL_NAME_LEN && TOOL_IDENT.is_match(s)
}

/// Coerce `s` into a valid MCP tool name.
pub fn to_tool_identifier(s: &str) -> String {
    let mut out: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out.truncate(MAX_TOOL_NAME_LEN);
    out
}
