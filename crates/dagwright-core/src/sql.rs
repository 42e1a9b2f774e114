//! SQL text helpers shared by the template layer and the stores

/// Variadic surrogate-key function registered by the embedded store
pub const SURROGATE_KEY_FN: &str = "dagwright_surrogate_key";

/// `(text, pattern)` first-match function registered by the embedded store
pub const REGEXP_EXTRACT_FN: &str = "dagwright_regexp_extract";

/// Quote a string literal (`'` doubled)
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote an identifier (`"` doubled)
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
