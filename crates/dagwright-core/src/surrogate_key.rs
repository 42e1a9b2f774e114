//! Deterministic surrogate keys
//!
//! A surrogate key is the hex SHA-256 of the canonical form of one or more
//! natural-key values. The canonical form is:
//!
//! - each value rendered as text (`true`/`false`, decimal integers, shortest
//!   round-trip floats, text verbatim),
//! - `\` escaped as `\\` and `|` escaped as `\|`,
//! - NULL rendered as the sentinel `\N`,
//! - parts joined with `|`.
//!
//! Escaping never leaves a lone backslash, so no real value canonicalizes to
//! the NULL sentinel. The SQL emitted by the `surrogate_key()` template
//! function follows exactly the same rules.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Delimiter between key parts
pub const KEY_DELIMITER: char = '|';

/// Canonical form of NULL
pub const NULL_SENTINEL: &str = "\\N";

/// A generated surrogate key (64 lowercase hex characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurrogateKey(String);

impl SurrogateKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for SurrogateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a surrogate key from an ordered sequence of values
pub fn generate_surrogate_key(values: &[Value]) -> SurrogateKey {
    let canonical = canonical_form(values);
    let digest = Sha256::digest(canonical.as_bytes());
    SurrogateKey(hex::encode(digest))
}

/// Build the string that gets hashed
pub fn canonical_form(values: &[Value]) -> String {
    let mut out = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(KEY_DELIMITER);
        }
        match value {
            Value::Null => out.push_str(NULL_SENTINEL),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Int(n) => out.push_str(&n.to_string()),
            Value::Float(f) => escape_into(&mut out, &f.to_string()),
            Value::Text(s) => escape_into(&mut out, s),
        }
    }
    out
}

fn escape_into(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            KEY_DELIMITER => {
                out.push('\\');
                out.push(KEY_DELIMITER);
            }
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(values: &[Value]) -> String {
        generate_surrogate_key(values).into_string()
    }

    #[test]
    fn identical_input_gives_identical_key() {
        assert_eq!(key(&["CheMed".into()]), key(&["CheMed".into()]));
        assert_eq!(key(&["CheMed".into()]).len(), 64);
    }

    #[test]
    fn case_is_significant() {
        assert_ne!(key(&["CheMed".into()]), key(&["Chemed".into()]));
    }

    #[test]
    fn null_never_collides_with_text() {
        assert_ne!(key(&[Value::Null]), key(&["NULL".into()]));
        assert_ne!(key(&[Value::Null]), key(&["\\N".into()]));
        assert_ne!(key(&[Value::Null]), key(&["".into()]));
    }

    #[test]
    fn delimiter_inside_values_is_escaped() {
        // "a|b" as one part must differ from "a" and "b" as two parts
        assert_ne!(key(&["a|b".into()]), key(&["a".into(), "b".into()]));
        assert_eq!(canonical_form(&["a|b".into()]), "a\\|b");
        assert_eq!(canonical_form(&["a".into(), "b".into()]), "a|b");
    }

    #[test]
    fn canonical_forms_of_scalars() {
        let values = vec![
            Value::Int(42),
            Value::Bool(true),
            Value::Float(0.5),
            Value::Null,
            Value::from("c:\\tmp"),
        ];
        assert_eq!(canonical_form(&values), "42|true|0.5|\\N|c:\\\\tmp");
    }

    #[test]
    fn known_digest_is_stable_across_processes() {
        // sha256("CheMed")
        assert_eq!(
            key(&["CheMed".into()]),
            hex::encode(Sha256::digest(b"CheMed"))
        );
    }

    #[test]
    fn order_of_parts_matters() {
        assert_ne!(
            key(&["tikvahpharma".into(), "101".into()]),
            key(&["101".into(), "tikvahpharma".into()])
        );
    }
}
