//! Identifier webalization.
//!
//! Storage stores column names the way it received them at creation time
//! after applying the same normalization, so configured names and stored names
//! are compared through [`normalize`] rather than byte equality.

use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::backend::{Backend, DEFAULT_MAX_IDENTIFIER_LENGTH};

/// Normalize `name` with the default identifier length limit.
pub fn normalize(name: &str) -> String {
    normalize_with_limit(name, DEFAULT_MAX_IDENTIFIER_LENGTH)
}

/// Normalize `name` with the identifier length limit of `backend`.
pub fn normalize_for(name: &str, backend: Backend) -> String {
    normalize_with_limit(name, backend.max_identifier_length())
}

/// Decompose to NFKD and drop combining marks, lowercase, replace every
/// character outside `[a-z0-9_]` with `_`, and truncate to `max_length`
/// characters.
pub fn normalize_with_limit(name: &str, max_length: usize) -> String {
    let mut normalized = String::with_capacity(name.len());
    for ch in name.trim().nfkd().filter(|ch| !is_combining_mark(*ch)) {
        match ch {
            'a'..='z' | '0'..='9' | '_' => normalized.push(ch),
            'A'..='Z' => normalized.push(ch.to_ascii_lowercase()),
            other => match undecomposable(other) {
                Some(ascii) => normalized.push_str(ascii),
                None => normalized.push('_'),
            },
        }
    }
    normalized.truncate(max_length);
    normalized
}

/// Two names denote the same identifier iff their normalized forms match.
pub fn same_identifier(left: &str, right: &str) -> bool {
    normalize(left) == normalize(right)
}

pub fn normalize_all<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().map(normalize).collect()
}

pub fn normalize_all_for<'a, I>(names: I, backend: Backend) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    names
        .into_iter()
        .map(|name| normalize_for(name, backend))
        .collect()
}

/// Latin letters without a canonical or compatibility decomposition.
fn undecomposable(ch: char) -> Option<&'static str> {
    let ascii = match ch {
        'ß' => "ss",
        'æ' | 'Æ' => "ae",
        'œ' | 'Œ' => "oe",
        'ø' | 'Ø' => "o",
        'ł' | 'Ł' => "l",
        'đ' | 'Đ' | 'ð' | 'Ð' => "d",
        'þ' | 'Þ' => "th",
        'ı' => "i",
        'ħ' | 'Ħ' => "h",
        'ŧ' | 'Ŧ' => "t",
        _ => return None,
    };
    Some(ascii)
}
