//! Name normalization for tags and remote group references.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").expect("valid regex"));

static NOT_NAME_CHAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_-]").expect("valid regex"));

/// Maximum length of a munged catalog name.
const MAX_NAME_LENGTH: usize = 100;

/// Decomposes accented characters and drops everything outside ASCII.
///
/// `"Café"` becomes `"Cafe"`; characters without an ASCII base are removed.
pub fn ascii_fold(input: &str) -> String {
    input.nfkd().filter(char::is_ascii).collect()
}

/// Normalizes a tag name into a lowercase ASCII slug.
///
/// Runs of non-word characters collapse to a single `-` and leading or
/// trailing separators are trimmed. May return an empty string when nothing
/// ASCII survives.
///
/// ```
/// use pomona_core::text::normalize_tag;
///
/// assert_eq!(normalize_tag("Café Résumé!!"), "cafe-resume");
/// assert_eq!(normalize_tag("  Air   Quality "), "air-quality");
/// ```
pub fn normalize_tag(name: &str) -> String {
    let folded = ascii_fold(name).to_lowercase();
    NON_WORD
        .replace_all(&folded, "-")
        .trim_matches('-')
        .to_string()
}

/// Turns a display name into a catalog URL name (`[a-z0-9_-]`, at most 100 chars).
pub fn munge_name(name: &str) -> String {
    let folded = ascii_fold(name).to_lowercase();
    let mut munged = NOT_NAME_CHAR.replace_all(&folded, "-").into_owned();
    munged.truncate(MAX_NAME_LENGTH);
    munged
}
