//! Text normalization used by every comparison in the matcher.
//!
//! Lower-case, accents stripped via NFKD, punctuation turned into spaces,
//! whitespace collapsed. Phone-like values compare on digits only.

use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Generic words that say nothing about which institution a name refers to.
const STOP_WORDS: &[&str] = &[
    "herbarium",
    "collection",
    "collections",
    "museum",
    "university",
    "institute",
    "department",
    "national",
    "natural",
    "history",
    "science",
    "sciences",
];

pub fn normalize(s: &str) -> String {
    let folded: String = s
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `normalize` over an optional field; blank becomes `None`.
pub fn normalize_opt(s: Option<&str>) -> Option<String> {
    s.map(normalize).filter(|n| !n.is_empty())
}

pub fn digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Normalized tokens of at least `min_len` characters, stop words removed.
pub fn tokens(s: &str, min_len: usize) -> Vec<String> {
    normalize(s)
        .split(' ')
        .filter(|t| t.chars().count() >= min_len && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Loose equality of two optional values after normalization. Both sides must
/// be present.
pub fn same_text(a: Option<&str>, b: Option<&str>) -> bool {
    match (normalize_opt(a), normalize_opt(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

pub fn same_digits(a: Option<&str>, b: Option<&str>) -> bool {
    match (a.map(digits), b.map(digits)) {
        (Some(a), Some(b)) => !a.is_empty() && a == b,
        _ => false,
    }
}

/// Codes compare case-insensitively after trimming.
pub fn same_code(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    !a.is_empty() && a.eq_ignore_ascii_case(b)
}

/// Light name similarity: equal, one contains the other, or a shared
/// significant token of length 4 or more.
pub fn names_similar(a: &str, b: &str) -> bool {
    let (na, nb) = (normalize(a), normalize(b));
    if na.is_empty() || nb.is_empty() {
        return false;
    }
    if na == nb || na.contains(&nb) || nb.contains(&na) {
        return true;
    }
    let ta = tokens(a, 4);
    tokens(b, 4).iter().any(|t| ta.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn strips_accents_and_punctuation() {
        assert_eq!(normalize("  Jardim Botânico, Rio-de-Janeiro "), "jardim botanico rio de janeiro");
        assert_eq!(normalize("Müller"), "muller");
    }

    #[test]
    fn digits_only_phone_comparison() {
        assert!(same_digits(Some("+1 (212) 555-0100"), Some("1.212.555.0100")));
        assert!(!same_digits(Some("n/a"), Some("none")));
    }

    #[rstest]
    #[case("Vascular Plants", "vascular plants", true)]
    #[case("Vascular Plant Herbarium", "Vascular Plants", true)]
    #[case("Bryophyte Collection", "Bryophytes and Lichens", false)]
    #[case("Herbarium", "University Herbarium", true)]
    #[case("Natural History Museum", "Museum of Natural History", false)]
    #[case("Mycology", "", false)]
    fn name_similarity(#[case] a: &str, #[case] b: &str, #[case] expected: bool) {
        assert_eq!(names_similar(a, b), expected);
    }

    #[test]
    fn stop_words_never_count_as_shared_tokens() {
        assert!(tokens("University Herbarium of Foo", 4).is_empty());
    }

    #[test]
    fn codes_ignore_case_but_not_blank() {
        assert!(same_code("ny", " NY "));
        assert!(!same_code(" ", ""));
    }
}
