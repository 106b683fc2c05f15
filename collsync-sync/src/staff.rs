//! Staff matching: which registry person, if any, a source staff entry is.
//!
//! Scoring weights:
//!
//! | signal                               | points |
//! |--------------------------------------|--------|
//! | email                                | 10     |
//! | full name equal                      | 10     |
//! | else one name contains the other     | 5      |
//! | else shared name token (5+ chars)    | 4      |
//! | phone (digits)                       | 3      |
//! | country                              | 3      |
//! | city                                 | 2      |
//! | position (partial: 1)                | 2      |
//! | fax, street, state, zip              | 1 each |
//!
//! Name or email agreement is mandatory: without it the score stays 0 and no
//! other field is considered. An IRN present on both sides decides outright,
//! across the linked and the global pool, before anything is scored.

use collsync_core::{
    config::StaffThresholds,
    ids,
    types::{Identifier, IdentifierType},
    Person, SourceStaff,
};

use crate::normalize::{normalize, normalize_opt, same_digits, same_text, tokens};

pub const EMAIL_SCORE: u32 = 10;
pub const EXACT_NAME_SCORE: u32 = 10;
pub const PARTIAL_NAME_SCORE: u32 = 5;
pub const NAME_TOKEN_SCORE: u32 = 4;

/// Staff decision for one entry.
#[derive(Debug, Clone, PartialEq)]
pub enum StaffMatch {
    /// No person reached the threshold.
    Create,
    Update(Person),
    /// Several persons tied at the best score.
    Conflict(Vec<Person>),
}

pub fn score(staff: &SourceStaff, person: &Person) -> u32 {
    let mut score = 0;

    if same_text(staff.email.as_deref(), person.email.as_deref()) {
        score += EMAIL_SCORE;
    }
    score += name_score(staff, person);
    if score == 0 {
        return 0;
    }

    if same_digits(staff.phone.as_deref(), person.phone.as_deref()) {
        score += 3;
    }
    if same_digits(staff.fax.as_deref(), person.fax.as_deref()) {
        score += 1;
    }

    let position = (
        normalize_opt(staff.position.as_deref()),
        normalize_opt(person.position.as_deref()),
    );
    if let (Some(a), Some(b)) = position {
        if a == b {
            score += 2;
        } else if a.contains(&b) || b.contains(&a) {
            score += 1;
        }
    }

    if let (Some(a), Some(b)) = (staff.address.as_ref(), person.address.as_ref()) {
        if let (Some(x), Some(y)) = (a.country.as_deref(), b.country.as_deref()) {
            if x.trim().eq_ignore_ascii_case(y.trim()) {
                score += 3;
            }
        }
        if same_text(a.city.as_deref(), b.city.as_deref()) {
            score += 2;
        }
        if same_text(a.street.as_deref(), b.street.as_deref()) {
            score += 1;
        }
        if same_text(a.province.as_deref(), b.province.as_deref()) {
            score += 1;
        }
        if same_text(a.postal_code.as_deref(), b.postal_code.as_deref()) {
            score += 1;
        }
    }
    score
}

fn name_score(staff: &SourceStaff, person: &Person) -> u32 {
    let theirs = normalize(&person.full_name());
    if theirs.is_empty() {
        return 0;
    }
    let full = normalize(&staff.full_name());
    let short = normalize(
        &[staff.first_name.as_deref(), staff.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" "),
    );
    if full.is_empty() {
        return 0;
    }
    if theirs == full || theirs == short {
        return EXACT_NAME_SCORE;
    }
    if theirs.contains(&full) || full.contains(&theirs) {
        return PARTIAL_NAME_SCORE;
    }
    let ours = tokens(&full, 5);
    if tokens(&theirs, 5).iter().any(|t| ours.contains(t)) {
        return NAME_TOKEN_SCORE;
    }
    0
}

/// Persons already carrying the staff entry's IRN, each listed once.
pub fn irn_matches<'a>(
    staff: &SourceStaff,
    pool: impl IntoIterator<Item = &'a Person>,
) -> Vec<&'a Person> {
    let Some(irn) = staff_irn(staff) else {
        return Vec::new();
    };
    let mut found: Vec<&Person> = Vec::new();
    for person in pool {
        let seen = found
            .iter()
            .any(|f| std::ptr::eq(*f, person) || (f.key.is_some() && f.key == person.key));
        if !seen && ids::contains_identifier(&person.identifiers, irn.id_type, &irn.value) {
            found.push(person);
        }
    }
    found
}

/// `true` when `person` already holds an IRN other than the staff entry's.
/// Merging the two would leave the person with two IRNs.
pub fn holds_other_irn(staff: &SourceStaff, person: &Person) -> bool {
    let Some(irn) = staff_irn(staff) else {
        return false;
    };
    person
        .identifiers
        .iter()
        .any(|i| i.id_type == IdentifierType::Irn && !i.value.eq_ignore_ascii_case(&irn.value))
}

fn staff_irn(staff: &SourceStaff) -> Option<Identifier> {
    staff
        .irn
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Identifier::irn)
}

/// All persons tied at the best score, provided it reaches `threshold`.
pub fn best_matches<'a>(
    staff: &SourceStaff,
    pool: impl IntoIterator<Item = &'a Person>,
    threshold: u32,
) -> Vec<&'a Person> {
    let mut best = 0;
    let mut winners = Vec::new();
    for person in pool {
        let s = score(staff, person);
        if s == 0 || s < threshold {
            continue;
        }
        if s > best {
            best = s;
            winners.clear();
        }
        if s == best {
            winners.push(person);
        }
    }
    winners
}

/// Map a candidate set onto the staff decision: 0 creates, 1 updates,
/// anything more is a conflict.
pub fn decide(matches: Vec<&Person>) -> StaffMatch {
    match matches.len() {
        0 => StaffMatch::Create,
        1 => StaffMatch::Update(matches[0].clone()),
        _ => StaffMatch::Conflict(matches.into_iter().cloned().collect()),
    }
}

/// IRN lookup over both pools first. Otherwise score the already-linked
/// persons, then the whole registry. A scored winner holding a different IRN
/// is never merged; it comes back as a conflict.
pub fn match_staff<'a>(
    staff: &SourceStaff,
    linked: &[&'a Person],
    global: &[&'a Person],
    thresholds: StaffThresholds,
) -> StaffMatch {
    let exact = irn_matches(staff, linked.iter().chain(global).copied());
    if !exact.is_empty() {
        return decide(exact);
    }

    let mut scored = best_matches(staff, linked.iter().copied(), thresholds.linked_threshold);
    if scored.is_empty() {
        scored = best_matches(staff, global.iter().copied(), thresholds.global_threshold);
    }
    if scored.iter().any(|p| holds_other_irn(staff, p)) {
        return StaffMatch::Conflict(scored.into_iter().cloned().collect());
    }
    decide(scored)
}
