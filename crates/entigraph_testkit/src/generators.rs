//! Property-based test generators using proptest.
//!
//! Strategies come in valid/invalid pairs for the bookstore rules so tests
//! can check both sides of each constraint.

use entigraph_core::EntityId;
use proptest::prelude::*;

/// Strategy for entity ids in allocation range.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    (1u64..1_000_000).prop_map(EntityId::new)
}

/// Author names without the forbidden `?` and `!` characters.
pub fn author_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,12}( [A-Z]\\.)?( [A-Z][a-z]{1,12})?")
        .expect("Invalid regex")
}

/// Author names containing at least one forbidden character.
pub fn forbidden_name_strategy() -> impl Strategy<Value = String> {
    (author_name_strategy(), prop::sample::select(vec!['?', '!']), any::<prop::sample::Index>())
        .prop_map(|(name, bad, at)| {
            let mut chars: Vec<char> = name.chars().collect();
            let pos = at.index(chars.len() + 1);
            chars.insert(pos, bad);
            chars.into_iter().collect()
        })
}

/// Countries satisfying `length(3..=56)` and `[A-Za-z.,]+`.
pub fn country_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z.,]{3,56}").expect("Invalid regex")
}

/// Countries that break the length bounds while matching the pattern.
pub fn country_bad_length_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::string::string_regex("[A-Za-z]{1,2}").expect("Invalid regex"),
        prop::string::string_regex("[A-Za-z]{57,80}").expect("Invalid regex"),
    ]
}

/// Birth or death years that pass `max(2019)`.
pub fn valid_year_strategy() -> impl Strategy<Value = i64> {
    1000i64..=2019
}

/// Years rejected by `max(2019)`.
pub fn future_year_strategy() -> impl Strategy<Value = i64> {
    2020i64..=9999
}
