//! Serialisation round trips: a saved matcher must reload byte-identical
//! and keep identifying, with automata rebuilt lazily on first scan.

mod common;

use common::{identify, indexes, matcher, SAMPLE_TWO};
use sigscan::Matcher;

#[test]
fn save_load_save_is_stable() {
    let m = matcher();
    let bytes = m.save().unwrap();
    assert!(bytes.len() > 100, "implausibly small: {} bytes", bytes.len());
    let loaded = Matcher::load(&bytes).unwrap();
    assert_eq!(loaded.save().unwrap(), bytes);
    // the diagnostic summaries agree too
    assert_eq!(loaded.to_string(), m.to_string());
}

#[test]
fn loaded_matcher_still_identifies() {
    let loaded = Matcher::load(&matcher().save().unwrap()).unwrap();
    assert_eq!(loaded.len(), 6);
    let results = identify(&std::sync::Arc::new(loaded), SAMPLE_TWO);
    assert_eq!(indexes(&results), vec![0, 1, 2, 3, 4], "results: {results:?}");
}
