//! Tests against the real cre2 guest.
//!
//! Set `WASM_RE2_GUEST` to the path of the compiled guest module to run
//! them; each test returns early when it is unset.

use std::sync::Arc;
use std::thread;

use rand::Rng;
use wasm_re2::{
    Anchor, CompileOptions, PatternErrorKind, Re2Engine, RuntimeConfig, RuntimeError, Span,
};

fn guest_engine() -> Option<Re2Engine> {
    let path = std::env::var("WASM_RE2_GUEST").ok()?;
    let mut config = RuntimeConfig::default();
    config.engine.guest_path = Some(path);
    Some(Re2Engine::new(&config).unwrap())
}

fn assert_spans_in_bounds(spans: &[Span], len: usize) {
    for span in spans {
        if let Some(range) = span.range() {
            assert!(range.start <= range.end && range.end <= len, "{span:?}");
        }
    }
}

#[test]
fn test_offsets_stay_within_subject() {
    let Some(engine) = guest_engine() else { return };
    let pattern = engine.compile(r"(\w+)@(\w+)?\.(com|org)").unwrap();

    for subject in ["mail bob@example.com now", "x@.org", "héllo wörld@ü.org", ""] {
        if let Some(spans) = pattern.captures(subject).unwrap() {
            assert_eq!(spans.len(), 4);
            assert_spans_in_bounds(&spans, subject.len());
        }
    }
}

#[test]
fn test_longest_match() {
    let Some(engine) = guest_engine() else { return };

    let longest = engine
        .compile_with("a+?", CompileOptions::new().with_longest(true))
        .unwrap();
    assert_eq!(longest.find("aaa").unwrap(), Some(0..3));

    let pattern = engine
        .compile_with("a+", CompileOptions::new().with_longest(true))
        .unwrap();
    assert_eq!(pattern.find("aaa").unwrap(), Some(0..3));
}

#[test]
fn test_case_insensitive() {
    let Some(engine) = guest_engine() else { return };
    let pattern = engine
        .compile_with("hello", CompileOptions::new().with_case_insensitive(true))
        .unwrap();

    assert_eq!(pattern.find("say HeLLo").unwrap(), Some(4..9));
}

#[test]
fn test_unmatched_group_after_reuse() {
    let Some(engine) = guest_engine() else { return };
    let pattern = engine.compile("(x)?y").unwrap();

    for _ in 0..3 {
        let spans = pattern.captures("xy").unwrap().unwrap();
        assert_eq!(spans, vec![Span::new(0, 2), Span::new(0, 1)]);

        let spans = pattern.captures("y").unwrap().unwrap();
        assert_eq!(spans, vec![Span::new(0, 1), Span::UNMATCHED]);
    }
}

#[test]
fn test_anchored_match() {
    let Some(engine) = guest_engine() else { return };
    let pattern = engine.compile(r"\d+").unwrap();

    assert!(
        pattern
            .captures_at("ab12", 0, 4, Anchor::AnchorStart)
            .unwrap()
            .is_none()
    );
    let spans = pattern
        .captures_at("ab12", 2, 4, Anchor::AnchorBoth)
        .unwrap()
        .unwrap();
    assert_eq!(spans, vec![Span::new(2, 4)]);
}

#[test]
fn test_concurrent_randomized_subjects() {
    let Some(engine) = guest_engine() else { return };
    let pattern = Arc::new(engine.compile(r"(\d+)-(\d+)").unwrap());

    let mut rng = rand::thread_rng();
    let subjects: Vec<String> = (0..64)
        .map(|_| {
            let len = rng.gen_range(0..40);
            (0..len)
                .map(|_| char::from(b"0123456789-ab "[rng.gen_range(0..14)]))
                .collect()
        })
        .collect();
    let sequential: Vec<_> = subjects
        .iter()
        .map(|s| pattern.captures(s).unwrap())
        .collect();

    let subjects = Arc::new(subjects);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pattern = Arc::clone(&pattern);
            let subjects = Arc::clone(&subjects);
            thread::spawn(move || {
                subjects
                    .iter()
                    .map(|s| pattern.captures(s).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), sequential);
    }
}

#[test]
fn test_named_groups() {
    let Some(engine) = guest_engine() else { return };
    let pattern = engine.compile(r"(?P<year>\d+)-(?P<month>\d+)").unwrap();

    assert_eq!(
        pattern.group_names().unwrap(),
        vec![("year".to_string(), 1), ("month".to_string(), 2)]
    );

    let mut groups = pattern.named_groups().unwrap();
    assert_eq!(groups.by_ref().count(), 2);
    assert!(groups.next().is_none());
    groups.delete().unwrap();
}

#[test]
fn test_replace_digits() {
    let Some(engine) = guest_engine() else { return };
    let pattern = engine.compile(r"\d").unwrap();

    assert_eq!(
        pattern.replace_all("a1b2c3", "").unwrap(),
        (b"abc".to_vec(), true)
    );
    assert_eq!(
        pattern.replace_all("abc", "").unwrap(),
        (b"abc".to_vec(), false)
    );
}

#[test]
fn test_replace_with_group_reference() {
    let Some(engine) = guest_engine() else { return };
    let pattern = engine.compile(r"(\w+)@(\w+)").unwrap();

    let (out, replaced) = pattern.replace_all("bob@host", r"\2 at \1").unwrap();
    assert!(replaced);
    assert_eq!(out, b"host at bob");
}

#[test]
fn test_invalid_patterns() {
    let Some(engine) = guest_engine() else { return };

    let cases = [
        ("a(b", PatternErrorKind::MissingParen),
        ("[a", PatternErrorKind::MissingBracket),
        ("*a", PatternErrorKind::RepeatArgument),
        ("a\\", PatternErrorKind::TrailingBackslash),
    ];

    for (source, kind) in cases {
        match engine.compile(source) {
            Err(RuntimeError::InvalidPattern(err)) => assert_eq!(err.kind, kind, "{source}"),
            other => panic!("expected invalid pattern for {source}, got {other:?}"),
        }
    }

    // Rejections leave the pool healthy
    assert_eq!(engine.pool_stats().discarded, 0);
    assert!(engine.compile("ok").is_ok());
}
