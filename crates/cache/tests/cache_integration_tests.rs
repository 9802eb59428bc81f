//! Integration tests for the disk-backed memoization cache
//!
//! Exercises the orchestrator end to end: hit/miss transparency, key
//! stability across argument orderings, annotations, TTL-driven pruning,
//! and full clears.

use derpcache_cache::{Cache, CacheConfig, CallSpec, Error};
use serde_json::json;
use std::cell::Cell;
use std::time::Duration;
use tempfile::TempDir;

fn test_cache(tmp: &TempDir) -> Cache {
    Cache::new(CacheConfig::new(tmp.path().join(".derpcache")))
}

#[test]
fn test_hit_invokes_callable_exactly_once() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);
    let calls = Cell::new(0u32);
    let spec = CallSpec::new("tests.fetch").arg(7);

    let first: u32 = cache
        .cache(&spec, || {
            calls.set(calls.get() + 1);
            calls.get()
        })
        .unwrap();
    let second: u32 = cache
        .cache(&spec, || {
            calls.set(calls.get() + 1);
            calls.get()
        })
        .unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(first, second);
}

// A counter stands in for a nondeterministic callable: called directly it
// returns a new value every time, cached it must not.
#[test]
fn test_nondeterministic_callable_pinned_by_cache() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);
    let calls = Cell::new(0u32);
    let random_ish = || {
        calls.set(calls.get() + 1);
        calls.get()
    };
    let spec = CallSpec::new("tests.random");

    let first: u32 = cache.cache(&spec, random_ish).unwrap();
    let second: u32 = cache.cache(&spec, random_ish).unwrap();

    assert_eq!(first, second);
    assert_eq!(cache.get_index(false).unwrap().len(), 1);
}

#[test]
fn test_permuted_args_share_one_entry() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);
    let calls = Cell::new(0u32);
    let f = || {
        calls.set(calls.get() + 1);
        "result".to_string()
    };

    let spec1 = CallSpec::new("tests.f").arg(1).arg(2).kwarg("a", 3).kwarg("b", 4);
    let spec2 = CallSpec::new("tests.f").arg(2).arg(1).kwarg("b", 4).kwarg("a", 3);

    let first: String = cache.cache(&spec1, f).unwrap();
    let second: String = cache.cache(&spec2, f).unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(first, second);
    assert_eq!(cache.get_index(false).unwrap().len(), 1);
}

#[test]
fn test_distinct_callables_distinct_entries() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);

    let f_result: u32 = cache
        .cache(&CallSpec::new("tests.f").arg("x"), || 1)
        .unwrap();
    let g_result: u32 = cache
        .cache(&CallSpec::new("tests.g").arg("x"), || 2)
        .unwrap();

    assert_ne!(f_result, g_result);
    assert_eq!(cache.get_index(false).unwrap().len(), 2);
}

#[test]
fn test_unhashed_annotation_shares_the_entry() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);
    let calls = Cell::new(0u32);
    let f = || {
        calls.set(calls.get() + 1);
        calls.get()
    };

    let annotated = CallSpec::new("tests.f").arg(1).annotation("first run");
    let bare = CallSpec::new("tests.f").arg(1);

    let first: u32 = cache.cache(&annotated, f).unwrap();
    let second: u32 = cache.cache(&bare, f).unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(first, second);

    let index = cache.get_index(false).unwrap();
    assert_eq!(index.len(), 1);
    let (_, entry) = index.iter().next().unwrap();
    assert_eq!(entry.annotation.as_deref(), Some("first run"));
    assert!(!entry.annotation_hashed);
}

#[test]
fn test_hashed_annotation_splits_entries() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);
    let calls = Cell::new(0u32);
    let f = || {
        calls.set(calls.get() + 1);
        calls.get()
    };

    let run1 = CallSpec::new("tests.f")
        .arg(1)
        .annotation("run-1")
        .hash_annotation(true);
    let run2 = CallSpec::new("tests.f")
        .arg(1)
        .annotation("run-2")
        .hash_annotation(true);

    let first: u32 = cache.cache(&run1, f).unwrap();
    let repeat: u32 = cache.cache(&run1, f).unwrap();
    let other: u32 = cache.cache(&run2, f).unwrap();

    assert_eq!(first, repeat);
    assert_ne!(first, other);
    assert_eq!(calls.get(), 2);

    let index = cache.get_index(false).unwrap();
    assert_eq!(index.len(), 2);
    for (_, entry) in index.iter() {
        assert!(entry.annotation_hashed);
    }
}

#[test]
fn test_expired_entry_pruned_on_lookup() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);
    let calls = Cell::new(0u32);
    let f = || {
        calls.set(calls.get() + 1);
        calls.get()
    };
    let spec = CallSpec::new("tests.f")
        .arg("payload")
        .expires_after(Duration::from_secs(3600));

    let _: u32 = cache.cache(&spec, f).unwrap();
    let index = cache.get_index(false).unwrap();
    let (digest, entry) = index.iter().next().unwrap();
    let digest = digest.clone();

    // Backdate the entry past its TTL
    let mut backdated = entry.clone();
    backdated.called_at -= chrono::Duration::hours(2);
    let mut rewritten = index.clone();
    rewritten.insert(digest.clone(), backdated);
    rewritten.save(&cache.config().index_path()).unwrap();

    let pruned = cache.get_index(true).unwrap();

    assert!(pruned.is_empty());
    assert!(cache.get_by_digest::<u32>(&digest).is_err());

    // The next call is a fresh miss
    let _: u32 = cache.cache(&spec, f).unwrap();
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_unexpired_entry_survives_prune() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);
    let spec = CallSpec::new("tests.f")
        .arg("payload")
        .expires_after(Duration::from_secs(3600));

    let _: u32 = cache.cache(&spec, || 9).unwrap();
    let pruned = cache.get_index(true).unwrap();

    assert_eq!(pruned.len(), 1);
}

#[test]
fn test_no_orphans_after_prune() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);

    let _: u32 = cache
        .cache(
            &CallSpec::new("tests.keeper").expires_after(Duration::from_secs(3600)),
            || 1,
        )
        .unwrap();
    let _: u32 = cache
        .cache(
            &CallSpec::new("tests.goner").expires_after(Duration::from_secs(3600)),
            || 2,
        )
        .unwrap();

    // Backdate only the second entry
    let mut index = cache.get_index(false).unwrap();
    let goner_digest = index
        .iter()
        .find(|(_, e)| e.callable == "tests.goner")
        .map(|(d, _)| d.clone())
        .unwrap();
    let mut entry = index.get(&goner_digest).unwrap().clone();
    entry.called_at -= chrono::Duration::hours(2);
    index.insert(goner_digest.clone(), entry);
    index.save(&cache.config().index_path()).unwrap();

    let pruned = cache.get_index(true).unwrap();
    assert_eq!(pruned.len(), 1);

    // Every indexed digest has an object, and every file is either the
    // index or an indexed object
    let cache_dir = cache.config().cache_dir();
    let mut files: Vec<String> = std::fs::read_dir(cache_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    let mut expected: Vec<String> = pruned.iter().map(|(d, _)| d.clone()).collect();
    expected.push("index.json".to_string());
    expected.sort();
    assert_eq!(files, expected);
}

#[test]
fn test_clear_all_then_fresh_miss() {
    let tmp = TempDir::new().unwrap();
    // A marker keeps the ascent from deleting the temp root itself
    std::fs::write(tmp.path().join("keep.txt"), b"").unwrap();
    let cache = Cache::new(CacheConfig::new(tmp.path().join("nested/root/.derpcache")));
    let calls = Cell::new(0u32);
    let f = || {
        calls.set(calls.get() + 1);
        calls.get()
    };
    let spec = CallSpec::new("tests.f").arg(1);

    let first: u32 = cache.cache(&spec, f).unwrap();
    cache.clear_all().unwrap();

    assert!(cache.get_index(false).unwrap().is_empty());
    // The whole lazily-created chain is unwound up to the non-empty root
    assert!(!tmp.path().join("nested").exists());
    assert!(tmp.path().join("keep.txt").exists());

    let second: u32 = cache.cache(&spec, f).unwrap();
    assert_eq!(calls.get(), 2);
    assert_ne!(first, second);
}

#[test]
fn test_clear_all_on_missing_cache_is_ok() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);

    cache.clear_all().unwrap();
}

#[test]
fn test_get_by_digest() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);

    let stored: Vec<String> = cache
        .cache(&CallSpec::new("tests.f"), || {
            vec!["a".to_string(), "b".to_string()]
        })
        .unwrap();

    let index = cache.get_index(false).unwrap();
    let (digest, _) = index.iter().next().unwrap();
    let fetched: Vec<String> = cache.get_by_digest(digest).unwrap();

    assert_eq!(fetched, stored);

    let missing = cache.get_by_digest::<u32>("beefbeef").unwrap_err();
    assert!(matches!(missing, Error::NotFound { .. }));
}

#[test]
fn test_callable_error_is_not_cached() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);
    let spec = CallSpec::new("tests.flaky");

    let outcome: Result<u32, String> = cache
        .try_cache(&spec, || Err("upstream down".to_string()))
        .unwrap();
    assert_eq!(outcome, Err("upstream down".to_string()));
    assert!(cache.get_index(false).unwrap().is_empty());

    let outcome: Result<u32, String> = cache.try_cache(&spec, || Ok(5)).unwrap();
    assert_eq!(outcome, Ok(5));
    assert_eq!(cache.get_index(false).unwrap().len(), 1);
}

#[test]
fn test_complex_values_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);
    let spec = CallSpec::new("tests.report")
        .arg(json!({"window": {"from": "2024-01-01", "to": "2024-02-01"}}))
        .kwarg("include_totals", true);

    let value = json!({
        "rows": [{"id": 1, "tags": ["a", "b"]}, {"id": 2, "tags": []}],
        "totals": {"count": 2},
    });
    let stored: serde_json::Value = cache.cache(&spec, || value.clone()).unwrap();
    let reread: serde_json::Value = cache.cache(&spec, || unreachable!()).unwrap();

    assert_eq!(stored, value);
    assert_eq!(reread, value);
}

#[test]
fn test_wrapped_callable() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);
    let calls = Cell::new(0u32);
    let doubled = cache.wrap(
        "tests.doubled",
        |args: &[serde_json::Value], _kwargs: &serde_json::Map<String, serde_json::Value>| {
            calls.set(calls.get() + 1);
            args[0].as_i64().unwrap_or(0) * 2
        },
    );

    let kwargs = serde_json::Map::new();
    let first = doubled.call(&[json!(21)], &kwargs).unwrap();
    let again = doubled.call(&[json!(21)], &kwargs).unwrap();
    let other = doubled.call(&[json!(4)], &kwargs).unwrap();

    assert_eq!(first, 42);
    assert_eq!(again, 42);
    assert_eq!(other, 8);
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_entries_sorted_chronologically() {
    let tmp = TempDir::new().unwrap();
    let cache = test_cache(&tmp);

    for name in ["tests.one", "tests.two", "tests.three"] {
        let _: u32 = cache.cache(&CallSpec::new(name), || 0).unwrap();
    }

    // Backdate "tests.three" so insertion order and time order disagree
    let mut index = cache.get_index(false).unwrap();
    let digest = index
        .iter()
        .find(|(_, e)| e.callable == "tests.three")
        .map(|(d, _)| d.clone())
        .unwrap();
    let mut entry = index.get(&digest).unwrap().clone();
    entry.called_at -= chrono::Duration::hours(1);
    index.insert(digest, entry);
    index.save(&cache.config().index_path()).unwrap();

    let reloaded = cache.get_index(false).unwrap();
    let ordered: Vec<_> = reloaded
        .sorted_by_time()
        .into_iter()
        .map(|(_, e)| e.callable.clone())
        .collect();

    assert_eq!(ordered[0], "tests.three");
}
