use errorgraph_cache::{CacheConfig, CacheSettings, ErrorCache};
use errorgraph_core::{ErrorCategory, ErrorLocation, Severity, UnifiedError};
use std::sync::Arc;
use std::time::Duration;

fn error(file: &str, line: u32) -> UnifiedError {
    UnifiedError::new(
        "'os' imported but unused",
        Severity::Warning,
        ErrorCategory::Unused,
        ErrorLocation::new(file, line, 1),
        "flake8",
        Some("F401".to_string()),
    )
}

#[tokio::test]
async fn test_concurrent_access() {
    let cache = Arc::new(ErrorCache::new(CacheConfig {
        max_entries: 64,
        default_ttl: Duration::from_secs(60),
    }));

    let mut handles = Vec::new();
    for worker in 0..8u32 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..8u32 {
                let file = format!("pkg/mod_{worker}_{i}.py");
                cache.set(&file, vec![error(&file, i + 1)]);
                assert!(cache.get(&file).is_some());
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(cache.len(), 64);
    let stats = cache.stats();
    assert_eq!(stats.hits, 64);
    assert_eq!(stats.evictions, 0);
}

#[tokio::test]
async fn test_capacity_never_exceeded() {
    let cache = ErrorCache::new(CacheConfig {
        max_entries: 3,
        default_ttl: Duration::from_secs(60),
    });
    for i in 0..10u32 {
        let file = format!("f{i}.py");
        cache.set(&file, vec![error(&file, 1)]);
        assert!(cache.len() <= 3);
    }
    assert_eq!(cache.stats().evictions, 7);
    assert_eq!(
        cache.keys(),
        vec!["f7.py".to_string(), "f8.py".to_string(), "f9.py".to_string()]
    );
}

#[tokio::test]
async fn test_ttl_from_settings() {
    let settings = CacheSettings {
        ttl_secs: 0,
        capacity: 8,
    };
    let cache = ErrorCache::new(CacheConfig::from(&settings));
    cache.set("a.py", vec![error("a.py", 1)]);
    // A zero TTL entry is already stale on the next read.
    assert!(cache.get("a.py").is_none());
    assert_eq!(cache.stats().misses, 1);
}

#[test]
fn test_empty_error_lists_are_cached() {
    let cache = ErrorCache::default();
    cache.set("clean.py", Vec::new());
    let hit = cache.get("clean.py").expect("cached");
    assert!(hit.is_empty());
    assert_eq!(cache.stats().hit_rate(), 1.0);
}
