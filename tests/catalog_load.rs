// tests/catalog_load.rs
//
// Catalog loading through configuration and the background watcher.
// Env-mutating tests are serialized.

use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serial_test::serial;

use balanced_feed::cache::TieredCache;
use balanced_feed::catalog::CatalogHandle;
use balanced_feed::config::{AppConfig, ProviderKind};
use balanced_feed::fallback::FallbackStage;
use balanced_feed::scheduler::{Scheduler, SchedulerConfig};
use balanced_feed::{AppState, BiasCoordinate};

const FIVE: &str = r#"[
    {"id":"a","name":"Alpha","x":-0.5,"y":0},
    {"id":"b","name":"Beta","x":0.5,"y":0},
    {"id":"c","name":"Gamma","x":0,"y":0.5},
    {"id":"d","name":"Delta","x":0,"y":-0.5},
    {"id":"e","name":"Epsilon","x":0.1,"y":0.1}
]"#;

const ARTICLES: &str = r#"[
    {"title":"A1","url":"https://a.example/1","source":{"id":"a","name":"Alpha"}}
]"#;

#[test]
#[serial]
fn app_state_from_config_files() {
    let dir = tempfile::tempdir().unwrap();
    let sources = dir.path().join("sources.json");
    let articles = dir.path().join("articles.json");
    let config = dir.path().join("newsfeed.toml");
    fs::write(&sources, FIVE).unwrap();
    fs::write(&articles, ARTICLES).unwrap();
    fs::write(
        &config,
        format!(
            "[catalog]\nmin_active = 5\n\n[provider]\nkind = \"fixture\"\nfixture_path = {:?}\n",
            articles.display().to_string()
        ),
    )
    .unwrap();

    std::env::set_var("NEWSFEED_CONFIG_PATH", &config);
    std::env::set_var("CATALOG_PATH", &sources);

    let cfg = AppConfig::load().unwrap();
    assert_eq!(cfg.provider.kind, ProviderKind::Fixture);
    assert_eq!(cfg.catalog.path, sources);

    let state = AppState::from_config(&cfg).unwrap();
    let snap = state.catalog.snapshot();
    assert_eq!(snap.origin, FallbackStage::Primary);
    assert_eq!(snap.len(), 5);

    std::env::remove_var("NEWSFEED_CONFIG_PATH");
    std::env::remove_var("CATALOG_PATH");
}

#[test]
#[serial]
fn fixture_provider_without_path_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("newsfeed.toml");
    fs::write(&config, "[provider]\nkind = \"fixture\"\n").unwrap();
    std::env::set_var("NEWSFEED_CONFIG_PATH", &config);

    let cfg = AppConfig::load().unwrap();
    assert!(AppState::from_config(&cfg).is_err());

    std::env::remove_var("NEWSFEED_CONFIG_PATH");
}

#[test]
fn unreadable_catalog_falls_back_to_built_in() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sources.json");
    fs::write(&path, r#"[{"id":"only","name":"Only","x":0,"y":0}]"#).unwrap();

    let handle = CatalogHandle::open(path, 4);
    let snap = handle.snapshot();
    assert_eq!(snap.origin, FallbackStage::CatalogFallback);
    assert_eq!(snap.len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watcher_reloads_on_file_change() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sources.json");
    fs::write(&path, FIVE).unwrap();

    let handle = CatalogHandle::open(path.clone(), 4);
    assert_eq!(handle.snapshot().len(), 5);

    let scheduler = Scheduler::start(
        Arc::new(TieredCache::memory_only(8)),
        handle.clone(),
        SchedulerConfig {
            sweep_every: Duration::from_secs(60),
            catalog_poll: Some(Duration::from_millis(50)),
        },
    );
    // let the watcher record the initial mtime
    tokio::time::sleep(Duration::from_millis(200)).await;

    let four: Vec<serde_json::Value> = serde_json::from_str::<Vec<serde_json::Value>>(FIVE)
        .unwrap()
        .into_iter()
        .take(4)
        .collect();
    fs::write(&path, serde_json::to_string(&four).unwrap()).unwrap();
    // bump mtime explicitly so coarse filesystem timestamps still register a change
    let f = fs::File::options().write(true).open(&path).unwrap();
    f.set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();
    drop(f);

    let mut reloaded = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if handle.snapshot().len() == 4 {
            reloaded = true;
            break;
        }
    }
    assert!(reloaded, "watcher should pick up the rewritten catalog");

    // selections use the fresh snapshot
    let selector = balanced_feed::SourceSelector::new(handle.clone(), Default::default());
    let ids: Vec<String> = selector
        .pick(BiasCoordinate::ORIGIN, 2, 2, None)
        .into_iter()
        .filter(|s| !s.is_fallback)
        .map(|s| s.source.id)
        .collect();
    assert!(!ids.contains(&"e".to_string()));

    scheduler.shutdown().await;
}
