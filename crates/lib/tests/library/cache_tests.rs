use std::time::{Duration, SystemTime};

use enb_lib::cache::{CacheStore, collect_files, storage};
use enb_lib::{MakeError, PlatformConfig, make};
use serde_json::json;

use super::common::{Counters, TestProject, project};

const DEPS_TARGET: &str = "pages/index/index.deps.js";

#[tokio::test]
async fn corrupt_cache_file_means_full_rebuild() {
  let env = TestProject::new(&["header"]);
  let counters = Counters::default();
  env.write_file(".enb/tmp/cache.json", "{ truncated");

  let report = make(env.root(), project(&counters), PlatformConfig::default(), &[DEPS_TARGET])
    .await
    .unwrap();
  assert_eq!(report.rebuilt.len(), 2);

  let saved = storage::read_cache(&env.path(".enb/tmp/cache.json")).unwrap().unwrap();
  assert!(!saved.is_empty());
}

#[tokio::test]
async fn cache_dir_override_is_used() {
  let env = TestProject::new(&["header"]);
  let counters = Counters::default();
  let config = PlatformConfig {
    cache_dir: Some("build-cache".into()),
    ..PlatformConfig::default()
  };

  make(env.root(), project(&counters), config, &[DEPS_TARGET])
    .await
    .unwrap();
  assert!(env.path("build-cache/cache.json").exists());
  assert!(!env.path(".enb/tmp/cache.json").exists());
}

#[tokio::test]
async fn cache_save_failure_keeps_build_report() {
  let env = TestProject::new(&["header"]);
  env.write_file("blocker", "");
  let counters = Counters::default();
  let config = PlatformConfig {
    cache_dir: Some("blocker".into()),
    ..PlatformConfig::default()
  };

  let err = make(env.root(), project(&counters), config, &[DEPS_TARGET])
    .await
    .unwrap_err();
  match err {
    MakeError::CacheSave { report, .. } => assert_eq!(report.built_targets, vec![DEPS_TARGET]),
    other => panic!("unexpected error: {other}"),
  }
  assert_eq!(counters.deps(), 1);
}

#[test]
fn file_list_tracks_membership_and_mtime() {
  let env = TestProject::new(&[]);
  env.write_file("blocks/button/button.css", ".button {}");
  env.write_file("blocks/link/link.css", ".link {}");

  let cache = CacheStore::new().sub_store("pages/index");
  let files = collect_files(&env.path("blocks"), &[".css"]).unwrap();
  assert!(cache.needs_rebuild_file_list("css", &files));
  cache.record_file_list("css", &files);
  assert!(!cache.needs_rebuild_file_list("css", &collect_files(&env.path("blocks"), &[".css"]).unwrap()));

  env.write_file("blocks/menu/menu.css", ".menu {}");
  let grown = collect_files(&env.path("blocks"), &[".css"]).unwrap();
  assert!(cache.needs_rebuild_file_list("css", &grown));
  cache.record_file_list("css", &grown);

  let file = std::fs::File::options()
    .write(true)
    .open(env.path("blocks/link/link.css"))
    .unwrap();
  file
    .set_modified(SystemTime::now() + Duration::from_secs(10))
    .unwrap();
  let touched = collect_files(&env.path("blocks"), &[".css"]).unwrap();
  assert!(cache.needs_rebuild_file_list("css", &touched));
}

#[test]
fn memoized_values_survive_snapshots() {
  let cache = CacheStore::new();
  cache.sub_store("common").set("blocks", json!(["header"]));

  let restored = CacheStore::from_snapshot(cache.snapshot());
  assert_eq!(restored.sub_store("common").get("blocks"), Some(json!(["header"])));
  assert!(restored.sub_store("common").invalidate("blocks"));
  assert_eq!(restored.sub_store("common").get("blocks"), None);
}
