use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use enb_lib::node::TargetState;
use enb_lib::{BuildError, MakeError, Platform, PlatformConfig, ProjectConfigBuilder, make};
use serde_json::json;

use super::common::{ConstantTech, Counters, IndexTech, TestProject, project};

const DEPS_TARGET: &str = "pages/index/index.deps.js";

#[tokio::test]
async fn first_run_builds_and_second_run_reuses_cache() {
  let env = TestProject::new(&["header", "footer"]);
  let counters = Counters::default();

  let report = make(env.root(), project(&counters), PlatformConfig::default(), &[DEPS_TARGET])
    .await
    .unwrap();
  assert_eq!(report.built_targets, vec![DEPS_TARGET]);
  assert!(report.rebuilt.contains(&DEPS_TARGET.to_string()));
  assert!(report.rebuilt.contains(&"common/common.bemdecl.js".to_string()));
  assert_eq!(counters.deps(), 1);
  assert_eq!(counters.bemdecl(), 1);
  assert_eq!(
    env.read_json("pages/index/index.deps.js"),
    json!({ "deps": ["header", "footer"] })
  );
  assert!(env.path(".enb/tmp/cache.json").exists());

  let report = make(env.root(), project(&counters), PlatformConfig::default(), &[DEPS_TARGET])
    .await
    .unwrap();
  assert_eq!(report.built_targets, vec![DEPS_TARGET]);
  assert!(report.rebuilt.is_empty());
  assert!(report.valid.contains(&DEPS_TARGET.to_string()));
  assert_eq!(counters.deps(), 1);
  assert_eq!(counters.bemdecl(), 1);
}

#[tokio::test]
async fn changed_source_rebuilds_dependants() {
  let env = TestProject::new(&["header"]);
  let counters = Counters::default();
  make(env.root(), project(&counters), PlatformConfig::default(), &[DEPS_TARGET])
    .await
    .unwrap();

  env.modify_file("common/common.decl", "header\nmenu");
  let report = make(env.root(), project(&counters), PlatformConfig::default(), &[DEPS_TARGET])
    .await
    .unwrap();

  assert_eq!(report.rebuilt.len(), 2);
  assert_eq!(counters.bemdecl(), 2);
  assert_eq!(counters.deps(), 2);
  assert_eq!(env.read_json(DEPS_TARGET), json!({ "deps": ["header", "menu"] }));
}

#[tokio::test]
async fn disabled_cache_rebuilds_every_run() {
  let env = TestProject::new(&["header"]);
  let counters = Counters::default();
  let config = PlatformConfig {
    cache: false,
    ..PlatformConfig::default()
  };

  make(env.root(), project(&counters), config.clone(), &[DEPS_TARGET])
    .await
    .unwrap();
  make(env.root(), project(&counters), config, &[DEPS_TARGET])
    .await
    .unwrap();

  assert_eq!(counters.deps(), 2);
  assert!(!env.path(".enb/tmp/cache.json").exists());
}

#[tokio::test]
async fn failure_reaches_dependants_but_not_siblings() {
  let env = TestProject::new(&[]);
  std::fs::remove_file(env.path("common/common.decl")).unwrap();
  let counters = Counters::default();
  let platform = Platform::init(env.root(), project(&counters), PlatformConfig::default());

  let err = platform.build(&["pages/index"]).await.unwrap_err();
  match &err {
    BuildError::Technology { node, tech, source } => {
      assert_eq!(node, "common");
      assert_eq!(tech, "bemdecl");
      assert!(source.to_string().contains("common.decl"));
    }
    other => panic!("unexpected error: {other}"),
  }

  let index = platform.node("pages/index").unwrap();
  assert_eq!(index.target_state("index.css"), Some(TargetState::Settled));
  assert_eq!(index.require_sources(&["index.css"]).await.unwrap(), vec![json!("css")]);

  let dependant = index.require_sources(&["index.deps.js"]).await.unwrap_err();
  assert!(matches!(dependant, BuildError::Technology { ref tech, .. } if tech == "bemdecl"));
  assert_eq!(counters.deps(), 0);

  platform.destruct();
}

#[tokio::test]
async fn failed_make_still_destructs() {
  let env = TestProject::new(&[]);
  std::fs::remove_file(env.path("common/common.decl")).unwrap();
  let counters = Counters::default();

  let err = make(env.root(), project(&counters), PlatformConfig::default(), &[DEPS_TARGET])
    .await
    .unwrap_err();
  assert!(matches!(err, MakeError::Build(BuildError::Technology { .. })));
  assert!(!env.path(".enb/tmp/cache.json").exists());
}

#[tokio::test]
async fn missing_target_is_a_warning_in_lenient_mode() {
  let env = TestProject::new(&["header"]);
  let counters = Counters::default();
  let config = PlatformConfig {
    lenient: true,
    ..PlatformConfig::default()
  };

  let report = make(
    env.root(),
    project(&counters),
    config,
    &["pages/index/index.missing", "pages/index/index.css"],
  )
  .await
  .unwrap();

  assert_eq!(report.built_targets, vec!["pages/index/index.css"]);
  assert!(report.has_warnings());
  assert!(report.warnings[0].contains("index.missing"));
}

#[tokio::test]
async fn whole_node_request_builds_all_registered_targets() {
  let env = TestProject::new(&["header"]);
  let counters = Counters::default();

  let report = make(env.root(), project(&counters), PlatformConfig::default(), &["pages/index"])
    .await
    .unwrap();
  assert_eq!(report.built_targets, vec![DEPS_TARGET, "pages/index/index.css"]);
}

#[tokio::test]
async fn clean_removes_outputs() {
  let env = TestProject::new(&["header"]);
  let counters = Counters::default();
  let platform = Platform::init(env.root(), project(&counters), PlatformConfig::default());
  platform.build(&["common"]).await.unwrap();
  assert!(env.path("common/common.bemdecl.js").exists());

  let cleaned = platform.clean(&["common"]).await.unwrap();
  assert_eq!(cleaned, vec!["common/common.bemdecl.js"]);
  assert!(!env.path("common/common.bemdecl.js").exists());

  let err = platform.clean(&["common/common.unknown"]).await.unwrap_err();
  assert!(matches!(err, BuildError::Config(_)));
  platform.destruct();
}

#[tokio::test]
async fn shared_resource_is_created_once_and_torn_down_once() {
  let env = TestProject::new(&[]);
  let created = Arc::new(AtomicUsize::new(0));
  let teardowns = Arc::new(AtomicUsize::new(0));

  let (c, t) = (created.clone(), teardowns.clone());
  let config = Arc::new(
    ProjectConfigBuilder::new()
      .nodes("pages/*", move |_, cfg| {
        cfg.add_tech(IndexTech {
          created: c.clone(),
          teardowns: t.clone(),
        });
      })
      .build(),
  );
  env.write_file("pages/about/.keep", "");

  let platform = Platform::init(env.root(), config, PlatformConfig::default());
  let report = platform.build(&["pages/index", "pages/about"]).await.unwrap();
  assert_eq!(report.built_targets, vec!["pages/index/index.index", "pages/about/about.index"]);
  assert_eq!(created.load(Ordering::SeqCst), 1);

  platform.destruct();
  platform.destruct();
  assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn destruct_without_build_is_safe() {
  let env = TestProject::new(&[]);
  let platform = Platform::init(env.root(), project(&Counters::default()), PlatformConfig::default());
  platform.destruct();
  platform.destruct();

  assert!(platform.is_destructed());
  assert!(matches!(platform.get_or_create_node("common"), Err(BuildError::Destructed)));
}

#[tokio::test]
async fn root_node_targets_resolve_without_a_slash() {
  let env = TestProject::new(&[]);
  let config = Arc::new(
    ProjectConfigBuilder::new()
      .node("", |_, cfg| {
        cfg.add_tech(ConstantTech {
          target: "bundle.js",
          value: "bundle",
        });
      })
      .build(),
  );

  let platform = Platform::init(env.root(), config, PlatformConfig::default());
  let report = platform.build(&["bundle.js"]).await.unwrap();
  assert_eq!(report.built_targets, vec!["bundle.js"]);
  platform.destruct();
}
