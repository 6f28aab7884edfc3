//! Shared helpers for library integration tests.
//!
//! The test project mirrors a typical layout: a `common` node turns a
//! `common.decl` block list into `common.bemdecl.js`, and `pages/index`
//! turns that into `index.deps.js`. Both technologies reuse cached results
//! when neither their input nor their output changed on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use async_trait::async_trait;
use enb_lib::cache::CacheStore;
use enb_lib::{
  BuildContext, NodeInfo, ProjectConfig, ProjectConfigBuilder, SharedResource, TargetValue, Technology,
};
use serde_json::json;
use tempfile::TempDir;

/// Isolated project directory.
pub struct TestProject {
  pub temp: TempDir,
}

impl TestProject {
  /// Project with `common/common.decl` listing `blocks` and an empty `pages/index`.
  pub fn new(blocks: &[&str]) -> Self {
    let project = Self {
      temp: TempDir::new().unwrap(),
    };
    project.write_file("common/common.decl", &blocks.join("\n"));
    std::fs::create_dir_all(project.root().join("pages/index")).unwrap();
    project
  }

  pub fn root(&self) -> PathBuf {
    let p = self.temp.path().to_path_buf();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn path(&self, relative: &str) -> PathBuf {
    self.root().join(relative)
  }

  /// Write a file relative to the project root.
  pub fn write_file(&self, relative: &str, content: &str) {
    let path = self.path(relative);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Rewrite a file and push its mtime forward so the change is visible
  /// regardless of filesystem timestamp granularity.
  pub fn modify_file(&self, relative: &str, content: &str) {
    self.write_file(relative, content);
    let file = std::fs::File::options().write(true).open(self.path(relative)).unwrap();
    file
      .set_modified(SystemTime::now() + Duration::from_secs(10))
      .unwrap();
  }

  pub fn read_json(&self, relative: &str) -> serde_json::Value {
    let content = std::fs::read_to_string(self.path(relative)).unwrap();
    serde_json::from_str(&content).unwrap()
  }
}

/// How often each technology actually produced its output.
#[derive(Clone, Default)]
pub struct Counters {
  pub bemdecl: Arc<AtomicUsize>,
  pub deps: Arc<AtomicUsize>,
}

impl Counters {
  pub fn bemdecl(&self) -> usize {
    self.bemdecl.load(Ordering::SeqCst)
  }

  pub fn deps(&self) -> usize {
    self.deps.load(Ordering::SeqCst)
  }
}

/// Whether both files are unchanged since they were recorded.
fn is_fresh(cache: &CacheStore, source: &Path, output: &Path) -> bool {
  !cache.needs_rebuild_file("source", source) && !cache.needs_rebuild_file("output", output)
}

fn record(cache: &CacheStore, source: &Path, output: &Path) -> anyhow::Result<()> {
  cache.record_file("source", source)?;
  cache.record_file("output", output)?;
  Ok(())
}

/// Produces `?.bemdecl.js` from the block list in `?.decl`.
pub struct BemdeclTech {
  produced: Arc<AtomicUsize>,
  target: String,
  source: PathBuf,
  output: PathBuf,
}

impl BemdeclTech {
  pub fn new(produced: Arc<AtomicUsize>) -> Self {
    Self {
      produced,
      target: String::new(),
      source: PathBuf::new(),
      output: PathBuf::new(),
    }
  }
}

#[async_trait]
impl Technology for BemdeclTech {
  fn name(&self) -> &str {
    "bemdecl"
  }

  fn configure(&mut self, node: &NodeInfo) -> anyhow::Result<()> {
    self.target = node.unmask_target_name("?.bemdecl.js");
    self.source = node.dir().join(node.unmask_target_name("?.decl"));
    self.output = node.dir().join(&self.target);
    Ok(())
  }

  fn targets(&self) -> Vec<String> {
    vec![self.target.clone()]
  }

  async fn build(&self, ctx: &BuildContext) -> anyhow::Result<Option<TargetValue>> {
    let cache = ctx.cache()?;
    let value = json!(self.output.to_string_lossy());
    if is_fresh(&cache, &self.source, &self.output) {
      ctx.mark_valid(&self.target, value);
      return Ok(None);
    }

    let decl = tokio::fs::read_to_string(&self.source)
      .await
      .with_context(|| format!("failed to read {}", self.source.display()))?;
    let blocks: Vec<&str> = decl.lines().filter(|line| !line.trim().is_empty()).collect();
    tokio::fs::write(&self.output, json!({ "blocks": blocks }).to_string()).await?;

    self.produced.fetch_add(1, Ordering::SeqCst);
    record(&cache, &self.source, &self.output)?;
    Ok(Some(value))
  }

  async fn clean(&self, _ctx: &BuildContext) -> anyhow::Result<()> {
    if self.output.exists() {
      tokio::fs::remove_file(&self.output).await?;
    }
    Ok(())
  }
}

/// Produces `?.deps.js` from a bemdecl target of another node.
pub struct DepsTech {
  produced: Arc<AtomicUsize>,
  from_node: String,
  from_target: String,
  target: String,
  output: PathBuf,
}

impl DepsTech {
  pub fn new(produced: Arc<AtomicUsize>, from_node: &str, from_target: &str) -> Self {
    Self {
      produced,
      from_node: from_node.to_string(),
      from_target: from_target.to_string(),
      target: String::new(),
      output: PathBuf::new(),
    }
  }
}

#[async_trait]
impl Technology for DepsTech {
  fn name(&self) -> &str {
    "deps"
  }

  fn configure(&mut self, node: &NodeInfo) -> anyhow::Result<()> {
    self.target = node.unmask_target_name("?.deps.js");
    self.output = node.dir().join(&self.target);
    Ok(())
  }

  fn targets(&self) -> Vec<String> {
    vec![self.target.clone()]
  }

  async fn build(&self, ctx: &BuildContext) -> anyhow::Result<Option<TargetValue>> {
    let values = ctx.require_node_sources(&self.from_node, &[&self.from_target]).await?;
    let source = PathBuf::from(values[0].as_str().context("bemdecl value is not a path")?);

    // The bemdecl is rewritten whenever its node rebuilds, so compare contents.
    let cache = ctx.cache()?;
    let value = json!(self.output.to_string_lossy());
    if !cache.needs_rebuild_content("source", &source) && !cache.needs_rebuild_file("output", &self.output) {
      ctx.mark_valid(&self.target, value);
      return Ok(None);
    }

    let bemdecl: serde_json::Value = serde_json::from_str(&tokio::fs::read_to_string(&source).await?)?;
    tokio::fs::write(&self.output, json!({ "deps": bemdecl["blocks"] }).to_string()).await?;

    self.produced.fetch_add(1, Ordering::SeqCst);
    record(&cache, &source, &self.output)?;
    Ok(Some(value))
  }
}

/// Produces a constant target without touching the filesystem.
pub struct ConstantTech {
  pub target: &'static str,
  pub value: &'static str,
}

#[async_trait]
impl Technology for ConstantTech {
  fn name(&self) -> &str {
    "constant"
  }

  fn targets(&self) -> Vec<String> {
    vec![self.target.to_string()]
  }

  async fn build(&self, _ctx: &BuildContext) -> anyhow::Result<Option<TargetValue>> {
    Ok(Some(json!(self.value)))
  }
}

/// Process-wide table shared by every `IndexTech`.
pub struct BlockIndex {
  teardowns: Arc<AtomicUsize>,
}

impl SharedResource for BlockIndex {
  fn destruct(&self) {
    self.teardowns.fetch_add(1, Ordering::SeqCst);
  }
}

/// Resolves `?.index` through the shared `BlockIndex`.
pub struct IndexTech {
  pub created: Arc<AtomicUsize>,
  pub teardowns: Arc<AtomicUsize>,
}

#[async_trait]
impl Technology for IndexTech {
  fn name(&self) -> &str {
    "index"
  }

  fn targets(&self) -> Vec<String> {
    vec!["?.index".to_string()]
  }

  async fn build(&self, ctx: &BuildContext) -> anyhow::Result<Option<TargetValue>> {
    let created = self.created.clone();
    let teardowns = self.teardowns.clone();
    ctx
      .shared_resources()
      .get("block-index", || async move {
        created.fetch_add(1, Ordering::SeqCst);
        BlockIndex { teardowns }
      })
      .await?;
    Ok(Some(json!(ctx.node().path())))
  }
}

/// `common` produces the bemdecl, `pages/index` the deps plus an unrelated css target.
pub fn project(counters: &Counters) -> Arc<dyn ProjectConfig> {
  let bemdecl = counters.bemdecl.clone();
  let deps = counters.deps.clone();
  Arc::new(
    ProjectConfigBuilder::new()
      .node("common", move |_, cfg| {
        cfg.add_tech(BemdeclTech::new(bemdecl.clone()));
      })
      .node("pages/index", move |_, cfg| {
        cfg
          .add_tech(DepsTech::new(deps.clone(), "common", "common.bemdecl.js"))
          .add_tech(ConstantTech {
            target: "?.css",
            value: "css",
          });
      })
      .build(),
  )
}
