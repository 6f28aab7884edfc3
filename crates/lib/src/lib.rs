//! enb-lib: incremental node/target build engine
//!
//! A project is a tree of nodes (directories). Technologies bound into a node
//! declare the targets they produce; requesting a target runs its owning
//! technology at most once per run, and technologies pull in targets of their
//! own or other nodes as they build. A persistent cache lets technologies
//! skip work whose inputs did not change.
//!
//! - `Platform`: owns nodes, the cache tree and shared resources
//! - `BuildNode`: per-node target state machine
//! - `Technology`: the plugin contract
//! - `CacheStore`: hierarchical file/value cache persisted between runs

pub mod cache;
pub mod config;
pub mod consts;
pub mod node;
pub mod platform;
pub mod profiler;
pub mod shared;
pub mod tech;
pub mod util;

pub use cache::CacheStore;
pub use config::{ConfigError, NodeConfig, ProjectConfig, ProjectConfigBuilder};
pub use node::{BuildNode, NodeInfo, TargetValue};
pub use platform::{BuildError, BuildReport, MakeError, Platform, PlatformConfig, make};
pub use shared::{SharedResource, SharedResources};
pub use tech::{BuildContext, Technology};
