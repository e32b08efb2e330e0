//! Scenario files: named series of timestamped points plus the queries to run.
//!
//! ```toml
//! queries = ["cpu", "cpu.sample(10)"]
//!
//! [series]
//! cpu = [[1, 0.5], [4, 0.75], [12, 0.5]]
//! ```

use std::{collections::BTreeMap, path::Path};

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use tickreplay::Time;

/// A single `[timestamp, value]` point.
pub type Point = (Time, Value);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub series: BTreeMap<String, Vec<Point>>,
    pub queries: Vec<String>,
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {path:?}"))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content).context("invalid TOML scenario"),
            Some("json") => serde_json::from_str(&content).context("invalid JSON scenario"),
            _ => anyhow::bail!("invalid scenario file extension: {path:?}"),
        }
    }
}
