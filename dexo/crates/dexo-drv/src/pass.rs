//! Pass pipeline
//!
//! A [`Pass`] binds its options from a [`PassConfig`] and then rewrites the
//! whole [`Scope`], reporting counters through a [`MetricsSink`]. The
//! [`PassManager`] runs passes in registration order and keeps the metrics
//! of each one.

use crate::config::PassConfig;
use crate::error::PassError;
use anyhow::Context;
use dexo_ir::Scope;
use indexmap::IndexMap;

/// Receiver of named counters
pub trait MetricsSink {
    fn incr_metric(&mut self, name: &str, value: i64);
}

/// Whole-program transformation
pub trait Pass: Send {
    fn name(&self) -> &'static str;

    /// Read this pass's options; called once before [`run_pass`](Self::run_pass)
    fn bind_config(&mut self, config: &PassConfig) -> crate::error::Result<()>;

    fn run_pass(&mut self, scope: &mut Scope, metrics: &mut dyn MetricsSink);
}

/// Counters of one pass, in the order they were first reported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metrics {
    values: IndexMap<String, i64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.values.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl MetricsSink for Metrics {
    fn incr_metric(&mut self, name: &str, value: i64) {
        *self.values.entry(name.to_string()).or_insert(0) += value;
    }
}

#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    metrics: IndexMap<&'static str, Metrics>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Bind every pass to `config`, then run them in order over `scope`
    pub fn run(&mut self, scope: &mut Scope, config: &PassConfig) -> anyhow::Result<()> {
        for configured in config.passes() {
            if !self.passes.iter().any(|pass| pass.name() == configured) {
                return Err(PassError::UnknownPass(configured.to_string()).into());
            }
        }
        for pass in &mut self.passes {
            pass.bind_config(config)
                .with_context(|| format!("Failed to configure {}", pass.name()))?;
        }

        for pass in &mut self.passes {
            log::info!("Running {}", pass.name());
            let metrics = self.metrics.entry(pass.name()).or_default();
            pass.run_pass(scope, metrics);
        }
        Ok(())
    }

    /// Metrics reported by `pass` in previous runs
    pub fn metrics(&self, pass: &str) -> Option<&Metrics> {
        self.metrics.get(pass)
    }

    pub fn all_metrics(&self) -> impl Iterator<Item = (&'static str, &Metrics)> + '_ {
        self.metrics.iter().map(|(name, metrics)| (*name, metrics))
    }
}
