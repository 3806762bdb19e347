//! End-to-end provisioning: validate, plan, execute.
//!
//! Nothing is sent to the cluster until the topology is valid and every shard
//! reference resolves. The only call made before that point is the read-only
//! shard directory lookup the plan needs.

use tracing::{info, warn};

use crate::admin::AdminClient;
use crate::config::ProvisionConfig;
use crate::engine::{PlanBuilder, ProvisionPlan};
use crate::error::{ProvisionError, Result};
use crate::executor::{Executor, RunReport};
use crate::shutdown::CancelToken;
use crate::topology::TopologySpec;

/// Every collection reached its target stage.
pub const EXIT_SUCCESS: i32 = 0;
/// At least one collection did not succeed, or the run could not start.
pub const EXIT_FAILURE: i32 = 1;
/// The topology is invalid or could not be planned; nothing was applied.
pub const EXIT_INVALID_SPEC: i32 = 2;

pub struct Provisioner<'a, C: AdminClient + ?Sized> {
    client: &'a C,
    config: ProvisionConfig,
    dry_run: bool,
    parallel: bool,
    cancel: CancelToken,
}

impl<'a, C: AdminClient + ?Sized> Provisioner<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            config: ProvisionConfig::default(),
            dry_run: false,
            parallel: false,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(mut self, config: ProvisionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Validate the topology and expand it against the live shard directory.
    pub fn plan(&self, spec: &TopologySpec) -> Result<ProvisionPlan> {
        let violations = spec.validate();
        if !violations.is_empty() {
            for violation in &violations {
                warn!(%violation, "invalid topology");
            }
            return Err(ProvisionError::Validation(violations));
        }

        let directory = self
            .client
            .shard_directory()
            .map_err(ProvisionError::Directory)?;
        info!(shards = ?directory.shards(), "fetched shard directory");

        Ok(PlanBuilder::new(&directory).build(spec)?)
    }

    /// Plan and apply. Per-collection failures are in the report; only errors
    /// that prevent the run from starting are returned as `Err`.
    pub fn run(&self, spec: &TopologySpec) -> Result<RunReport> {
        self.config
            .validate()
            .map_err(|err| ProvisionError::config(err.to_string()))?;

        let plan = self.plan(spec)?;
        info!(operations = plan.len(), "plan ready");

        let report = Executor::new(self.client)
            .with_config(self.config.clone())
            .dry_run(self.dry_run)
            .parallel(self.parallel)
            .with_cancel_token(self.cancel.clone())
            .apply(&plan);

        Ok(report)
    }
}
