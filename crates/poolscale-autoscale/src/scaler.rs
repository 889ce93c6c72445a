//! The per-invocation driver.
//!
//! For each target pool: load the metadata record, initialize or update the
//! configuration if asked to, then dispatch exactly one state handler. Pools
//! are processed one after another; a failure on one pool is logged and the
//! rest still run.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use poolscale_platform::{Machine, MachineQuery, Platform, Pool};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn};

use crate::config::{ConfigUpdate, Defaults, ScaleConfig, resolve_machine_source};
use crate::error::{ConfigError, ScaleError, ScaleResult};
use crate::metadata::{MetadataRecord, keys};
use crate::state::ScaleState;

/// Result of one pool's invocation.
#[derive(Debug)]
pub struct PoolOutcome {
    pub pool: String,
    /// The state the pool was left in, or why the invocation aborted.
    pub result: ScaleResult<ScaleState>,
}

/// A pool and its record for the duration of one handler call.
pub(crate) struct PoolRun {
    pub pool: Pool,
    pub record: MetadataRecord,
}

/// Drives the scaling state machine for any number of pools.
pub struct Autoscaler<P> {
    pub(crate) platform: P,
    defaults: Defaults,
}

impl<P: Platform> Autoscaler<P> {
    /// Create a new autoscaler.
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            defaults: Defaults::default(),
        }
    }

    /// Set the fallbacks used when initializing a pool.
    pub fn with_defaults(mut self, defaults: Defaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Run one invocation over `pools`.
    ///
    /// Configuration updates are refused outright when more than one pool is
    /// targeted. Otherwise every pool gets an outcome, successful or not.
    pub fn run(&self, pools: &[String], update: &ConfigUpdate) -> ScaleResult<Vec<PoolOutcome>> {
        if pools.len() > 1 && !update.is_empty() {
            return Err(ConfigError::MultiPoolUpdate(pools.len()).into());
        }

        let mut outcomes = Vec::with_capacity(pools.len());
        for pool in pools {
            let span = info_span!("pool", pool = %pool);
            let _enter = span.enter();

            let result = self.run_pool(pool, update);
            match &result {
                Ok(state) => debug!(%state, "invocation finished"),
                Err(e) => error!(error = %e, "invocation failed"),
            }
            outcomes.push(PoolOutcome {
                pool: pool.clone(),
                result,
            });
        }
        Ok(outcomes)
    }

    /// Run one invocation for a single pool.
    pub fn run_pool(&self, name: &str, update: &ConfigUpdate) -> ScaleResult<ScaleState> {
        let pool = self.pool(name)?;
        match MetadataRecord::from_metadata(&pool.metadata)? {
            None => self.initialize(&pool, update)?,
            Some(record) => {
                if !update.is_empty() {
                    self.apply_update(&pool, record, update)?;
                }
            }
        }

        // Initialization and updates write the record; read it back fresh.
        let pool = self.pool(name)?;
        let mut record = MetadataRecord::from_metadata(&pool.metadata)?
            .ok_or(ScaleError::MissingMetadata(keys::STATE))?;
        if record.checkpoint.is_some() {
            info!(
                state = %record.state,
                clean_exit = record.clean_exit,
                checkpoint = ?record.checkpoint,
                "resuming from saga checkpoint"
            );
        } else {
            debug!(
                state = %record.state,
                clean_exit = record.clean_exit,
                "resuming"
            );
        }

        record.clean_exit = false;
        self.set_clean_exit(name, false)?;

        let mut run = PoolRun { pool, record };
        self.dispatch(&mut run)?;

        self.set_clean_exit(name, true)?;
        Ok(run.record.state)
    }

    fn dispatch(&self, run: &mut PoolRun) -> ScaleResult<()> {
        match run.record.state {
            ScaleState::MonitorUsage => self.monitor_usage(run),
            ScaleState::ProvisionMachines => self.provision_machines(run),
            ScaleState::MonitorProvision => self.monitor_provision(run),
            ScaleState::AddMachines => self.add_machines(run),
            ScaleState::RemoveMachines => self.remove_machines(run),
            ScaleState::MonitorDeleteMachines => self.monitor_delete_machines(run),
        }
    }

    // ── Configuration ──────────────────────────────────────────────

    fn initialize(&self, pool: &Pool, update: &ConfigUpdate) -> ScaleResult<()> {
        let catalog = update
            .catalog
            .as_deref()
            .ok_or_else(|| ConfigError::CatalogRequired(pool.name.clone()))?;
        let source = resolve_machine_source(&self.platform, pool, catalog)?;
        let config = ScaleConfig::initial(pool, source, update, &self.defaults)?;

        self.ensure_tag(&config.tag)?;
        let record = MetadataRecord::new(config);
        self.write_record(&pool.name, &record)?;

        info!(
            tag = %record.config.tag,
            catalog = %record.config.source.catalog_name,
            high = record.config.watermarks.high(),
            low = record.config.watermarks.low(),
            max_machines = ?record.config.max_machines,
            "pool initialized"
        );
        Ok(())
    }

    fn apply_update(
        &self,
        pool: &Pool,
        mut record: MetadataRecord,
        update: &ConfigUpdate,
    ) -> ScaleResult<()> {
        let source = match &update.catalog {
            Some(catalog) => Some(resolve_machine_source(&self.platform, pool, catalog)?),
            None => None,
        };
        let config = record.config.updated(update, source)?;

        if config.tag != record.config.tag {
            warn!(
                old = %record.config.tag,
                new = %config.tag,
                "ownership tag changed; machines carrying the old tag are no longer managed"
            );
            self.ensure_tag(&config.tag)?;
        }

        record.config = config;
        self.write_record(&pool.name, &record)?;
        info!(
            high = record.config.watermarks.high(),
            low = record.config.watermarks.low(),
            max_machines = ?record.config.max_machines,
            catalog = %record.config.source.catalog_name,
            "configuration updated"
        );
        Ok(())
    }

    /// Register the ownership tag, tolerating one that already exists.
    fn ensure_tag(&self, tag: &str) -> ScaleResult<()> {
        if self.platform.get_tag(tag)?.is_some() {
            warn!(
                %tag,
                "tag already exists; any machine already carrying it may be removed on scale-down"
            );
            return Ok(());
        }
        self.platform.create_tag(tag)?;
        info!(%tag, "ownership tag created");
        Ok(())
    }

    // ── Persistence ────────────────────────────────────────────────

    fn pool(&self, name: &str) -> ScaleResult<Pool> {
        self.platform
            .get_pool(name)?
            .ok_or_else(|| ScaleError::PoolNotFound(name.to_string()))
    }

    fn write_record(&self, pool: &str, record: &MetadataRecord) -> ScaleResult<()> {
        let (entries, cleared) = record.to_metadata()?;
        self.platform.set_pool_metadata(pool, &entries)?;
        self.platform.remove_pool_metadata(pool, &cleared)?;
        Ok(())
    }

    fn set_clean_exit(&self, pool: &str, clean: bool) -> ScaleResult<()> {
        let entries: BTreeMap<String, String> =
            [(keys::CLEAN_EXIT.to_string(), clean.to_string())].into();
        self.platform.set_pool_metadata(pool, &entries)?;
        Ok(())
    }

    /// Persist the record mid-handler without changing state.
    pub(crate) fn commit(&self, run: &PoolRun) -> ScaleResult<()> {
        self.write_record(&run.pool.name, &run.record)
    }

    /// Move to `next` and persist the record.
    pub(crate) fn transition(&self, run: &mut PoolRun, next: ScaleState) -> ScaleResult<()> {
        let from = run.record.state;
        if !from.can_transition_to(next) {
            return Err(ScaleError::Assertion(format!(
                "illegal transition {from} -> {next}"
            )));
        }
        run.record.state = next;
        self.commit(run)?;
        if from != next {
            info!(%from, to = %next, "state transition");
        }
        Ok(())
    }

    /// Break out of a state whose invariant no longer holds.
    ///
    /// Forgets the pending task and any checkpoint, returns the pool to
    /// `MonitorUsage`, and returns the violation as an error.
    pub(crate) fn fail_assertion(&self, run: &mut PoolRun, problem: String) -> ScaleError {
        error!(
            state = %run.record.state,
            %problem,
            "assertion failed, returning to usage monitoring"
        );
        run.record.clear_pending();
        run.record.checkpoint = None;
        if let Err(e) = self.transition(run, ScaleState::MonitorUsage) {
            return e;
        }
        ScaleError::Assertion(problem)
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Every machine carrying the ownership tag, in the pool or not.
    pub(crate) fn owned_machines(&self, run: &PoolRun) -> ScaleResult<Vec<Machine>> {
        Ok(self
            .platform
            .list_machines(&MachineQuery::default().tagged(&run.record.config.tag))?)
    }

    /// Owned pool members with no sessions.
    pub(crate) fn idle_machines(&self, run: &PoolRun) -> ScaleResult<Vec<Machine>> {
        Ok(self.platform.list_machines(
            &MachineQuery::default()
                .in_pool(&run.pool.name)
                .tagged(&run.record.config.tag)
                .with_sessions(0),
        )?)
    }

    // ── Periodic invocation ────────────────────────────────────────

    /// Invoke `pools` every `interval` until `shutdown` fires.
    ///
    /// Ticks missed while an invocation is still running are skipped, so
    /// invocations never overlap.
    pub async fn run_periodic(
        &self,
        pools: &[String],
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            interval_secs = interval.as_secs(),
            pools = pools.len(),
            "periodic invoker started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run(pools, &ConfigUpdate::default()) {
                        Ok(outcomes) => {
                            let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
                            debug!(pools = outcomes.len(), failed, "invocation complete");
                        }
                        Err(e) => error!(error = %e, "invocation rejected"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("periodic invoker shutting down");
                    break;
                }
            }
        }
    }
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
