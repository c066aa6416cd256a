//! # Webhook Provider
//!
//! Orchestrates one reconciliation run: read the catalog, pick a full scan
//! when no webhook is known yet or the audit log otherwise, and publish the
//! resulting entity set as a single full mutation.

use std::sync::{Arc, Weak};

use chrono::{DateTime, SecondsFormat, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::catalog::{
    CatalogApi, DeferredEntity, Entity, EntityProviderConnection, EntityProviderMutation,
};
use crate::config::{AppConfig, ScheduleMode};
use crate::credentials::CredentialsProvider;
use crate::error::ProviderError;
use crate::github::GitHubClientAdapter;
use crate::reconcile::full_scan::{self, FullScanOptions};
use crate::reconcile::{audit, load_snapshot, materialize_changes};
use crate::scheduler::{ScheduledTask, TaskRunner};
use crate::telemetry::{TraceContext, with_trace_context};

pub const PROVIDER_NAME: &str = "github-webhook-provider";

/// How the provider's refresh task is triggered.
#[derive(Clone)]
pub enum Schedule {
    /// Runs only when `run()` is called directly.
    Manual,
    Runner(Arc<dyn TaskRunner>),
}

/// Run parameters.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub org: String,
    /// Url credentials are requested for.
    pub identity_url: String,
    pub api_base_url: String,
    /// Seconds between runs; the audit log is read this far back.
    pub frequency_seconds: u64,
    pub concurrency: usize,
    pub full_scan_max_pages: Option<u32>,
}

impl From<&AppConfig> for ProviderOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            org: config.github_org.clone(),
            identity_url: config.identity_url(),
            api_base_url: config.github_api_base.clone(),
            frequency_seconds: config.provider.frequency_seconds,
            concurrency: config.provider.concurrency,
            full_scan_max_pages: config.provider.full_scan_max_pages,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    FullScan,
    Incremental,
}

/// Outcome of the last successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: RunMode,
    pub entities: usize,
    pub finished_at: DateTime<Utc>,
}

pub struct WebhookProvider {
    options: ProviderOptions,
    credentials: Arc<dyn CredentialsProvider>,
    catalog: Arc<dyn CatalogApi>,
    schedule: Schedule,
    connection: RwLock<Option<Arc<dyn EntityProviderConnection>>>,
    last_run: RwLock<Option<RunSummary>>,
    /// Serializes scheduled and on-demand runs.
    run_lock: Mutex<()>,
}

impl WebhookProvider {
    pub fn create(
        options: ProviderOptions,
        credentials: Arc<dyn CredentialsProvider>,
        catalog: Arc<dyn CatalogApi>,
        schedule: Schedule,
    ) -> Arc<Self> {
        if let Schedule::Runner(_) = &schedule {
            info!(
                "Scheduling {} refresh every {} seconds",
                PROVIDER_NAME, options.frequency_seconds
            );
        }
        Arc::new(Self {
            options,
            credentials,
            catalog,
            schedule,
            connection: RwLock::new(None),
            last_run: RwLock::new(None),
            run_lock: Mutex::new(()),
        })
    }

    pub fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    pub fn task_id(&self) -> String {
        format!("{}:refresh", PROVIDER_NAME)
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    pub async fn last_run(&self) -> Option<RunSummary> {
        self.last_run.read().await.clone()
    }

    /// Store the mutation sink and register the recurring refresh task.
    pub async fn connect(
        self: &Arc<Self>,
        connection: Arc<dyn EntityProviderConnection>,
    ) -> Result<(), ProviderError> {
        *self.connection.write().await = Some(connection);
        info!("Connecting to {}", PROVIDER_NAME);

        if let Schedule::Runner(runner) = &self.schedule {
            runner.run(self.scheduled_task()).await?;
        }
        Ok(())
    }

    /// One full reconciliation pass. Does nothing before `connect`.
    pub async fn run(&self) -> Result<(), ProviderError> {
        info!("Running {}", PROVIDER_NAME);
        let Some(connection) = self.connection.read().await.clone() else {
            return Ok(());
        };

        let _running = self.run_lock.lock().await;
        counter!("webhook_provider_runs_total").increment(1);

        let (mode, entities) = match self.process().await {
            Ok(outcome) => outcome,
            Err(err) => {
                counter!("webhook_provider_run_failures_total").increment(1);
                return Err(err);
            }
        };

        info!("{} finished with {} entities", PROVIDER_NAME, entities.len());
        gauge!("webhook_provider_entities").set(entities.len() as f64);

        let count = entities.len();
        let mutation = EntityProviderMutation::Full {
            entities: entities
                .into_iter()
                .map(|entity| DeferredEntity {
                    entity,
                    location_key: Some(PROVIDER_NAME.to_string()),
                })
                .collect(),
        };
        if let Err(err) = connection.apply_mutation(mutation).await {
            counter!("webhook_provider_run_failures_total").increment(1);
            return Err(err.into());
        }

        *self.last_run.write().await = Some(RunSummary {
            mode,
            entities: count,
            finished_at: Utc::now(),
        });
        Ok(())
    }

    async fn process(&self) -> Result<(RunMode, Vec<Entity>), ProviderError> {
        let snapshot = load_snapshot(self.catalog.as_ref()).await?;
        let adapter = Arc::new(GitHubClientAdapter::new(
            self.credentials.clone(),
            self.options.identity_url.clone(),
            self.options.api_base_url.clone(),
        ));

        if snapshot.known_webhooks.is_empty() {
            info!(org = %self.options.org, "No known webhooks, scanning every repository");
            let changes = full_scan::collect_changes(
                adapter,
                &FullScanOptions {
                    org: self.options.org.clone(),
                    concurrency: self.options.concurrency,
                    max_pages: self.options.full_scan_max_pages,
                },
            )
            .await?;
            let entities = materialize_changes(&changes, &snapshot.index, &[]);
            return Ok((RunMode::FullScan, entities));
        }

        let created_after = audit_window_start(Utc::now(), self.options.frequency_seconds);
        info!(
            org = %self.options.org,
            known_webhooks = snapshot.known_webhooks.len(),
            %created_after,
            "Reading audit log"
        );
        let entities = audit::reconcile(&adapter, &self.options.org, &created_after, snapshot).await?;
        Ok((RunMode::Incremental, entities))
    }

    /// Wraps `run()` so failures are logged with the task and instance ids
    /// and never reach the runner.
    fn scheduled_task(self: &Arc<Self>) -> ScheduledTask {
        let provider: Weak<Self> = Arc::downgrade(self);
        let task_id = self.task_id();
        ScheduledTask::new(task_id.clone(), move || {
            let provider = provider.clone();
            let task_id = task_id.clone();
            async move {
                let Some(provider) = provider.upgrade() else {
                    return;
                };
                let task_instance_id = Uuid::new_v4().to_string();
                let span = info_span!(
                    "provider_task",
                    task_id = %task_id,
                    task_instance_id = %task_instance_id
                );
                let context = TraceContext {
                    trace_id: task_instance_id.clone(),
                };
                with_trace_context(context, async {
                    if let Err(err) = provider.run().await {
                        error!(
                            task_id = %task_id,
                            task_instance_id = %task_instance_id,
                            error = %err,
                            "{} refresh failed", PROVIDER_NAME
                        );
                    }
                })
                .instrument(span)
                .await;
            }
        })
    }
}

impl Schedule {
    pub fn from_mode(mode: ScheduleMode, runner: Arc<dyn TaskRunner>) -> Self {
        match mode {
            ScheduleMode::Manual => Schedule::Manual,
            ScheduleMode::Interval => Schedule::Runner(runner),
        }
    }
}

/// Lower bound for audit entries: `frequency` seconds before `now`, as
/// ISO 8601 with milliseconds and a `Z` suffix.
pub fn audit_window_start(now: DateTime<Utc>, frequency_seconds: u64) -> String {
    let start = now - chrono::Duration::seconds(frequency_seconds as i64);
    start.to_rfc3339_opts(SecondsFormat::Millis, true)
}
