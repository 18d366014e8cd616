//! Periodic alert evaluation loop.
//!
//! One scheduler per process. Each cycle loads the active working set
//! (subscriptions outside their rate-limit window), groups it by
//! ticker, fetches each group's data bundle in parallel under a
//! semaphore, evaluates every alert, and emits notifications through
//! the sink. Cycles never overlap: an overrunning cycle makes the next
//! tick skip, not queue. Per-alert failures are logged and recorded in
//! the execution log without aborting the cycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use screener_core::config::SchedulerConfig;
use screener_data::models::{AlertRecord, NotificationDraft};
use screener_data::repositories::{MarketDataRepository, Repositories};

use crate::evaluator::AlertEvaluator;
use crate::sink::NotificationSink;
use crate::types::DataBundle;

pub struct AlertScheduler {
    repos: Repositories,
    evaluator: Arc<AlertEvaluator>,
    sink: Arc<dyn NotificationSink>,
    config: SchedulerConfig,
}

impl AlertScheduler {
    #[must_use]
    pub fn new(
        repos: Repositories,
        evaluator: Arc<AlertEvaluator>,
        sink: Arc<dyn NotificationSink>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repos,
            evaluator,
            sink,
            config,
        }
    }

    /// Runs until the shutdown channel flips to true. The in-flight
    /// cycle finishes its per-alert writes before returning, so
    /// `last_evaluated` stamps never diverge from emitted notifications.
    ///
    /// # Errors
    /// Returns an error only on a failure to observe the shutdown
    /// channel; cycle failures are logged and retried next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            cadence_seconds = self.config.cadence_seconds,
            rate_limit_window_hours = self.config.rate_limit_window_hours,
            max_parallel_groups = self.config.max_parallel_groups,
            "Alert scheduler started"
        );

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.cadence_seconds));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Alert cycle failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Alert scheduler stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One evaluation cycle. Public so the CLI can run a single pass.
    ///
    /// # Errors
    /// Returns an error if the working set cannot be loaded; everything
    /// past that point degrades per alert.
    pub async fn run_cycle(&self) -> Result<()> {
        let alerts = self
            .repos
            .alerts
            .load_due(self.config.rate_limit_window_hours)
            .await?;
        if alerts.is_empty() {
            debug!("No due alerts this cycle");
            return Ok(());
        }

        let groups = group_by_ticker(alerts);
        info!(groups = groups.len(), "Evaluating alert groups");

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_groups));
        let mut tasks = JoinSet::new();

        for (ticker, group) in groups {
            let semaphore = semaphore.clone();
            let repos = self.repos.clone();
            let evaluator = self.evaluator.clone();
            let sink = self.sink.clone();
            let fetch_timeout = Duration::from_secs(self.config.fetch_timeout_seconds);

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let bundle = fetch_bundle(&repos.market, ticker.as_deref(), fetch_timeout).await;
                process_group(&repos, &evaluator, sink.as_ref(), &bundle, group).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Alert group task panicked");
            }
        }

        Ok(())
    }
}

/// Groups the working set by ticker; tickerless subscriptions share the
/// `None` bucket. BTreeMap keeps cycle order deterministic.
fn group_by_ticker(alerts: Vec<AlertRecord>) -> BTreeMap<Option<String>, Vec<AlertRecord>> {
    let mut groups: BTreeMap<Option<String>, Vec<AlertRecord>> = BTreeMap::new();
    for alert in alerts {
        groups.entry(alert.ticker.clone()).or_default().push(alert);
    }
    groups
}

/// Fetches the three data sources for one ticker concurrently. A failed
/// or timed-out source nulls its bundle member; the group still runs.
async fn fetch_bundle(
    market: &MarketDataRepository,
    ticker: Option<&str>,
    fetch_timeout: Duration,
) -> DataBundle {
    let Some(ticker) = ticker else {
        return DataBundle::default();
    };

    let (quote, metadata, fundamentals) = tokio::join!(
        tokio::time::timeout(fetch_timeout, market.latest_quote(ticker)),
        tokio::time::timeout(fetch_timeout, market.metadata(ticker)),
        tokio::time::timeout(fetch_timeout, market.fundamentals(ticker)),
    );

    DataBundle {
        quote: unwrap_fetch(quote, ticker, "quote"),
        metadata: unwrap_fetch(metadata, ticker, "metadata"),
        fundamentals: unwrap_fetch(fundamentals, ticker, "fundamentals"),
    }
}

fn unwrap_fetch<T>(
    outcome: Result<Result<Option<T>>, tokio::time::error::Elapsed>,
    ticker: &str,
    source: &str,
) -> Option<T> {
    match outcome {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            warn!(ticker, source, error = %e, "Data fetch failed");
            None
        }
        Err(_) => {
            warn!(ticker, source, "Data fetch timed out");
            None
        }
    }
}

async fn process_group(
    repos: &Repositories,
    evaluator: &AlertEvaluator,
    sink: &dyn NotificationSink,
    bundle: &DataBundle,
    alerts: Vec<AlertRecord>,
) {
    let today = Utc::now().date_naive();

    for alert in alerts {
        match evaluator.evaluate(&alert, bundle, today).await {
            Ok(evaluation) if evaluation.triggered => {
                info!(alert_id = alert.id, name = %alert.name, "Alert triggered");

                let draft = NotificationDraft {
                    user_id: alert.user_id,
                    alert_id: alert.id,
                    ticker: alert.ticker.clone(),
                    kind: alert.kind.clone(),
                    title: alert.name.clone(),
                    message: evaluation.reason.clone().unwrap_or_default(),
                    payload: evaluation.payload.clone(),
                };
                if let Err(e) = sink.emit(&draft).await {
                    error!(alert_id = alert.id, error = %e, "Failed to emit notification");
                }
                if let Err(e) = repos.alerts.mark_triggered(alert.id).await {
                    error!(alert_id = alert.id, error = %e, "Failed to stamp trigger");
                }
                if let Err(e) = repos
                    .alerts
                    .log_execution(alert.id, true, None, evaluation.payload.as_ref())
                    .await
                {
                    warn!(alert_id = alert.id, error = %e, "Failed to log execution");
                }
            }
            Ok(_) => {
                if let Err(e) = repos.alerts.mark_evaluated(alert.id).await {
                    error!(alert_id = alert.id, error = %e, "Failed to stamp evaluation");
                }
                if let Err(e) = repos.alerts.log_execution(alert.id, false, None, None).await {
                    warn!(alert_id = alert.id, error = %e, "Failed to log execution");
                }
            }
            Err(e) => {
                warn!(alert_id = alert.id, error = %e, "Alert evaluation failed");
                if let Err(log_err) = repos
                    .alerts
                    .log_execution(alert.id, false, Some(&e.to_string()), None)
                    .await
                {
                    warn!(alert_id = alert.id, error = %log_err, "Failed to log execution");
                }
                if let Err(stamp_err) = repos.alerts.mark_evaluated(alert.id).await {
                    error!(alert_id = alert.id, error = %stamp_err, "Failed to stamp evaluation");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: i64, ticker: Option<&str>) -> AlertRecord {
        AlertRecord {
            id,
            user_id: 1,
            ticker: ticker.map(String::from),
            kind: "price_threshold".to_string(),
            name: format!("alert {id}"),
            condition: json!({"operator": "<", "value": 100}),
            frequency: "daily".to_string(),
            active: true,
            last_triggered: None,
            last_evaluated: None,
            trigger_count: 0,
        }
    }

    #[test]
    fn grouping_buckets_by_ticker_with_a_shared_none_bucket() {
        let groups = group_by_ticker(vec![
            record(1, Some("INFY")),
            record(2, Some("TCS")),
            record(3, Some("INFY")),
            record(4, None),
            record(5, None),
        ]);

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[&Some("INFY".to_string())].len(), 2);
        assert_eq!(groups[&Some("TCS".to_string())].len(), 1);
        assert_eq!(groups[&None].len(), 2);
    }

    #[test]
    fn grouping_preserves_alert_order_within_a_bucket() {
        let groups = group_by_ticker(vec![record(3, Some("INFY")), record(1, Some("INFY"))]);
        let ids: Vec<i64> = groups[&Some("INFY".to_string())]
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![3, 1]);
    }
}
