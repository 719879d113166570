use crate::alert::{drain_delivery, spawn_delivery, Alerter, CommandListener, TelegramBot};
use crate::gate::FetchGate;
use crate::model::QuerySpec;
use crate::pipeline::{AlertingHooks, LifecycleHooks, Pipeline, RunSummary};
use crate::search::TwitterSearch;
use crate::sink::Sink;
use crate::store::{PgStore, RecordStore};
use harvester_core::backoff::{retry_with_backoff, RetryPolicy};
use harvester_core::{Config, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

pub struct App {
    pipeline: Pipeline,
}

impl App {
    /// Connects every collaborator once and hands explicit handles to the
    /// pipeline and the command listener.
    #[instrument(skip_all)]
    pub async fn new(config: Config, alerting: &Alerting) -> Result<Self> {
        let alerter = alerting.alerter.clone();
        info!(alerting = alerter.is_enabled(), "Initializing application");

        let spec = QuerySpec::from_config(&config)?;
        let policy = RetryPolicy::from(&config.startup);

        let store = Arc::new(
            retry_with_backoff(|| PgStore::connect(&config.database), policy, "connect_store")
                .await?,
        );

        info!("Performing health checks");
        store.health_check().await?;

        let source = TwitterSearch::connect(&config.search, policy).await?;

        if let Some(bot) = alerting.bot.clone() {
            CommandListener::new(
                bot,
                store.clone(),
                spec.tag.clone(),
                Duration::from_secs(config.alerts.poll_timeout_secs),
            )
            .spawn();
            info!("Operator command listener started");
        }

        let hooks: Arc<dyn LifecycleHooks> = Arc::new(AlertingHooks::new(alerter.clone()));
        let pipeline = Pipeline::new(
            spec.clone(),
            FetchGate::new(Arc::new(source), spec.tag.clone()),
            Sink::new(store, alerter.clone(), spec.tag.clone()),
            alerter,
            hooks,
        );

        Ok(Self { pipeline })
    }

    pub async fn run(&self) -> RunSummary {
        self.pipeline.run().await
    }
}

/// Alert handle plus the pieces needed to answer commands and to flush the
/// queue on the way out.
pub struct Alerting {
    pub alerter: Alerter,
    bot: Option<Arc<TelegramBot>>,
    worker: Option<JoinHandle<()>>,
}

impl Alerting {
    pub fn disabled() -> Self {
        Self {
            alerter: Alerter::disabled(),
            bot: None,
            worker: None,
        }
    }

    /// Drops this handle's sender and waits, at most `limit`, for queued
    /// alerts to be delivered. Every other `Alerter` clone must already be
    /// gone.
    pub async fn flush(self, limit: Duration) {
        let Alerting { alerter, worker, .. } = self;
        drop(alerter);
        if let Some(worker) = worker {
            drain_delivery(worker, limit).await;
        }
    }
}

/// Builds the alert handle and starts its delivery worker. Alerting stays
/// disabled unless both the bot token and the operator are configured.
pub fn start_alerting(config: &Config) -> Result<Alerting> {
    let token = config.alerts.bot_token.as_deref().filter(|t| !t.is_empty());
    let (Some(token), Some(operator)) = (token, config.alerts.operator_chat_id) else {
        info!("Alerting disabled");
        return Ok(Alerting::disabled());
    };

    let bot = Arc::new(TelegramBot::new(&config.alerts, token)?);
    let (alerter, rx) = Alerter::channel(
        operator,
        config.query.tag.clone(),
        config.alerts.queue_capacity,
    );
    let worker = spawn_delivery(rx, bot.clone());

    Ok(Alerting {
        alerter,
        bot: Some(bot),
        worker: Some(worker),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{Alert, AlertBackend};
    use crate::testing::bounded_spec;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Delivers after a delay, like a real HTTP round trip.
    #[derive(Default)]
    struct LaggingBackend {
        delivered: Mutex<Vec<Alert>>,
    }

    #[async_trait]
    impl AlertBackend for LaggingBackend {
        async fn send_message(&self, destination: i64, text: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.delivered.lock().unwrap().push(Alert {
                destination,
                text: text.to_string(),
            });
            Ok(())
        }
    }

    fn lagging_alerting(backend: Arc<LaggingBackend>) -> Alerting {
        let (alerter, rx) = Alerter::channel(5, "demo-tag", 8);
        Alerting {
            alerter,
            bot: None,
            worker: Some(spawn_delivery(rx, backend)),
        }
    }

    #[tokio::test]
    async fn flush_delivers_the_final_run_alert() {
        let backend = Arc::new(LaggingBackend::default());
        let alerting = lagging_alerting(backend.clone());

        {
            let hooks = AlertingHooks::new(alerting.alerter.clone());
            hooks.on_terminated(&bounded_spec(None), &RunSummary::default());
        }
        alerting.flush(Duration::from_secs(5)).await;

        let delivered = backend.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].destination, 5);
        assert!(delivered[0].text.starts_with("[demo-tag] Finished"));
    }

    #[tokio::test]
    async fn flush_on_disabled_alerting_returns_immediately() {
        Alerting::disabled().flush(Duration::from_secs(5)).await;
    }
}
