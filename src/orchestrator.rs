//! Ties snapshotting, materialization and the event watcher together.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{debug, error, info};
use tokio::sync::mpsc;

use crate::config::{ConfigSet, TemplateConfig};
use crate::materialize::materialize;
use crate::runtime::ContainerRuntime;
use crate::snapshot::{build_snapshot, SnapshotError};
use crate::types::LifecycleEvent;
use crate::watcher::{EventWatcher, TerminationSignals, WatchExit, QUEUE_CAPACITY};

pub struct Orchestrator<R> {
    runtime: Arc<R>,
    configs: ConfigSet,
}

impl<R: ContainerRuntime + 'static> Orchestrator<R> {
    pub fn new(runtime: Arc<R>, configs: ConfigSet) -> Self {
        Self { runtime, configs }
    }

    /// Generate every config once, then keep the watched ones up to date
    /// until a termination signal ends the process.
    pub async fn run(self) -> Result<()> {
        self.regenerate(self.configs.iter()).await?;

        let watched = self.configs.watched();
        if watched.is_empty() {
            info!("No templates to watch, exiting");
            return Ok(());
        }

        let signals = TerminationSignals::install().context("unable to install signal handlers")?;
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let watcher = EventWatcher::new(Arc::clone(&self.runtime));
        tokio::spawn(async move {
            if let WatchExit::Signal(name) = watcher.run(tx, signals.recv()).await {
                info!("received signal '{}', exiting", name);
                std::process::exit(0);
            }
        });

        let passes = self.consume(&watched, rx).await?;
        bail!("event stream closed after {passes} regenerations; no longer watching containers")
    }

    /// Regenerate `watched` once per lifecycle event, in receipt order,
    /// until the queue closes.  Returns the number of regenerations.
    pub async fn consume(
        &self,
        watched: &ConfigSet,
        mut events: mpsc::Receiver<LifecycleEvent>,
    ) -> Result<usize> {
        let mut passes = 0;
        while let Some(event) = events.recv().await {
            if !event.triggers_regeneration() {
                debug!("Ignoring {} event for {}", event.status, event.container_id);
                continue;
            }
            info!(
                "Container {} ({}) {}, regenerating",
                event.container_id, event.image, event.status
            );
            self.regenerate(watched.iter()).await?;
            passes += 1;
        }
        Ok(passes)
    }

    /// Take a fresh snapshot and materialize each config against it.
    async fn regenerate<'a>(&self, configs: impl Iterator<Item = &'a TemplateConfig>) -> Result<()> {
        let containers = match build_snapshot(self.runtime.as_ref()).await {
            Ok(containers) => containers,
            Err(e @ SnapshotError::List(_)) => {
                error!("{}", e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        for config in configs {
            materialize(config, &containers)
                .await
                .with_context(|| format!("generating {}", config.template.display()))?;
        }
        Ok(())
    }
}
