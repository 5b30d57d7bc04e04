// ── Daemon wiring ──
//
// Builds the transport, scheduler, registry, sample store and supervisor
// from the loaded configuration, onboards the configured appliances and
// polls until ctrl-c.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use panwatch_api::TransportConfig;
use panwatch_config::{ApplianceProfile, Config, resolve_credentials};
use panwatch_core::{
    ApplianceRegistry, ConfigHandle, DevicePreference, IntervalKey, MemorySampleStore,
    OptionalPoller, PollSupervisor, PollingConfig, RequestScheduler, TaskContext,
    XmlApiTransport, add_appliance,
};

use crate::error::DaemonError;

pub async fn run(config: &Config) -> Result<(), DaemonError> {
    let settings = ConfigHandle::new(config.polling.clone());

    let transport = Arc::new(XmlApiTransport::new(TransportConfig::default()));
    for profile in &config.appliances {
        transport.set_tls(&profile.parsed_url()?, profile.tls_mode());
    }

    let scheduler = RequestScheduler::spawn(transport, settings.subscribe());
    let registry = Arc::new(ApplianceRegistry::new());
    let store = Arc::new(MemorySampleStore::new());
    let cancel = CancellationToken::new();
    let gc = store.spawn_gc(settings.subscribe(), cancel.clone());

    let preferences = onboard_all(&scheduler, &registry, &config.appliances).await?;
    if !config.appliances.is_empty() && registry.is_empty() {
        return Err(DaemonError::NothingOnboarded {
            configured: config.appliances.len(),
        });
    }
    if config.appliances.is_empty() {
        warn!("no appliances configured, nothing to poll");
    }

    let (_preferences_tx, preferences_rx) = watch::channel(preferences);
    let ctx = TaskContext {
        scheduler: scheduler.clone(),
        registry: Arc::clone(&registry),
        sink: store.clone(),
        config: settings.subscribe(),
    };
    let supervisor = tokio::spawn(PollSupervisor::new(ctx).run(
        preferences_rx,
        OptionalPoller::default_catalog(),
        cancel.clone(),
    ));
    let status = tokio::spawn(status_loop(
        Arc::clone(&registry),
        Arc::clone(&store),
        settings.subscribe(),
        cancel.clone(),
    ));

    info!(appliances = registry.len(), "polling started");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    cancel.cancel();
    let _ = supervisor.await;
    let _ = status.await;
    let _ = gc.await;
    scheduler.shutdown().await;
    Ok(())
}

/// Onboard every profile. Appliances that fail to onboard are logged and
/// skipped; missing credentials are a configuration error.
async fn onboard_all(
    scheduler: &RequestScheduler,
    registry: &ApplianceRegistry,
    profiles: &[ApplianceProfile],
) -> Result<Vec<DevicePreference>, DaemonError> {
    let mut preferences = Vec::with_capacity(profiles.len());

    for profile in profiles {
        let url = profile.parsed_url()?;
        let credentials = resolve_credentials(profile)?;

        match add_appliance(scheduler, registry, url, credentials).await {
            Ok(appliance) => {
                preferences.push(profile.device_preference(&appliance.serial));
            }
            Err(e) => {
                warn!(url = %profile.url, error = %e, "onboarding failed, appliance skipped");
            }
        }
    }

    Ok(preferences)
}

/// Periodic one-line summary of what is being polled.
async fn status_loop(
    registry: Arc<ApplianceRegistry>,
    store: Arc<MemorySampleStore>,
    config: watch::Receiver<PollingConfig>,
    cancel: CancellationToken,
) {
    loop {
        let interval = config.borrow().tracking_interval(IntervalKey::Generic);
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }

        let roster = registry.snapshot();
        let disabled = roster.iter().filter(|a| a.disabled).count();
        let with_errors = roster.iter().filter(|a| a.has_errors()).count();
        info!(
            appliances = roster.len(),
            disabled,
            with_errors,
            samples = store.len(),
            "polling status"
        );
        for appliance in roster.iter().filter(|a| a.has_errors()) {
            for (task, error) in &appliance.errors {
                warn!(serial = %appliance.serial, task = %task, error = %error, "polling error");
            }
        }
    }
}
