use std::path::PathBuf;

use anyhow::Context;
use tracing::{info, warn};

use greenhouse_controller::{
    shutdown::{self, Shutdown, ShutdownHandle},
    ControlLoop, HardwareBus, JsonLinesRecorder, SettingsStore, SimulatedBus, StateRecorder,
    TracingRecorder,
};

const DEFAULT_SETTINGS_PATH: &str = "config/greenhouse_settings.json";

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = settings_path();
    let store = SettingsStore::open(&path)
        .await
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    let settings = store.snapshot();

    let recorder: Box<dyn StateRecorder> = if settings.recorder.enabled {
        Box::new(JsonLinesRecorder::open(&settings.recorder).context("failed to open state log")?)
    } else {
        info!("state log disabled; records go to the debug log only");
        Box::new(TracingRecorder)
    };

    let (handle, shutdown) = shutdown::channel();
    spawn_signal_listener(handle);

    if settings.mock_mode {
        info!("mock_mode enabled; using simulated hardware");
        return drive(store, SimulatedBus::default(), recorder, shutdown).await;
    }
    open_hardware(store, recorder, shutdown).await
}

fn settings_path() -> PathBuf {
    std::env::var_os("GREENHOUSE_SETTINGS")
        .or_else(|| std::env::args_os().nth(1))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH))
}

#[cfg(feature = "rpi")]
async fn open_hardware(
    store: SettingsStore,
    recorder: Box<dyn StateRecorder>,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    let bus = greenhouse_controller::rpi::RpiBus::open(&store.snapshot().hardware)
        .context("failed to initialise greenhouse hardware")?;
    drive(store, bus, recorder, shutdown).await
}

#[cfg(not(feature = "rpi"))]
async fn open_hardware(
    _store: SettingsStore,
    _recorder: Box<dyn StateRecorder>,
    _shutdown: Shutdown,
) -> anyhow::Result<()> {
    anyhow::bail!("built without the `rpi` feature; set mock_mode or rebuild with --features rpi")
}

async fn drive<B: HardwareBus>(
    store: SettingsStore,
    bus: B,
    recorder: Box<dyn StateRecorder>,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    let mut looper = ControlLoop::start(store, bus, recorder, shutdown)
        .context("control loop failed to start")?;
    looper.run().await;
    Ok(())
}

fn spawn_signal_listener(handle: ShutdownHandle) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        handle.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        warn!("ctrl-c handler failed: {err}");
                        terminate.recv().await;
                    }
                }
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            warn!("SIGTERM handler unavailable: {err}");
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("ctrl-c handler failed: {err}");
        std::future::pending::<()>().await;
    }
}
