use anyhow::Context;
use facelink_uart::domain::models::{
    AppEvent, DeviceFilter, DisconnectReason, MessageSeverity, SensorFrame,
};
use facelink_uart::domain::settings::{Settings, SettingsService};
use facelink_uart::infrastructure::bluetooth::service::UartService;
use facelink_uart::infrastructure::bluetooth::ticker::SensorTicker;
use facelink_uart::infrastructure::bluetooth::{BtleAdapter, TransportError};
use facelink_uart::infrastructure::{frame_source, logging};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

type Service = UartService<BtleAdapter>;

const QUEUE_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const QUEUE_WARN_DEPTH: usize = 10;

/// Connects in the background and keeps retrying while auto-reconnect is on.
/// At most one attempt loop runs at a time.
#[derive(Clone)]
struct Reconnector {
    service: Arc<Service>,
    filter: DeviceFilter,
    retry_delay: Option<Duration>,
    busy: Arc<AtomicBool>,
}

impl Reconnector {
    fn new(service: Arc<Service>, settings: &Settings) -> Self {
        Self {
            service,
            filter: settings.device_filter(),
            retry_delay: settings
                .auto_reconnect
                .then(|| Duration::from_millis(settings.reconnect_delay_ms)),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    fn start(&self, initial_delay: Duration) {
        if self.busy.swap(true, Ordering::SeqCst) {
            debug!("Connect already in progress");
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            loop {
                match this.service.connect(&this.filter).await {
                    Ok(()) | Err(TransportError::Aborted) => break,
                    Err(_) => match this.retry_delay {
                        Some(delay) => {
                            info!("Retrying in {:?}", delay);
                            tokio::time::sleep(delay).await;
                        }
                        None => break,
                    },
                }
            }
            this.busy.store(false, Ordering::SeqCst);
        });
    }
}

fn handle_event(event: AppEvent, reconnector: &Reconnector) {
    match event {
        AppEvent::ConnectionState(state) => info!("Connection state: {}", state),
        AppEvent::LogMessage(msg) => match msg.severity {
            MessageSeverity::Info | MessageSeverity::Success => info!("{}", msg.message),
            MessageSeverity::Warning => warn!("{}", msg.message),
            MessageSeverity::Error => error!("{}", msg.message),
        },
        AppEvent::Inbound(text) => info!("Received: {}", text.trim_end()),
        AppEvent::Disconnected(DisconnectReason::LinkLost) => {
            warn!("Device connection lost");
            if let Some(delay) = reconnector.retry_delay {
                reconnector.start(delay);
            }
        }
        AppEvent::Disconnected(DisconnectReason::Requested) => debug!("Link closed"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _log_guard = logging::init_logger(&settings.log_settings)?;
    info!("Starting FaceLink UART bridge");

    if let Err(e) = settings_service.ensure_saved() {
        warn!("Could not write default settings: {:#}", e);
    }
    info!("Settings: {}", settings_service.path().display());
    settings.validate().context("Invalid settings")?;
    let profile = settings.uart_profile()?;

    let adapter = BtleAdapter::first_available(
        Duration::from_millis(settings.scan_timeout_ms),
        settings.write_with_response,
    )
    .await
    .context("No usable Bluetooth adapter")?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let service = Arc::new(UartService::new(
        adapter,
        profile,
        settings.strict_ascii_inbound,
        event_tx,
    ));

    let (frame_tx, frame_rx) = watch::channel(SensorFrame::default());
    let mut input = tokio::spawn(frame_source::run_stdin(frame_tx));

    let ticker = SensorTicker::new(
        service.clone(),
        frame_rx,
        Duration::from_millis(settings.tick_interval_ms),
        settings.append_newline,
    )
    .spawn();

    let reconnector = Reconnector::new(service.clone(), &settings);
    reconnector.start(Duration::ZERO);

    let mut queue_check = tokio::time::interval(QUEUE_CHECK_INTERVAL);
    queue_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutting down");
                break;
            }
            result = &mut input => {
                match result {
                    Ok(Ok(())) => info!("Frame input ended, shutting down"),
                    Ok(Err(e)) => error!("Frame input failed: {:#}", e),
                    Err(e) => error!("Frame input task failed: {}", e),
                }
                break;
            }
            Some(event) = event_rx.recv() => handle_event(event, &reconnector),
            _ = queue_check.tick() => {
                let depth = service.pending_writes();
                if depth >= QUEUE_WARN_DEPTH {
                    warn!("Write queue backing up: {} pending", depth);
                } else {
                    debug!("Write queue depth: {}", depth);
                }
            }
        }
    }

    ticker.abort();
    service.disconnect().await;
    info!("Stopped");
    Ok(())
}
