//! BLE Scanner Module
//!
//! Picks a UART peripheral with btleplug. There is no interactive picker, so
//! selection means "first advertised peripheral the filter accepts".
//! Accept-all prefers peripherals advertising the UART service and widens to
//! any peripheral once [`ACCEPT_ALL_GRACE`] has passed, since plenty of
//! firmware leaves the service out of its advertisement.

use crate::domain::models::DeviceFilter;
use crate::infrastructure::bluetooth::backend::BleAdapter;
use crate::infrastructure::bluetooth::device::BtleDevice;
use crate::infrastructure::bluetooth::error::BackendError;
use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long accept-all waits for a peripheral advertising the UART service
pub const ACCEPT_ALL_GRACE: Duration = Duration::from_secs(2);

/// What one scan poll saw of a peripheral
#[derive(Debug, Clone, Copy)]
pub struct Advertisement<'a> {
    pub name: Option<&'a str>,
    pub services: &'a [Uuid],
}

/// Index of the peripheral to select, if any
///
/// Name prefixes are checked against the local name. Accept-all takes the
/// first peripheral advertising `service`; with `widen` set it falls back to
/// the first peripheral seen.
pub fn pick_candidate(
    filter: &DeviceFilter,
    seen: &[Advertisement<'_>],
    service: Uuid,
    widen: bool,
) -> Option<usize> {
    match filter {
        DeviceFilter::AcceptAll => seen
            .iter()
            .position(|ad| ad.services.contains(&service))
            .or_else(|| (widen && !seen.is_empty()).then_some(0)),
        DeviceFilter::NamePrefixes(_) => seen.iter().position(|ad| filter.matches(ad.name)),
    }
}

/// First available host adapter
pub struct BtleAdapter {
    adapter: Adapter,
    scan_timeout: Duration,
    write_type: WriteType,
}

impl BtleAdapter {
    pub async fn first_available(
        scan_timeout: Duration,
        write_with_response: bool,
    ) -> Result<Self, BackendError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BackendError::NoAdapter)?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter: {}", info),
            Err(e) => warn!("Could not read adapter info: {}", e),
        }

        Ok(Self {
            adapter,
            scan_timeout,
            write_type: if write_with_response {
                WriteType::WithResponse
            } else {
                WriteType::WithoutResponse
            },
        })
    }

    async fn find_candidate(
        &self,
        filter: &DeviceFilter,
        service: Uuid,
        widen: bool,
    ) -> Result<Option<(Peripheral, Option<String>)>, BackendError> {
        let mut found = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            if let Some(props) = peripheral.properties().await? {
                found.push((peripheral, props.local_name, props.services));
            }
        }

        let seen: Vec<Advertisement<'_>> = found
            .iter()
            .map(|(_, name, services)| Advertisement {
                name: name.as_deref(),
                services,
            })
            .collect();
        let Some(index) = pick_candidate(filter, &seen, service, widen) else {
            debug!("{} peripherals seen, none selected yet", found.len());
            return Ok(None);
        };

        let (peripheral, name, services) = found.swap_remove(index);
        if !services.contains(&service) {
            info!("No peripheral advertises the UART service, trying {:?}", name);
        }
        Ok(Some((peripheral, name)))
    }
}

#[async_trait]
impl BleAdapter for BtleAdapter {
    type Device = BtleDevice;

    async fn request_device(
        &self,
        filter: &DeviceFilter,
        service: Uuid,
    ) -> Result<Option<BtleDevice>, BackendError> {
        info!("Scanning for UART peripherals ({:?})...", filter);
        self.adapter.start_scan(ScanFilter::default()).await?;

        let started = Instant::now();
        let deadline = started + self.scan_timeout;
        let found = loop {
            let widen = started.elapsed() >= ACCEPT_ALL_GRACE || Instant::now() >= deadline;
            match self.find_candidate(filter, service, widen).await {
                Ok(Some(hit)) => break Ok(Some(hit)),
                Ok(None) if Instant::now() >= deadline => break Ok(None),
                Ok(None) => tokio::time::sleep(SCAN_POLL_INTERVAL).await,
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        match found? {
            Some((peripheral, name)) => {
                info!("Selected {}", name.as_deref().unwrap_or("(unnamed)"));
                Ok(Some(BtleDevice::new(
                    self.adapter.clone(),
                    peripheral,
                    name,
                    self.write_type,
                )))
            }
            None => {
                info!("No matching device found within {:?}", self.scan_timeout);
                Ok(None)
            }
        }
    }
}
