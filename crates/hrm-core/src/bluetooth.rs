//! BlueZ transport via `bluer`.
//!
//! Discovery scans for devices advertising the recorder service. Links are
//! backed by a `bluer::Device`; a background task turns the device's
//! `Connected(false)` property change into [`LinkEvent::Lost`].

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bluer::gatt::remote;
use bluer::{Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{HrmError, Result};
use crate::transport::{
    release_on_failure, Characteristic, Link, LinkEvent, LinkEvents, NotificationStream,
    Transport,
};
use crate::types::DeviceDescriptor;

/// How often to poll for GATT service resolution after connecting.
const SERVICES_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Give up waiting for service resolution after this many polls.
const SERVICES_POLL_LIMIT: u32 = 100;

/// Transport over the system's default Bluetooth adapter.
#[derive(Debug, Clone)]
pub struct BluerTransport {
    _session: bluer::Session,
    adapter: Adapter,
}

impl BluerTransport {
    /// Open a BlueZ session and power on the default adapter.
    ///
    /// # Errors
    ///
    /// Returns [`HrmError::Transport`] if BlueZ is unreachable or there is no
    /// adapter.
    pub async fn new() -> Result<Self> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        info!(adapter = adapter.name(), "bluetooth adapter ready");
        Ok(Self {
            _session: session,
            adapter,
        })
    }
}

impl Transport for BluerTransport {
    type Link = BluerLink;

    async fn discover(&self, service: Uuid) -> Result<DeviceDescriptor> {
        let events = self.adapter.discover_devices().await?;
        tokio::pin!(events);

        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };
            let device = self.adapter.device(address)?;
            let advertises = device
                .uuids()
                .await?
                .is_some_and(|uuids| uuids.contains(&service));
            if !advertises {
                continue;
            }

            let name = device.name().await?;
            debug!(%address, ?name, "recorder advertisement seen");
            let descriptor = DeviceDescriptor::new(address.to_string());
            return Ok(match name {
                Some(name) => descriptor.with_name(name),
                None => descriptor,
            });
        }

        Err(HrmError::NoDeviceSelected)
    }

    async fn open_link(&self, descriptor: &DeviceDescriptor) -> Result<BluerLink> {
        let address: Address = descriptor.id.parse().map_err(|_| {
            HrmError::LinkEstablishmentFailed(format!("invalid address '{}'", descriptor.id))
        })?;
        let device = self.adapter.device(address)?;

        if !device.is_connected().await? {
            device
                .connect()
                .await
                .map_err(|err| HrmError::LinkEstablishmentFailed(err.to_string()))?;
        }

        // Anything failing past this point must not leave the peer connected.
        let setup = async {
            wait_for_services(&device).await?;
            // Subscribe before handing the link out so no loss goes unseen.
            Ok::<_, HrmError>(device.events().await?)
        };
        let close = async {
            device.disconnect().await.map_err(HrmError::from)
        };
        let device_events = release_on_failure(setup, close).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            tokio::pin!(device_events);
            while let Some(DeviceEvent::PropertyChanged(property)) = device_events.next().await {
                if matches!(property, DeviceProperty::Connected(false)) {
                    let _ = tx.send(LinkEvent::Lost);
                    return;
                }
            }
        });

        Ok(BluerLink {
            device,
            events: Mutex::new(Some(rx)),
            forwarder,
        })
    }
}

async fn wait_for_services(device: &Device) -> Result<()> {
    for _ in 0..SERVICES_POLL_LIMIT {
        if device.is_services_resolved().await? {
            return Ok(());
        }
        tokio::time::sleep(SERVICES_POLL_INTERVAL).await;
    }
    Err(HrmError::LinkEstablishmentFailed(
        "GATT services were not resolved".to_string(),
    ))
}

/// A connected recorder.
#[derive(Debug)]
pub struct BluerLink {
    device: Device,
    events: Mutex<Option<LinkEvents>>,
    forwarder: JoinHandle<()>,
}

impl Drop for BluerLink {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

impl Link for BluerLink {
    type Characteristic = BluerCharacteristic;

    async fn characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<BluerCharacteristic> {
        for remote_service in self.device.services().await? {
            if remote_service.uuid().await? != service {
                continue;
            }
            for remote_char in remote_service.characteristics().await? {
                if remote_char.uuid().await? == characteristic {
                    return Ok(BluerCharacteristic {
                        inner: remote_char,
                    });
                }
            }
            return Err(HrmError::LinkEstablishmentFailed(format!(
                "characteristic {characteristic} not found"
            )));
        }
        Err(HrmError::LinkEstablishmentFailed(format!(
            "service {service} not found"
        )))
    }

    fn events(&self) -> LinkEvents {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| mpsc::unbounded_channel().1)
    }

    async fn disconnect(&self) -> Result<()> {
        self.forwarder.abort();
        if let Err(err) = self.device.disconnect().await {
            warn!(address = %self.device.address(), error = %err, "disconnect failed");
            return Err(err.into());
        }
        Ok(())
    }
}

/// GATT characteristic on a [`BluerLink`].
#[derive(Debug)]
pub struct BluerCharacteristic {
    inner: remote::Characteristic,
}

impl Characteristic for BluerCharacteristic {
    async fn read(&self) -> Result<Vec<u8>> {
        Ok(self.inner.read().await?)
    }

    async fn write(&self, value: &[u8]) -> Result<()> {
        Ok(self.inner.write(value).await?)
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        Ok(self.inner.notify().await?.boxed())
    }
}
