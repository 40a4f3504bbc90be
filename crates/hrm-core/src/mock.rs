//! Scripted in-memory recorder for tests and hardware-free development.
//!
//! [`MockTransport`] plays the device side of the protocol: it serves the
//! status and firmware characteristics, records every command write, and lets
//! the caller inject notifications, link losses and connection failures.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{HrmError, Result};
use crate::protocol::{
    encode_record, encode_record_range, COMMAND_CHAR_UUID, DEVICE_INFO_SERVICE_UUID,
    FIRMWARE_REVISION_CHAR_UUID, RECORD_NOTIFY_CHAR_UUID, RECORD_STATUS_CHAR_UUID, SERVICE_UUID,
};
use crate::transport::{
    Characteristic, Link, LinkEvent, LinkEvents, NotificationStream, Transport,
};
use crate::types::{DeviceDescriptor, RecordEnvelope, RecordRange};

/// Address reported by [`MockTransport::default`].
pub const MOCK_ADDRESS: &str = "C4:7F:51:00:00:01";

#[derive(Debug)]
struct MockState {
    device: DeviceDescriptor,
    discoverable: bool,
    failing_opens: u32,
    missing: HashSet<Uuid>,
    firmware_revision: Option<String>,
    range: RecordRange,
    fail_writes: bool,
    writes: Vec<Vec<u8>>,
    open_attempts: u32,
    disconnects: u32,
    next_link_id: u64,
    live: Option<LiveHandles>,
}

#[derive(Debug)]
struct LiveHandles {
    link_id: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
    notify: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

/// Scripted recorder. Cloning shares the same device.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(DeviceDescriptor::new(MOCK_ADDRESS).with_name("HRM-MOCK"))
    }
}

impl MockTransport {
    /// A discoverable recorder identified by `device`.
    #[must_use]
    pub fn new(device: DeviceDescriptor) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                device,
                discoverable: true,
                failing_opens: 0,
                missing: HashSet::new(),
                firmware_revision: Some("1.0.0-mock".to_string()),
                range: RecordRange {
                    min_id: 0,
                    max_id: 0,
                },
                fail_writes: false,
                writes: Vec::new(),
                open_attempts: 0,
                disconnects: 0,
                next_link_id: 0,
                live: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// The descriptor discovery returns.
    #[must_use]
    pub fn device(&self) -> DeviceDescriptor {
        self.lock().device.clone()
    }

    /// Whether discovery finds the recorder.
    pub fn set_discoverable(&self, discoverable: bool) {
        self.lock().discoverable = discoverable;
    }

    /// Make the next `count` link openings fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.lock().failing_opens = count;
    }

    /// Hide a service or characteristic from resolution.
    pub fn remove(&self, uuid: Uuid) {
        self.lock().missing.insert(uuid);
    }

    /// Firmware revision string; `None` removes the device information service.
    pub fn set_firmware_revision(&self, revision: Option<&str>) {
        self.lock().firmware_revision = revision.map(str::to_string);
    }

    /// Value served by the record status characteristic.
    pub fn set_record_range(&self, range: RecordRange) {
        self.lock().range = range;
    }

    /// Make command writes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Every command written so far.
    #[must_use]
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Number of `open_link` calls, successful or not.
    #[must_use]
    pub fn open_attempts(&self) -> u32 {
        self.lock().open_attempts
    }

    /// Number of links torn down by the client.
    #[must_use]
    pub fn disconnects(&self) -> u32 {
        self.lock().disconnects
    }

    /// Whether a link is currently open.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.lock().live.is_some()
    }

    /// Drop the current link as if the device went out of range.
    ///
    /// Returns `false` if no link was open.
    pub fn drop_link(&self) -> bool {
        let Some(live) = self.lock().live.take() else {
            return false;
        };
        live.events.send(LinkEvent::Lost).is_ok()
    }

    /// Deliver a raw notification frame. Returns `false` if nobody is
    /// subscribed.
    pub fn notify(&self, frame: &[u8]) -> bool {
        self.lock()
            .live
            .as_ref()
            .and_then(|live| live.notify.as_ref())
            .is_some_and(|tx| tx.send(frame.to_vec()).is_ok())
    }

    /// Encode and deliver a record.
    pub fn notify_record(&self, record: &RecordEnvelope) -> bool {
        self.notify(&encode_record(record))
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transport for MockTransport {
    type Link = MockLink;

    async fn discover(&self, _service: Uuid) -> Result<DeviceDescriptor> {
        let state = self.lock();
        if state.discoverable {
            Ok(state.device.clone())
        } else {
            Err(HrmError::NoDeviceSelected)
        }
    }

    async fn open_link(&self, device: &DeviceDescriptor) -> Result<MockLink> {
        let mut state = self.lock();
        state.open_attempts += 1;

        if device.id != state.device.id {
            return Err(HrmError::LinkEstablishmentFailed(format!(
                "device {} not in range",
                device.id
            )));
        }
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(HrmError::LinkEstablishmentFailed(
                "peer did not respond".to_string(),
            ));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        state.next_link_id += 1;
        let link_id = state.next_link_id;
        state.live = Some(LiveHandles {
            link_id,
            events: events_tx,
            notify: None,
        });

        Ok(MockLink {
            link_id,
            state: Arc::clone(&self.state),
            events: Mutex::new(Some(events_rx)),
        })
    }
}

/// Link handed out by [`MockTransport`].
#[derive(Debug)]
pub struct MockLink {
    link_id: u64,
    state: Arc<Mutex<MockState>>,
    events: Mutex<Option<LinkEvents>>,
}

impl Link for MockLink {
    type Characteristic = MockCharacteristic;

    async fn characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<MockCharacteristic> {
        let state = lock(&self.state);

        let service_present = match service {
            s if s == SERVICE_UUID => true,
            s if s == DEVICE_INFO_SERVICE_UUID => state.firmware_revision.is_some(),
            _ => false,
        };
        if !service_present || state.missing.contains(&service) {
            return Err(HrmError::LinkEstablishmentFailed(format!(
                "service {service} not found"
            )));
        }

        let known = [
            COMMAND_CHAR_UUID,
            RECORD_STATUS_CHAR_UUID,
            RECORD_NOTIFY_CHAR_UUID,
            FIRMWARE_REVISION_CHAR_UUID,
        ];
        if !known.contains(&characteristic) || state.missing.contains(&characteristic) {
            return Err(HrmError::LinkEstablishmentFailed(format!(
                "characteristic {characteristic} not found"
            )));
        }

        Ok(MockCharacteristic {
            uuid: characteristic,
            link_id: self.link_id,
            state: Arc::clone(&self.state),
        })
    }

    fn events(&self) -> LinkEvents {
        lock_events(&self.events).take().unwrap_or_else(|| {
            let (_, rx) = mpsc::unbounded_channel();
            rx
        })
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.disconnects += 1;
        if state.live.as_ref().is_some_and(|live| live.link_id == self.link_id) {
            state.live = None;
        }
        Ok(())
    }
}

fn lock_events(events: &Mutex<Option<LinkEvents>>) -> MutexGuard<'_, Option<LinkEvents>> {
    events.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Characteristic handed out by [`MockLink`].
#[derive(Debug)]
pub struct MockCharacteristic {
    uuid: Uuid,
    link_id: u64,
    state: Arc<Mutex<MockState>>,
}

impl MockCharacteristic {
    fn ensure_live(&self, state: &MockState) -> Result<()> {
        match &state.live {
            Some(live) if live.link_id == self.link_id => Ok(()),
            _ => Err(HrmError::Transport("link is down".to_string())),
        }
    }
}

impl Characteristic for MockCharacteristic {
    async fn read(&self) -> Result<Vec<u8>> {
        let state = lock(&self.state);
        self.ensure_live(&state)?;
        match self.uuid {
            u if u == RECORD_STATUS_CHAR_UUID => Ok(encode_record_range(state.range).to_vec()),
            u if u == FIRMWARE_REVISION_CHAR_UUID => state
                .firmware_revision
                .as_ref()
                .map(|rev| rev.as_bytes().to_vec())
                .ok_or_else(|| HrmError::Transport("firmware revision not readable".into())),
            u => Err(HrmError::Transport(format!("characteristic {u} is not readable"))),
        }
    }

    async fn write(&self, value: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        self.ensure_live(&state)?;
        if self.uuid != COMMAND_CHAR_UUID {
            return Err(HrmError::Transport(format!(
                "characteristic {} is not writable",
                self.uuid
            )));
        }
        if state.fail_writes {
            return Err(HrmError::Transport("write rejected".to_string()));
        }
        state.writes.push(value.to_vec());
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let mut state = lock(&self.state);
        self.ensure_live(&state)?;
        if self.uuid != RECORD_NOTIFY_CHAR_UUID {
            return Err(HrmError::Transport(format!(
                "characteristic {} does not notify",
                self.uuid
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(live) = state.live.as_mut() {
            live.notify = Some(tx);
        }
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        })
        .boxed())
    }
}
