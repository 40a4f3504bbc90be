//! Recorder session manager.
//!
//! Owns the connection state machine for one recorder:
//!
//! ```text
//!                connect()                 link + chars + notify armed
//! Disconnected ───────────► Connecting ─────────────────────────────► Connected
//!      ▲                        │ mandatory step failed                 │
//!      │◄───────────────────────┘                                       │ link lost
//!      │                                                                ▼
//!      │◄──── budget spent / device unbound ──────────────────── Reconnecting
//!      │                                                  (attempt n, n × base delay)
//!      │◄──── disconnect() from any state
//! ```
//!
//! All session fields live in a single [`Session`] behind an async mutex, so
//! every transition is serialized. Each live link owns two tasks: the
//! notification pump, which decodes frames in delivery order and forwards them
//! to the sink, and the link watcher, which reacts to unsolicited losses.
//!
//! Reconnect timers are plain spawned tasks keyed by an epoch counter. Any
//! teardown, explicit disconnect or new connection bumps the epoch; a timer
//! whose captured epoch no longer matches does nothing when it fires.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::error::{HrmError, Result};
use crate::protocol::{
    self, COMMAND_CHAR_UUID, DEVICE_INFO_SERVICE_UUID, FIRMWARE_REVISION_CHAR_UUID,
    RECORD_NOTIFY_CHAR_UUID, RECORD_STATUS_CHAR_UUID, SERVICE_UUID,
};
use crate::sink::{RecordSink, SinkEvent};
use crate::transport::{Characteristic, Link, LinkEvent, LinkEvents, NotificationStream, Transport};
use crate::types::{
    ConnectionState, DeviceDescriptor, RecordRange, SessionStatus, UNKNOWN_FIRMWARE,
};

/// Client-side session for one recorder.
///
/// Cheap to clone; clones share the same session.
pub struct SessionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for SessionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T: Transport> {
    transport: T,
    sink: Arc<dyn RecordSink>,
    settings: SessionConfig,
    session: Mutex<Session<T::Link>>,
    state_tx: watch::Sender<ConnectionState>,
}

struct Session<L: Link> {
    device: Option<DeviceDescriptor>,
    phase: Phase<L>,
    retry_budget: u32,
    epoch: u64,
    firmware_revision: String,
}

enum Phase<L: Link> {
    Disconnected,
    Connecting,
    Connected(LiveLink<L>),
    Reconnecting {
        attempt: u32,
        scheduled_at: DateTime<Utc>,
    },
}

impl<L: Link> Phase<L> {
    fn state(&self) -> ConnectionState {
        match self {
            Self::Disconnected => ConnectionState::Disconnected,
            Self::Connecting => ConnectionState::Connecting,
            Self::Connected(_) => ConnectionState::Connected,
            Self::Reconnecting {
                attempt,
                scheduled_at,
            } => ConnectionState::Reconnecting {
                attempt: *attempt,
                scheduled_at: *scheduled_at,
            },
        }
    }
}

struct LiveLink<L: Link> {
    link: L,
    command: L::Characteristic,
    status: L::Characteristic,
    pump: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

impl<L: Link> LiveLink<L> {
    async fn close(self) {
        self.watcher.abort();
        self.pump.abort();
        if let Err(err) = self.link.disconnect().await {
            warn!(error = %err, "link teardown failed");
        }
    }
}

/// Everything resolved during link establishment, before tasks are spawned.
struct Opened<L: Link> {
    link: L,
    events: LinkEvents,
    command: L::Characteristic,
    status: L::Characteristic,
    notifications: NotificationStream,
    firmware_revision: String,
}

impl<T: Transport> SessionManager<T> {
    /// Create a disconnected session.
    pub fn new(transport: T, sink: Arc<dyn RecordSink>, settings: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                sink,
                settings,
                session: Mutex::new(Session {
                    device: None,
                    phase: Phase::Disconnected,
                    retry_budget: 0,
                    epoch: 0,
                    firmware_revision: UNKNOWN_FIRMWARE.to_string(),
                }),
                state_tx,
            }),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Snapshot of the session.
    pub async fn status(&self) -> SessionStatus {
        let session = self.inner.session.lock().await;
        SessionStatus {
            state: session.phase.state(),
            device: session.device.clone(),
            firmware_revision: session.firmware_revision.clone(),
            retry_budget: session.retry_budget,
        }
    }

    /// Discover a recorder advertising the recorder service.
    ///
    /// Does not bind the device; pass it to [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// [`HrmError::NoDeviceSelected`] if discovery is aborted or times out.
    #[instrument(skip(self))]
    pub async fn request_device(&self) -> Result<DeviceDescriptor> {
        let timeout = self.inner.settings.discovery_timeout();
        match tokio::time::timeout(timeout, self.inner.transport.discover(SERVICE_UUID)).await {
            Ok(Ok(device)) => {
                info!(%device, "recorder selected");
                Ok(device)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "discovery timed out");
                Err(HrmError::NoDeviceSelected)
            }
        }
    }

    /// Connect to `device`, or reconnect the bound device when `None`.
    ///
    /// Any live link is torn down first and any pending reconnect is
    /// cancelled. The device stays bound even if this attempt fails.
    ///
    /// # Errors
    ///
    /// - [`HrmError::NoDeviceBound`] if no device is given or bound.
    /// - [`HrmError::LinkEstablishmentFailed`] if the link, the recorder
    ///   service or a mandatory characteristic is unavailable.
    #[instrument(skip(self, device), fields(device = ?device.as_ref().map(|d| &d.id)))]
    pub async fn connect(&self, device: Option<DeviceDescriptor>) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        self.inner.teardown(&mut session).await;

        if let Some(device) = device {
            session.device = Some(device);
        }
        let Some(device) = session.device.clone() else {
            self.inner.publish(&session);
            return Err(HrmError::NoDeviceBound);
        };

        self.inner.establish(&mut session, device).await
    }

    /// Tear down the live link and unbind the device.
    ///
    /// Cancels any pending reconnect. A no-op when already disconnected.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let mut session = self.inner.session.lock().await;
        let device = session.device.take();
        self.inner.teardown(&mut session).await;
        self.inner.publish(&session);
        if let Some(device) = device {
            info!(%device, "disconnected");
        }
    }

    /// Write a raw command.
    ///
    /// Only written while connected; in any other state the command is
    /// dropped without error. Callers that need delivery must check
    /// [`state`](Self::state) first.
    ///
    /// # Errors
    ///
    /// Returns the transport error if a write on a live link fails.
    pub async fn write_command(&self, bytes: &[u8]) -> Result<()> {
        let session = self.inner.session.lock().await;
        match &session.phase {
            Phase::Connected(live) => live.command.write(bytes).await,
            phase => {
                debug!(state = ?phase.state(), len = bytes.len(), "link not ready, command dropped");
                Ok(())
            }
        }
    }

    /// Read the record index range currently stored on the device.
    ///
    /// The range is also emitted to the sink.
    ///
    /// # Errors
    ///
    /// - [`HrmError::NotConnected`] without a live link.
    /// - [`HrmError::MalformedRecord`] if the status value is too short.
    pub async fn query_record_range(&self) -> Result<RecordRange> {
        let raw = {
            let session = self.inner.session.lock().await;
            let Phase::Connected(live) = &session.phase else {
                return Err(HrmError::NotConnected);
            };
            live.status.read().await?
        };

        let range = protocol::decode_record_range(&raw)?;
        self.inner.sink.emit(SinkEvent::Range(range));
        Ok(range)
    }

    /// Ask the device to notify `count` records starting at `start_id`.
    ///
    /// Follows [`write_command`](Self::write_command) semantics.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the write fails on a live link.
    pub async fn request_records(&self, start_id: u32, count: u16) -> Result<()> {
        debug!(start_id, count, "requesting records");
        self.write_command(&protocol::encode_record_request(start_id, count))
            .await
    }

    /// Set the device clock to now.
    ///
    /// Follows [`write_command`](Self::write_command) semantics.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the write fails on a live link.
    pub async fn sync_clock(&self) -> Result<()> {
        self.write_command(&protocol::encode_time_sync(posix_now()))
            .await
    }
}

impl<T: Transport> Inner<T> {
    fn publish(&self, session: &Session<T::Link>) {
        self.state_tx.send_replace(session.phase.state());
    }

    /// Drop the live link, if any, and invalidate pending timers.
    async fn teardown(&self, session: &mut Session<T::Link>) {
        session.epoch += 1;
        if let Phase::Connected(live) = std::mem::replace(&mut session.phase, Phase::Disconnected) {
            live.close().await;
        }
    }

    /// Run `Connecting` to completion for `device`.
    async fn establish(
        self: &Arc<Self>,
        session: &mut Session<T::Link>,
        device: DeviceDescriptor,
    ) -> Result<()> {
        session.epoch += 1;
        let epoch = session.epoch;
        session.phase = Phase::Connecting;
        self.publish(session);
        info!(%device, "connecting");

        match self.open(&device).await {
            Ok(opened) => {
                session.firmware_revision = opened.firmware_revision;
                session.phase = Phase::Connected(LiveLink {
                    pump: tokio::spawn(pump_notifications(
                        opened.notifications,
                        Arc::clone(&self.sink),
                    )),
                    watcher: tokio::spawn(watch_link(Arc::downgrade(self), opened.events, epoch)),
                    link: opened.link,
                    command: opened.command,
                    status: opened.status,
                });
                session.retry_budget = 0;
                self.publish(session);
                info!(%device, firmware = %session.firmware_revision, "connected");
                Ok(())
            }
            Err(err) => {
                session.phase = Phase::Disconnected;
                self.publish(session);
                warn!(%device, error = %err, "link establishment failed");
                Err(err)
            }
        }
    }

    async fn open(&self, device: &DeviceDescriptor) -> Result<Opened<T::Link>> {
        let link = self
            .transport
            .open_link(device)
            .await
            .map_err(into_link_failure)?;
        let events = link.events();

        match self.resolve(&link).await {
            Ok((command, status, notifications, firmware_revision)) => Ok(Opened {
                link,
                events,
                command,
                status,
                notifications,
                firmware_revision,
            }),
            Err(err) => {
                if let Err(close_err) = link.disconnect().await {
                    debug!(error = %close_err, "closing half-open link failed");
                }
                Err(err)
            }
        }
    }

    async fn resolve(
        &self,
        link: &T::Link,
    ) -> Result<(
        <T::Link as Link>::Characteristic,
        <T::Link as Link>::Characteristic,
        NotificationStream,
        String,
    )> {
        // Best-effort: a missing device information service is normal.
        let firmware_revision = match read_firmware_revision(link).await {
            Ok(revision) => revision,
            Err(err) => {
                debug!(error = %err, "firmware revision unavailable");
                UNKNOWN_FIRMWARE.to_string()
            }
        };

        let command = link
            .characteristic(SERVICE_UUID, COMMAND_CHAR_UUID)
            .await
            .map_err(into_link_failure)?;
        let status = link
            .characteristic(SERVICE_UUID, RECORD_STATUS_CHAR_UUID)
            .await
            .map_err(into_link_failure)?;
        let notify = link
            .characteristic(SERVICE_UUID, RECORD_NOTIFY_CHAR_UUID)
            .await
            .map_err(into_link_failure)?;

        if self.settings.sync_clock_on_connect {
            let now = posix_now();
            match command.write(&protocol::encode_time_sync(now)).await {
                Ok(()) => debug!(posix = now, "device clock synced"),
                Err(err) => warn!(error = %err, "clock sync failed"),
            }
        }

        let notifications = notify.notifications().await.map_err(into_link_failure)?;
        Ok((command, status, notifications, firmware_revision))
    }

    /// React to an unsolicited loss of the link opened at `link_epoch`.
    async fn handle_link_lost(self: &Arc<Self>, link_epoch: u64) {
        let mut session = self.session.lock().await;
        if session.epoch != link_epoch {
            debug!("stale link event ignored");
            return;
        }

        if let Phase::Connected(live) = std::mem::replace(&mut session.phase, Phase::Disconnected) {
            // The watcher is the task running this; its handle is dropped, not aborted.
            live.pump.abort();
        }
        warn!(device = ?session.device.as_ref().map(|d| &d.id), "link lost");

        self.schedule_reconnect(&mut session);
        self.publish(&session);
    }

    /// Spend one unit of retry budget on a delayed reconnect, or give up.
    fn schedule_reconnect(self: &Arc<Self>, session: &mut Session<T::Link>) {
        session.epoch += 1;
        session.phase = Phase::Disconnected;

        if session.device.is_none() {
            return;
        }
        if session.retry_budget >= self.settings.max_reconnect_attempts {
            warn!(
                attempts = session.retry_budget,
                "retry budget spent, automatic reconnection stopped"
            );
            return;
        }

        session.retry_budget += 1;
        let attempt = session.retry_budget;
        let delay = self.settings.reconnect_base_delay().saturating_mul(attempt);
        let scheduled_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        session.phase = Phase::Reconnecting {
            attempt,
            scheduled_at,
        };

        info!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnect scheduled"
        );
        tokio::spawn(reconnect_after(Arc::downgrade(self), session.epoch, delay));
    }

    async fn fire_reconnect(self: &Arc<Self>, epoch: u64) {
        let mut session = self.session.lock().await;
        if session.epoch != epoch {
            debug!("reconnect cancelled");
            return;
        }
        let Some(device) = session.device.clone() else {
            session.phase = Phase::Disconnected;
            self.publish(&session);
            return;
        };

        info!(%device, attempt = session.retry_budget, "reconnecting");
        if self.establish(&mut session, device).await.is_err() {
            // A failed automatic attempt counts as another unsolicited loss.
            self.schedule_reconnect(&mut session);
            self.publish(&session);
        }
    }
}

/// Timer body for a scheduled reconnect. Boxed so the session futures do not
/// name themselves recursively.
fn reconnect_after<T: Transport>(
    inner: Weak<Inner<T>>,
    epoch: u64,
    delay: Duration,
) -> BoxFuture<'static, ()> {
    async move {
        tokio::time::sleep(delay).await;
        if let Some(inner) = inner.upgrade() {
            inner.fire_reconnect(epoch).await;
        }
    }
    .boxed()
}

async fn watch_link<T: Transport>(inner: Weak<Inner<T>>, mut events: LinkEvents, epoch: u64) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Lost => {
                if let Some(inner) = inner.upgrade() {
                    inner.handle_link_lost(epoch).await;
                }
                return;
            }
        }
    }
    debug!("link event stream closed");
}

async fn pump_notifications(mut frames: NotificationStream, sink: Arc<dyn RecordSink>) {
    while let Some(frame) = frames.next().await {
        handle_notification(sink.as_ref(), &frame);
    }
    debug!("notification stream ended");
}

/// Decode one frame and forward it. Malformed frames are logged and dropped.
fn handle_notification(sink: &dyn RecordSink, frame: &[u8]) {
    match protocol::decode_record(frame) {
        Ok(record) => sink.emit(SinkEvent::Record(record)),
        Err(err) => warn!(error = %err, len = frame.len(), "dropping malformed frame"),
    }
}

async fn read_firmware_revision<L: Link>(link: &L) -> Result<String> {
    let characteristic = link
        .characteristic(DEVICE_INFO_SERVICE_UUID, FIRMWARE_REVISION_CHAR_UUID)
        .await
        .map_err(optional_metadata)?;
    let raw = characteristic.read().await.map_err(optional_metadata)?;
    Ok(String::from_utf8_lossy(&raw)
        .trim_end_matches('\0')
        .trim()
        .to_string())
}

fn optional_metadata(err: HrmError) -> HrmError {
    HrmError::OptionalMetadataUnavailable(err.to_string())
}

fn into_link_failure(err: HrmError) -> HrmError {
    match err {
        HrmError::Transport(message) => HrmError::LinkEstablishmentFailed(message),
        other => other,
    }
}

fn posix_now() -> u32 {
    u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::protocol::{OP_REQUEST_RECORDS, OP_SET_CLOCK, RRI_FRAME_LEN};
    use crate::sink::BroadcastSink;
    use crate::types::{
        EnvironmentalPayload, RecordEnvelope, RecordKind, RecordPayload, RriPayload,
    };
    use tokio::sync::broadcast;
    use tokio::time::{sleep, timeout};

    struct Harness {
        mock: MockTransport,
        manager: SessionManager<MockTransport>,
        records: broadcast::Receiver<SinkEvent>,
    }

    fn harness() -> Harness {
        let mock = MockTransport::default();
        let sink = BroadcastSink::new(64);
        let records = sink.subscribe();
        let manager = SessionManager::new(mock.clone(), Arc::new(sink), SessionConfig::default());
        Harness {
            mock,
            manager,
            records,
        }
    }

    async fn wait_for(
        manager: &SessionManager<MockTransport>,
        pred: impl FnMut(&ConnectionState) -> bool,
    ) -> ConnectionState {
        let mut rx = manager.subscribe_state();
        let state = timeout(Duration::from_secs(60), rx.wait_for(pred))
            .await
            .expect("state not reached in time")
            .expect("state channel closed");
        *state
    }

    fn rri_record(id: u32) -> RecordEnvelope {
        RecordEnvelope {
            id,
            kind: RecordKind::Rri,
            length: 22,
            payload: RecordPayload::Rri(RriPayload {
                timestamp: 1000,
                intervals: [800, 805, 810, 795, 802, 798, 811, 799],
                led_state: 1,
                sequence: 5,
            }),
        }
    }

    fn env_record(id: u32) -> RecordEnvelope {
        RecordEnvelope {
            id,
            kind: RecordKind::Environmental,
            length: 14,
            payload: RecordPayload::Environmental(EnvironmentalPayload {
                timestamp: 1001,
                humidity: 55.0,
                temperature: 36.5,
                skin_temperature: 32.0,
                et_temperature: 33.0,
                battery: 80,
                flags: 0,
            }),
        }
    }

    #[tokio::test]
    async fn test_connect_without_device_fails() {
        let h = harness();
        let err = h.manager.connect(None).await.unwrap_err();
        assert!(matches!(err, HrmError::NoDeviceBound));
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.mock.open_attempts(), 0);
    }

    #[tokio::test]
    async fn test_connect_establishes_session() {
        let h = harness();
        h.manager.connect(Some(h.mock.device())).await.unwrap();

        assert_eq!(h.manager.state(), ConnectionState::Connected);
        let status = h.manager.status().await;
        assert_eq!(status.device, Some(h.mock.device()));
        assert_eq!(status.firmware_revision, "1.0.0-mock");
        assert_eq!(status.retry_budget, 0);

        let writes = h.mock.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), 5);
        assert_eq!(writes[0][0], OP_SET_CLOCK);
    }

    #[tokio::test]
    async fn test_clock_sync_can_be_disabled() {
        let mock = MockTransport::default();
        let settings = SessionConfig {
            sync_clock_on_connect: false,
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(mock.clone(), Arc::new(BroadcastSink::new(4)), settings);
        manager.connect(Some(mock.device())).await.unwrap();
        assert!(mock.writes().is_empty());
    }

    #[tokio::test]
    async fn test_missing_firmware_revision_is_not_fatal() {
        let h = harness();
        h.mock.set_firmware_revision(None);
        h.manager.connect(Some(h.mock.device())).await.unwrap();

        assert_eq!(h.manager.state(), ConnectionState::Connected);
        assert_eq!(h.manager.status().await.firmware_revision, UNKNOWN_FIRMWARE);
    }

    #[tokio::test]
    async fn test_failed_clock_sync_is_not_fatal() {
        let h = harness();
        h.mock.set_fail_writes(true);
        h.manager.connect(Some(h.mock.device())).await.unwrap();
        assert_eq!(h.manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_missing_characteristic_fails_connect() {
        let h = harness();
        h.mock.remove(RECORD_NOTIFY_CHAR_UUID);

        let err = h.manager.connect(Some(h.mock.device())).await.unwrap_err();
        assert!(matches!(err, HrmError::LinkEstablishmentFailed(_)));
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert!(!h.mock.is_linked());

        // The device stays bound for an explicit retry.
        assert_eq!(h.manager.status().await.device, Some(h.mock.device()));
    }

    #[tokio::test]
    async fn test_missing_service_fails_connect() {
        let h = harness();
        h.mock.remove(SERVICE_UUID);
        let err = h.manager.connect(Some(h.mock.device())).await.unwrap_err();
        assert!(matches!(err, HrmError::LinkEstablishmentFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_connect_failure_does_not_schedule_retry() {
        let h = harness();
        h.mock.fail_next_opens(1);
        assert!(h.manager.connect(Some(h.mock.device())).await.is_err());

        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.mock.open_attempts(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_reuses_bound_device() {
        let h = harness();
        h.manager.connect(Some(h.mock.device())).await.unwrap();
        h.manager.connect(None).await.unwrap();

        assert_eq!(h.mock.open_attempts(), 2);
        assert_eq!(h.mock.disconnects(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_notifications_are_forwarded_in_order() {
        let mut h = harness();
        h.manager.connect(Some(h.mock.device())).await.unwrap();

        assert!(h.mock.notify_record(&rri_record(42)));
        assert!(h.mock.notify(&[1, 0, 0, 0, 0x01, 22, 0, 0])); // truncated RRI
        assert!(h.mock.notify(&[9, 0, 0, 0, 0xFF, 0]));
        assert!(h.mock.notify_record(&env_record(43)));

        let first = h.records.recv().await.unwrap();
        assert_eq!(first, SinkEvent::Record(rri_record(42)));

        let SinkEvent::Record(unknown) = h.records.recv().await.unwrap() else {
            panic!("expected a record");
        };
        assert_eq!(unknown.kind, RecordKind::Unknown(0xFF));
        assert_eq!(unknown.payload, RecordPayload::Empty);

        let last = h.records.recv().await.unwrap();
        assert_eq!(last, SinkEvent::Record(env_record(43)));

        // The malformed frame did not end the stream.
        assert_eq!(h.manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_handle_notification_drops_malformed_frames() {
        let sink = BroadcastSink::new(4);
        let mut rx = sink.subscribe();
        let mut short_rri = [0u8; RRI_FRAME_LEN - 1];
        short_rri[4] = 0x01;
        handle_notification(&sink, &short_rri);
        handle_notification(&sink, &[0x01, 0x00]);
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_write_command_while_disconnected_is_dropped() {
        let h = harness();
        h.manager.write_command(&[0x10, 0, 0, 0, 0, 1, 0]).await.unwrap();
        h.manager.request_records(1, 1).await.unwrap();
        assert!(h.mock.writes().is_empty());
    }

    #[tokio::test]
    async fn test_request_records_writes_command() {
        let h = harness();
        h.manager.connect(Some(h.mock.device())).await.unwrap();
        h.manager.request_records(100, 20).await.unwrap();

        let writes = h.mock.writes();
        let last = writes.last().unwrap();
        assert_eq!(last[0], OP_REQUEST_RECORDS);
        assert_eq!(last.as_slice(), &protocol::encode_record_request(100, 20)[..]);
    }

    #[tokio::test]
    async fn test_write_failure_on_live_link_is_returned() {
        let h = harness();
        h.manager.connect(Some(h.mock.device())).await.unwrap();
        h.mock.set_fail_writes(true);
        assert!(matches!(
            h.manager.write_command(&[0xFB]).await,
            Err(HrmError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_query_record_range() {
        let mut h = harness();
        let range = RecordRange {
            min_id: 100,
            max_id: 4200,
        };
        h.mock.set_record_range(range);

        assert!(matches!(
            h.manager.query_record_range().await,
            Err(HrmError::NotConnected)
        ));

        h.manager.connect(Some(h.mock.device())).await.unwrap();
        assert_eq!(h.manager.query_record_range().await.unwrap(), range);
        assert_eq!(h.records.recv().await.unwrap(), SinkEvent::Range(range));
    }

    #[tokio::test]
    async fn test_request_device() {
        let h = harness();
        assert_eq!(h.manager.request_device().await.unwrap(), h.mock.device());

        h.mock.set_discoverable(false);
        assert!(matches!(
            h.manager.request_device().await,
            Err(HrmError::NoDeviceSelected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_reconnects_after_backoff() {
        let h = harness();
        h.manager.connect(Some(h.mock.device())).await.unwrap();

        assert!(h.mock.drop_link());
        let state = wait_for(&h.manager, |s| {
            matches!(s, ConnectionState::Reconnecting { .. })
        })
        .await;
        assert!(matches!(
            state,
            ConnectionState::Reconnecting { attempt: 1, .. }
        ));
        assert_eq!(h.manager.status().await.retry_budget, 1);

        sleep(Duration::from_millis(999)).await;
        assert_eq!(h.mock.open_attempts(), 1);

        sleep(Duration::from_millis(2)).await;
        wait_for(&h.manager, ConnectionState::is_connected).await;
        assert_eq!(h.mock.open_attempts(), 2);
        assert_eq!(h.manager.status().await.retry_budget, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_state_resets_retry_budget() {
        let h = harness();
        h.manager.connect(Some(h.mock.device())).await.unwrap();

        for _ in 0..5 {
            assert!(h.mock.drop_link());
            let state = wait_for(&h.manager, |s| {
                matches!(s, ConnectionState::Reconnecting { .. })
            })
            .await;
            assert!(matches!(
                state,
                ConnectionState::Reconnecting { attempt: 1, .. }
            ));
            wait_for(&h.manager, ConnectionState::is_connected).await;
        }
        assert_eq!(h.mock.open_attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhaustion_stops_reconnecting() {
        let h = harness();
        h.manager.connect(Some(h.mock.device())).await.unwrap();
        h.mock.fail_next_opens(u32::MAX);

        assert!(h.mock.drop_link());

        // Attempts fire at 1s, then 2s and 3s after each failure.
        sleep(Duration::from_millis(1000 + 2000 + 3000 + 10)).await;
        assert_eq!(h.mock.open_attempts(), 4);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.manager.status().await.retry_budget, 3);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.mock.open_attempts(), 4);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);

        // An explicit connect is still possible and resets the budget.
        h.mock.fail_next_opens(0);
        h.manager.connect(None).await.unwrap();
        assert_eq!(h.manager.status().await.retry_budget, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_linearly() {
        let h = harness();
        h.manager.connect(Some(h.mock.device())).await.unwrap();
        h.mock.fail_next_opens(u32::MAX);
        assert!(h.mock.drop_link());

        sleep(Duration::from_millis(1001)).await;
        assert_eq!(h.mock.open_attempts(), 2);
        assert!(matches!(
            h.manager.state(),
            ConnectionState::Reconnecting { attempt: 2, .. }
        ));

        sleep(Duration::from_millis(1998)).await;
        assert_eq!(h.mock.open_attempts(), 2);

        sleep(Duration::from_millis(3)).await;
        assert_eq!(h.mock.open_attempts(), 3);
        assert!(matches!(
            h.manager.state(),
            ConnectionState::Reconnecting { attempt: 3, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_backoff_still_publishes_reconnecting() {
        let mock = MockTransport::default();
        let settings = SessionConfig {
            reconnect_base_delay_ms: u64::MAX / 2,
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(mock.clone(), Arc::new(BroadcastSink::new(4)), settings);
        manager.connect(Some(mock.device())).await.unwrap();

        assert!(mock.drop_link());
        let state = wait_for(&manager, |s| {
            matches!(s, ConnectionState::Reconnecting { .. })
        })
        .await;
        assert_eq!(
            state,
            ConnectionState::Reconnecting {
                attempt: 1,
                scheduled_at: DateTime::<Utc>::MAX_UTC,
            }
        );

        // The session is still usable after the clamp.
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        manager.connect(Some(mock.device())).await.unwrap();
        assert_eq!(manager.status().await.retry_budget, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let h = harness();
        h.manager.connect(Some(h.mock.device())).await.unwrap();

        assert!(h.mock.drop_link());
        wait_for(&h.manager, |s| {
            matches!(s, ConnectionState::Reconnecting { .. })
        })
        .await;

        h.manager.disconnect().await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.mock.open_attempts(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert!(h.manager.status().await.device.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let h = harness();
        h.manager.disconnect().await;

        h.manager.connect(Some(h.mock.device())).await.unwrap();
        h.manager.disconnect().await;
        h.manager.disconnect().await;

        assert_eq!(h.mock.disconnects(), 1);
        assert!(!h.mock.is_linked());
        assert!(matches!(
            h.manager.connect(None).await,
            Err(HrmError::NoDeviceBound)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_disconnect_does_not_trigger_reconnect() {
        let h = harness();
        h.manager.connect(Some(h.mock.device())).await.unwrap();
        h.manager.disconnect().await;

        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.mock.open_attempts(), 1);
    }
}
