//! Transport facade consumed by the session manager.
//!
//! The session never talks to a Bluetooth stack directly. It is generic over
//! [`Transport`], which hands out [`Link`]s, which in turn resolve
//! [`Characteristic`]s by service and characteristic UUID. Implementations:
//!
//! - [`crate::bluetooth::BluerTransport`] - BlueZ via `bluer` (feature `bluetooth`)
//! - [`crate::mock::MockTransport`] - scripted in-memory device (feature `mock-bluetooth`)
//!
//! Futures returned by the traits are `Send` so the session can drive them from
//! spawned tokio tasks (reconnect timers).

use std::future::Future;

use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::types::DeviceDescriptor;

/// Stream of raw notification values, in delivery order.
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// Events raised by a link independently of any in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The peer went away without being asked to.
    Lost,
}

/// Receiving half of a link's event subscription. Dropping it unsubscribes.
pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

/// Run `setup` on a freshly opened connection and run `close` if it fails.
///
/// The setup error is returned; a failing `close` is only logged.
#[cfg_attr(not(feature = "bluetooth"), allow(dead_code))]
pub(crate) async fn release_on_failure<T>(
    setup: impl Future<Output = Result<T>>,
    close: impl Future<Output = Result<()>>,
) -> Result<T> {
    match setup.await {
        Ok(value) => Ok(value),
        Err(err) => {
            debug!(error = %err, "link setup failed, releasing connection");
            if let Err(close_err) = close.await {
                warn!(error = %close_err, "releasing half-open connection failed");
            }
            Err(err)
        }
    }
}

/// Device discovery and link establishment.
pub trait Transport: Send + Sync + 'static {
    /// Live link type produced by [`Transport::open_link`].
    type Link: Link;

    /// Find a recorder advertising `service`.
    ///
    /// Fails with [`HrmError::NoDeviceSelected`](crate::HrmError::NoDeviceSelected)
    /// if selection is aborted.
    fn discover(&self, service: Uuid) -> impl Future<Output = Result<DeviceDescriptor>> + Send;

    /// Open a link to `device`.
    fn open_link(&self, device: &DeviceDescriptor)
        -> impl Future<Output = Result<Self::Link>> + Send;
}

/// An established link to one recorder.
pub trait Link: Send + Sync + 'static {
    /// Characteristic handle type.
    type Characteristic: Characteristic;

    /// Resolve `characteristic` inside primary service `service`.
    ///
    /// Fails with [`HrmError::LinkEstablishmentFailed`](crate::HrmError::LinkEstablishmentFailed)
    /// when either is missing.
    fn characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> impl Future<Output = Result<Self::Characteristic>> + Send;

    /// Take the link event subscription. Only one subscriber is supported;
    /// later calls return an already-closed receiver.
    fn events(&self) -> LinkEvents;

    /// Tear the link down.
    fn disconnect(&self) -> impl Future<Output = Result<()>> + Send;
}

/// A resolved characteristic.
pub trait Characteristic: Send + Sync + 'static {
    /// Single read.
    fn read(&self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Single write.
    fn write(&self, value: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Arm notifications and return the value stream.
    fn notifications(&self) -> impl Future<Output = Result<NotificationStream>> + Send;
}
