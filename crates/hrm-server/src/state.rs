//! Application state shared across handlers.

use std::sync::Arc;

use hrm_core::{BroadcastSink, Config, SessionManager};

/// Transport the server drives.
///
/// The scripted mock wins when both backends are compiled in, so tests and
/// `--features mock-bluetooth` never touch the system Bluetooth stack.
#[cfg(any(test, feature = "mock-bluetooth"))]
pub type Backend = hrm_core::MockTransport;

/// Transport the server drives.
#[cfg(all(not(test), not(feature = "mock-bluetooth"), feature = "bluetooth"))]
pub type Backend = hrm_core::BluerTransport;

#[cfg(not(any(test, feature = "bluetooth", feature = "mock-bluetooth")))]
compile_error!("enable either the `bluetooth` or the `mock-bluetooth` feature");

/// Open the configured backend.
///
/// # Errors
///
/// Returns an error if the Bluetooth adapter cannot be opened.
#[cfg(any(test, feature = "mock-bluetooth"))]
#[allow(clippy::unused_async)]
pub async fn open_backend() -> anyhow::Result<Backend> {
    tracing::warn!("using the scripted mock recorder");
    Ok(hrm_core::MockTransport::default())
}

/// Open the configured backend.
///
/// # Errors
///
/// Returns an error if the Bluetooth adapter cannot be opened.
#[cfg(all(not(test), not(feature = "mock-bluetooth"), feature = "bluetooth"))]
pub async fn open_backend() -> anyhow::Result<Backend> {
    Ok(hrm_core::BluerTransport::new().await?)
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    session: SessionManager<Backend>,
    records: BroadcastSink,
}

impl AppState {
    /// Wire a session over `backend` using `config`.
    #[must_use]
    pub fn new(backend: Backend, config: Config) -> Self {
        let records = BroadcastSink::new(config.server.stream_buffer);
        let session = SessionManager::new(
            backend,
            Arc::new(records.clone()),
            config.session.clone(),
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                session,
                records,
            }),
        }
    }

    /// Configuration the server was started with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The recorder session.
    #[must_use]
    pub fn session(&self) -> &SessionManager<Backend> {
        &self.inner.session
    }

    /// Live record feed; every decoded record and range query lands here.
    #[must_use]
    pub fn records(&self) -> &BroadcastSink {
        &self.inner.records
    }
}
