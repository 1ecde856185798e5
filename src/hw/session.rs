use std::ops::{Deref, DerefMut};
use std::time::Duration;

use tracing::{debug, instrument};

use super::backend::{Backend, BackendKind, NotificationSink};
use super::model::{AdapterName, AddressType, AttributeHandle, DeviceAddress, ScannedDevice};
use crate::error::BackendError;

/// Single-connection front end over one backend instance.
///
/// The manager owns the backend for its whole lifetime and reuses it across connect and
/// disconnect cycles. At most one connection is open at a time: connecting while connected
/// fails with [`BackendError::AlreadyConnected`] and leaves the open connection untouched.
#[derive(Debug)]
pub struct ConnectionManager {
    backend: Box<dyn Backend>,
    address_type: AddressType,
    peer: Option<DeviceAddress>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            address_type: AddressType::default(),
            peer: None,
        }
    }

    /// Sets the address type used for subsequent connections.
    #[must_use]
    pub fn with_address_type(mut self, address_type: AddressType) -> Self {
        self.address_type = address_type;
        self
    }

    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    #[must_use]
    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    /// Returns whether a connection opened through this manager is currently open.
    ///
    /// A backend that drops its link on a failed operation is noticed when that
    /// operation returns.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    /// Returns the connected peer, if any.
    #[must_use]
    pub fn peer(&self) -> Option<DeviceAddress> {
        self.peer
    }

    /// Opens a connection to `address`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::AlreadyConnected`] if a connection is already open, or the
    /// backend's error if connecting fails.
    #[instrument(skip(self), level = "debug", fields(backend = %self.backend.kind()))]
    pub async fn connect(&mut self, address: DeviceAddress) -> Result<(), BackendError> {
        if let Some(current) = self.peer {
            return Err(BackendError::AlreadyConnected { address: current });
        }

        self.backend.connect(address, self.address_type).await?;
        self.peer = Some(address);
        debug!(%address, "connected");
        Ok(())
    }

    /// Releases the connection; a no-op when disconnected.
    pub fn disconnect(&mut self) {
        if let Some(address) = self.peer.take() {
            debug!(%address, "disconnecting");
        }
        self.backend.disconnect();
    }

    /// Connects to `address` and returns a guard that disconnects when dropped.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionManager::connect`]. Nothing needs releasing when this fails.
    pub async fn scope(
        &mut self,
        address: DeviceAddress,
    ) -> Result<ConnectionScope<'_>, BackendError> {
        self.connect(address).await?;
        Ok(ConnectionScope { manager: self })
    }

    /// Reads the value of `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotConnected`] without touching the backend when disconnected,
    /// or the backend's error.
    pub async fn read_handle(&mut self, handle: AttributeHandle) -> Result<Vec<u8>, BackendError> {
        self.require_connected()?;
        let result = self.backend.read_handle(handle).await;
        self.settle(result)
    }

    /// Writes `value` to `handle` and returns whether the transport confirmed it.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`ConnectionManager::read_handle`].
    pub async fn write_handle(
        &mut self,
        handle: AttributeHandle,
        value: &[u8],
    ) -> Result<bool, BackendError> {
        self.require_connected()?;
        let result = self.backend.write_handle(handle, value).await;
        self.settle(result)
    }

    /// Waits up to `timeout` for notifications on `handle`, feeding each payload to `sink`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`ConnectionManager::read_handle`], plus
    /// [`BackendError::Unsupported`] for transports without notification support.
    pub async fn wait_for_notification(
        &mut self,
        handle: AttributeHandle,
        sink: &mut (dyn NotificationSink + Send),
        timeout: Duration,
    ) -> Result<bool, BackendError> {
        self.require_connected()?;
        let result = self
            .backend
            .wait_for_notification(handle, sink, timeout)
            .await;
        self.settle(result)
    }

    /// Scans for advertising devices. Does not require a connection.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Unsupported`] if the backend cannot scan, or the backend's
    /// error.
    pub async fn scan_for_devices(
        &self,
        timeout: Duration,
        adapter: &AdapterName,
    ) -> Result<Vec<ScannedDevice>, BackendError> {
        if !self.backend.supports_scanning() {
            return Err(BackendError::Unsupported {
                backend: self.backend.kind(),
                operation: "scanning",
            });
        }
        self.backend.scan_for_devices(timeout, adapter).await
    }

    pub async fn check_backend(&self) -> bool {
        self.backend.check_backend().await
    }

    #[must_use]
    pub fn supports_scanning(&self) -> bool {
        self.backend.supports_scanning()
    }

    /// Forgets the peer when a failed operation left the backend without a link.
    fn settle<T>(&mut self, result: Result<T, BackendError>) -> Result<T, BackendError> {
        if result.is_err()
            && !self.backend.is_connected()
            && let Some(address) = self.peer.take()
        {
            debug!(%address, "backend dropped the connection");
        }
        result
    }

    fn require_connected(&self) -> Result<(), BackendError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BackendError::NotConnected)
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.is_connected() {
            self.disconnect();
        }
    }
}

/// An open connection that is released when the guard goes out of scope.
///
/// Dereferences to the manager, so every operation is available through the guard.
#[derive(Debug)]
pub struct ConnectionScope<'a> {
    manager: &'a mut ConnectionManager,
}

impl Deref for ConnectionScope<'_> {
    type Target = ConnectionManager;

    fn deref(&self) -> &Self::Target {
        self.manager
    }
}

impl DerefMut for ConnectionScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.manager
    }
}

impl Drop for ConnectionScope<'_> {
    fn drop(&mut self) {
        self.manager.disconnect();
    }
}
