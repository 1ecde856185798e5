use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use pretty_assertions::assert_eq;

use gattwrap::{
    AdapterName, AddressType, AttributeHandle, Backend, BackendError, BackendKind,
    ConnectionManager, DeviceAddress, NotificationSink, ProtocolError, ScannedDevice,
};

const PEER: DeviceAddress = DeviceAddress::new([0xC4, 0x7C, 0x8D, 0x6A, 0x3E, 0x01]);
const OTHER: DeviceAddress = DeviceAddress::new([0x65, 0xB8, 0x8C, 0x38, 0xD5, 0x77]);

/// Records every call it receives; reads fail when `fail_reads` is set.
#[derive(Debug, Clone, Default)]
struct SpyBackend {
    calls: Arc<Mutex<Vec<String>>>,
    linked: bool,
    fail_reads: bool,
    drops_link_on_error: bool,
    scanning: bool,
}

impl SpyBackend {
    fn record(&self, call: impl Into<String>) {
        self.calls
            .lock()
            .expect("call log should not be poisoned")
            .push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("call log should not be poisoned")
            .clone()
    }
}

#[async_trait]
impl Backend for SpyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fake
    }

    async fn connect(
        &mut self,
        address: DeviceAddress,
        address_type: AddressType,
    ) -> Result<(), BackendError> {
        self.record(format!("connect {address} {address_type}"));
        self.linked = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.record("disconnect");
        self.linked = false;
    }

    fn is_connected(&self) -> bool {
        self.linked
    }

    async fn read_handle(&mut self, handle: AttributeHandle) -> Result<Vec<u8>, BackendError> {
        self.record(format!("read {handle}"));
        if self.fail_reads {
            if self.drops_link_on_error {
                self.linked = false;
            }
            return Err(ProtocolError::UnexpectedOpcode {
                expected: 0x0B,
                actual: 0x01,
            }
            .into());
        }
        Ok(vec![0x2A])
    }

    async fn write_handle(
        &mut self,
        handle: AttributeHandle,
        _value: &[u8],
    ) -> Result<bool, BackendError> {
        self.record(format!("write {handle}"));
        Ok(true)
    }

    async fn wait_for_notification(
        &mut self,
        handle: AttributeHandle,
        _sink: &mut (dyn NotificationSink + Send),
        _timeout: Duration,
    ) -> Result<bool, BackendError> {
        self.record(format!("notify {handle}"));
        Ok(false)
    }

    async fn scan_for_devices(
        &self,
        _timeout: Duration,
        _adapter: &AdapterName,
    ) -> Result<Vec<ScannedDevice>, BackendError> {
        self.record("scan");
        Ok(Vec::new())
    }

    async fn check_backend(&self) -> bool {
        true
    }

    fn supports_scanning(&self) -> bool {
        self.scanning
    }
}

fn manager(spy: &SpyBackend) -> ConnectionManager {
    ConnectionManager::new(Box::new(spy.clone()))
}

#[tokio::test]
async fn operations_while_disconnected_never_reach_the_backend() {
    let spy = SpyBackend::default();
    let mut manager = manager(&spy);
    let handle = AttributeHandle::new(0x38);
    let mut sink = |_handle: AttributeHandle, _payload: &[u8]| {};

    assert_matches!(
        manager.read_handle(handle).await,
        Err(BackendError::NotConnected)
    );
    assert_matches!(
        manager.write_handle(handle, &[0x01]).await,
        Err(BackendError::NotConnected)
    );
    assert_matches!(
        manager
            .wait_for_notification(handle, &mut sink, Duration::from_secs(1))
            .await,
        Err(BackendError::NotConnected)
    );
    assert!(spy.calls().is_empty());
}

#[tokio::test]
async fn scope_connects_and_always_disconnects() {
    let spy = SpyBackend::default();
    let mut manager = manager(&spy).with_address_type(AddressType::Random);

    {
        let mut scope = manager.scope(PEER).await.expect("connect should succeed");
        assert!(scope.is_connected());
        let value = scope
            .read_handle(AttributeHandle::new(0x38))
            .await
            .expect("read should succeed");
        assert_eq!(vec![0x2A], value);
    }

    assert!(!manager.is_connected());
    assert_eq!(
        vec![
            "connect C4:7C:8D:6A:3E:01 random".to_string(),
            "read 0x0038".to_string(),
            "disconnect".to_string(),
        ],
        spy.calls()
    );
}

async fn read_inside_scope(manager: &mut ConnectionManager) -> Result<Vec<u8>, BackendError> {
    let mut scope = manager.scope(PEER).await?;
    let value = scope.read_handle(AttributeHandle::new(0x38)).await?;
    Ok(value)
}

#[tokio::test]
async fn errors_propagate_after_disconnect_has_run() {
    let spy = SpyBackend {
        fail_reads: true,
        ..SpyBackend::default()
    };
    let mut manager = manager(&spy);

    let result = read_inside_scope(&mut manager).await;

    assert_matches!(
        result,
        Err(BackendError::Protocol(ProtocolError::UnexpectedOpcode {
            actual: 0x01,
            ..
        }))
    );
    assert!(!manager.is_connected());
    assert_eq!(Some(&"disconnect".to_string()), spy.calls().last());
}

#[tokio::test]
async fn link_dropped_by_the_backend_is_released() {
    let spy = SpyBackend {
        fail_reads: true,
        drops_link_on_error: true,
        ..SpyBackend::default()
    };
    let mut manager = manager(&spy);
    manager.connect(PEER).await.expect("connect should succeed");

    let result = manager.read_handle(AttributeHandle::new(0x38)).await;

    assert_matches!(result, Err(BackendError::Protocol(_)));
    assert!(!manager.is_connected());
    assert_eq!(None, manager.peer());

    manager
        .connect(PEER)
        .await
        .expect("reconnecting after a dropped link should succeed");
    assert!(manager.is_connected());
    assert_eq!(
        vec![
            "connect C4:7C:8D:6A:3E:01 public".to_string(),
            "read 0x0038".to_string(),
            "connect C4:7C:8D:6A:3E:01 public".to_string(),
        ],
        spy.calls()
    );
}

#[tokio::test]
async fn failed_operation_on_a_live_link_keeps_the_connection() {
    let spy = SpyBackend {
        fail_reads: true,
        ..SpyBackend::default()
    };
    let mut manager = manager(&spy);
    manager.connect(PEER).await.expect("connect should succeed");

    let result = manager.read_handle(AttributeHandle::new(0x38)).await;

    assert_matches!(result, Err(BackendError::Protocol(_)));
    assert_eq!(Some(PEER), manager.peer());
    assert_matches!(
        manager.connect(OTHER).await,
        Err(BackendError::AlreadyConnected { address }) if address == PEER
    );
}

#[tokio::test]
async fn nested_scope_is_rejected_and_outer_scope_survives() {
    let spy = SpyBackend::default();
    let mut manager = manager(&spy);

    {
        let mut outer = manager.scope(PEER).await.expect("connect should succeed");

        let nested = outer.scope(OTHER).await.map(|_scope| ());
        assert_matches!(nested, Err(BackendError::AlreadyConnected { address }) if address == PEER);

        assert!(outer.is_connected());
        assert_eq!(Some(PEER), outer.peer());
        outer
            .write_handle(AttributeHandle::new(0x33), &[0x01])
            .await
            .expect("outer scope should still be usable");
    }

    assert!(!manager.is_connected());
    let calls = spy.calls();
    assert_eq!(1, calls.iter().filter(|call| call.starts_with("connect")).count());
    assert_eq!(1, calls.iter().filter(|call| *call == "disconnect").count());
}

#[tokio::test]
async fn manager_is_reusable_across_cycles() {
    let spy = SpyBackend::default();
    let mut manager = manager(&spy);

    for address in [PEER, OTHER, PEER] {
        let scope = manager.scope(address).await.expect("connect should succeed");
        assert_eq!(Some(address), scope.peer());
    }

    assert_eq!(
        3,
        spy.calls()
            .iter()
            .filter(|call| *call == "disconnect")
            .count()
    );
}

#[tokio::test]
async fn scanning_requires_backend_support() {
    let spy = SpyBackend::default();
    let non_scanning = manager(&spy);

    let result = non_scanning
        .scan_for_devices(Duration::from_secs(1), &AdapterName::default())
        .await;

    assert_matches!(
        result,
        Err(BackendError::Unsupported {
            operation: "scanning",
            ..
        })
    );
    assert!(spy.calls().is_empty());

    let scanner = SpyBackend {
        scanning: true,
        ..SpyBackend::default()
    };
    let devices = manager(&scanner)
        .scan_for_devices(Duration::from_secs(1), &AdapterName::default())
        .await
        .expect("scan does not need a connection");
    assert!(devices.is_empty());
    assert_eq!(vec!["scan".to_string()], scanner.calls());
}
