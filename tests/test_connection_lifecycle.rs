//! Connection lifecycle tests
//!
//! Drives the lifecycle manager through the transitions a real session goes
//! through: pairing, connect, drop, remote logout and administrative logout.

mod test_helpers;

use std::sync::Arc;
use std::time::Duration;
use wabridge::error::BridgeError;
use wabridge::protocol::{DeviceRecord, Jid};
use wabridge::session::{ConnectionLifecycleManager, ConnectionState, SessionEvent};
use wabridge::testing::mocks::MockTransport;

fn lifecycle(transport: MockTransport) -> Arc<ConnectionLifecycleManager<MockTransport>> {
    Arc::new(ConnectionLifecycleManager::new(Arc::new(transport)))
}

#[tokio::test]
async fn test_pairing_flow_stores_then_clears_qr() {
    let lifecycle = lifecycle(MockTransport::new());
    lifecycle.start().await.unwrap();
    assert_eq!(lifecycle.state().await, ConnectionState::Disconnected);

    lifecycle
        .apply_event(SessionEvent::QrIssued("2@first".into()))
        .await;
    lifecycle
        .apply_event(SessionEvent::QrIssued("2@second".into()))
        .await;
    assert_eq!(lifecycle.state().await, ConnectionState::AwaitingQr);
    assert_eq!(lifecycle.get_qr_code().await.unwrap(), "2@second");

    lifecycle
        .transport()
        .set_registered_id(Some(Jid::user("628123456")));
    lifecycle.apply_event(SessionEvent::Connected).await;

    assert!(lifecycle.is_connected().await);
    assert!(matches!(
        lifecycle.get_qr_code().await,
        Err(BridgeError::QrNotAvailable)
    ));
    let snapshot = lifecycle.snapshot().await;
    assert_eq!(
        snapshot.device(),
        Some(&DeviceRecord::paired(Jid::user("628123456")))
    );
}

#[tokio::test]
async fn test_qr_ignored_while_connected() {
    let lifecycle = lifecycle(MockTransport::new());
    lifecycle.apply_event(SessionEvent::Connected).await;
    lifecycle
        .apply_event(SessionEvent::QrIssued("2@late".into()))
        .await;

    assert_eq!(lifecycle.state().await, ConnectionState::Connected);
    assert!(lifecycle.get_qr_code().await.is_err());
}

#[tokio::test]
async fn test_remote_logout_lands_in_disconnected() {
    let lifecycle = lifecycle(MockTransport::new());
    lifecycle.apply_event(SessionEvent::Connected).await;
    lifecycle.apply_event(SessionEvent::LoggedOut).await;

    assert_eq!(lifecycle.state().await, ConnectionState::Disconnected);
    assert!(!lifecycle.is_connected().await);
}

#[tokio::test]
async fn test_start_failures_propagate() {
    let failing_bootstrap = lifecycle(MockTransport::new().with_failing_bootstrap());
    assert!(matches!(
        failing_bootstrap.start().await,
        Err(BridgeError::Bootstrap { .. })
    ));
    assert_eq!(failing_bootstrap.transport().connect_count(), 0);

    let failing_connect = lifecycle(MockTransport::new().with_failing_connect());
    assert!(failing_connect.start().await.is_err());
    assert_eq!(failing_connect.transport().connect_count(), 1);
}

#[tokio::test]
async fn test_logout_runs_every_step_and_is_idempotent() {
    let lifecycle = lifecycle(MockTransport::new().with_registered_id(Jid::user("628123456")));
    lifecycle.start().await.unwrap();
    lifecycle.apply_event(SessionEvent::Connected).await;

    lifecycle.logout().await.unwrap();
    let transport = lifecycle.transport();
    assert_eq!(transport.logout_count(), 1);
    assert_eq!(transport.disconnect_count(), 1);
    assert_eq!(transport.deleted_devices().len(), 1);
    assert!(!lifecycle.is_connected().await);

    // Second logout: nothing registered, no device record left
    lifecycle.logout().await.unwrap();
    assert_eq!(transport.logout_count(), 1);
    assert_eq!(transport.deleted_devices().len(), 1);
}

#[tokio::test]
async fn test_logout_continues_past_failing_steps() {
    let lifecycle = lifecycle(
        MockTransport::new()
            .with_registered_id(Jid::user("628123456"))
            .with_failing_logout()
            .with_failing_delete(),
    );
    lifecycle.start().await.unwrap();
    lifecycle
        .apply_event(SessionEvent::QrIssued("2@pending".into()))
        .await;

    assert!(lifecycle.logout().await.is_ok());
    assert_eq!(lifecycle.transport().disconnect_count(), 1);
    assert_eq!(lifecycle.transport().deleted_devices().len(), 1);
    assert!(lifecycle.get_qr_code().await.is_err());
    assert_eq!(lifecycle.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_stop_keeps_device_record() {
    let lifecycle = lifecycle(MockTransport::new().with_registered_id(Jid::user("628123456")));
    lifecycle.start().await.unwrap();
    lifecycle.apply_event(SessionEvent::Connected).await;

    lifecycle.stop().await;

    assert!(!lifecycle.is_connected().await);
    assert!(lifecycle.snapshot().await.device().is_some());
    assert!(lifecycle.transport().deleted_devices().is_empty());
}

#[tokio::test]
async fn test_logout_waits_for_in_flight_handlers() {
    let lifecycle = lifecycle(MockTransport::new());
    lifecycle.apply_event(SessionEvent::Connected).await;

    let guard = lifecycle.message_guard().await;
    let logout = {
        let lifecycle = Arc::clone(&lifecycle);
        tokio::spawn(async move { lifecycle.logout().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!logout.is_finished());
    assert_eq!(lifecycle.transport().disconnect_count(), 0);

    drop(guard);
    logout.await.unwrap().unwrap();
    assert_eq!(lifecycle.transport().disconnect_count(), 1);
}

#[tokio::test]
async fn test_concurrent_logouts_deregister_once() {
    let lifecycle = lifecycle(MockTransport::new().with_registered_id(Jid::user("628123456")));
    lifecycle.start().await.unwrap();
    lifecycle.apply_event(SessionEvent::Connected).await;

    let (first, second) = futures::join!(lifecycle.logout(), lifecycle.logout());
    assert!(first.is_ok());
    assert!(second.is_ok());

    // Serialized by the teardown gate; the second run finds nothing registered
    assert_eq!(lifecycle.transport().logout_count(), 1);
    assert_eq!(lifecycle.transport().deleted_devices().len(), 1);
    assert_eq!(lifecycle.transport().disconnect_count(), 2);
}
