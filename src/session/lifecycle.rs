//! Connection lifecycle management
//!
//! [`ConnectionLifecycleManager`] owns the [`SessionHandle`] and is the only
//! code that mutates it: transport events go through [`apply_event`], and the
//! administrative operations are `start`, `stop` and `logout`.
//!
//! Two locks guard the session. The session lock protects the handle itself.
//! The teardown gate is held shared by every in-flight message handler and
//! exclusively by `stop` and `logout`, so a teardown waits for running
//! handlers and new handlers wait for the teardown.
//!
//! [`apply_event`]: ConnectionLifecycleManager::apply_event

use super::state::{next_transition, ConnectionState, SessionEvent, SessionHandle};
use crate::error::{BridgeError, BridgeResult};
use crate::observability::metrics;
use crate::protocol::DeviceRecord;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn, Instrument};

/// One step of the logout teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutStep {
    RemoteDeregistration,
    Disconnect,
    DeviceDeletion,
    ClearQr,
}

/// Logout runs these in order; a failing step is logged and the next one runs
pub const LOGOUT_SEQUENCE: [LogoutStep; 4] = [
    LogoutStep::RemoteDeregistration,
    LogoutStep::Disconnect,
    LogoutStep::DeviceDeletion,
    LogoutStep::ClearQr,
];

/// Guard held by a message handler for the duration of its work
pub type MessageGuard = OwnedRwLockReadGuard<()>;

pub struct ConnectionLifecycleManager<T: Transport> {
    transport: Arc<T>,
    session: RwLock<SessionHandle>,
    teardown: Arc<RwLock<()>>,
}

impl<T> ConnectionLifecycleManager<T>
where
    T: Transport + 'static,
{
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            session: RwLock::new(SessionHandle::new()),
            teardown: Arc::new(RwLock::new(())),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Bootstrap the session store and open the connection
    ///
    /// Bootstrap and connect failures are fatal and propagate to the caller.
    pub async fn start(&self) -> BridgeResult<()> {
        let span = crate::lifecycle_span!(operation = "start");
        async {
            info!("Starting WhatsApp session");

            let device = self
                .transport
                .bootstrap()
                .await
                .map_err(|e| BridgeError::bootstrap(e.to_string()))?;

            match &device.id {
                Some(id) => info!(device = %id, "Existing device session found"),
                None => info!("No paired device, waiting for QR pairing"),
            }
            self.session.write().await.set_device(Some(device));

            self.transport
                .connect()
                .await
                .map_err(|e| BridgeError::transport(e.to_string()))?;

            info!("WhatsApp session started");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Best-effort teardown for shutdown; the device record is kept
    pub async fn stop(&self) {
        let span = crate::lifecycle_span!(operation = "stop");
        async {
            let _gate = self.teardown.write().await;
            let mut session = self.session.write().await;

            if let Err(e) = self.transport.disconnect().await {
                warn!(error = %e, "Failed to disconnect transport during stop");
            }
            session.reset_connection();
            metrics().set_session_state(session.state().as_str());

            info!("WhatsApp session stopped");
        }
        .instrument(span)
        .await
    }

    /// Unlink this device and tear the session down
    ///
    /// Never fails. Calling it again after a successful logout performs no
    /// remote or device-store calls.
    pub async fn logout(&self) -> BridgeResult<()> {
        let span = crate::lifecycle_span!(operation = "logout");
        async {
            let _gate = self.teardown.write().await;
            let mut session = self.session.write().await;

            for step in LOGOUT_SEQUENCE {
                if let Err(e) = self.run_logout_step(step, &mut session).await {
                    warn!(step = ?step, error = %e, "Logout step failed, continuing");
                }
            }

            metrics().logout_performed();
            metrics().set_session_state(session.state().as_str());
            info!("Logged out of WhatsApp");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn run_logout_step(
        &self,
        step: LogoutStep,
        session: &mut RwLockWriteGuard<'_, SessionHandle>,
    ) -> BridgeResult<()> {
        match step {
            LogoutStep::RemoteDeregistration => {
                if self.transport.registered_id().is_none() {
                    debug!("No registered session, skipping remote logout");
                    return Ok(());
                }
                self.transport
                    .logout()
                    .await
                    .map_err(|e| BridgeError::RemoteLogout {
                        message: e.to_string(),
                    })
            }
            LogoutStep::Disconnect => {
                let result = self.transport.disconnect().await;
                session.reset_connection();
                result.map_err(|e| BridgeError::transport(e.to_string()))
            }
            LogoutStep::DeviceDeletion => {
                let Some(device) = session.take_device().filter(DeviceRecord::is_paired) else {
                    debug!("No device record, skipping deletion");
                    return Ok(());
                };
                self.transport
                    .delete_device(&device)
                    .await
                    .map_err(|e| BridgeError::DeviceDelete {
                        message: e.to_string(),
                    })
            }
            LogoutStep::ClearQr => {
                session.clear_qr();
                Ok(())
            }
        }
    }

    /// Apply a transport lifecycle event
    pub async fn apply_event(&self, event: SessionEvent) {
        let mut session = self.session.write().await;
        let from = session.state();

        let Some(transition) = next_transition(from, &event) else {
            debug!(state = %from, event = ?event, "Lifecycle event ignored");
            return;
        };

        match &event {
            SessionEvent::QrIssued(_) => {
                metrics().qr_code_issued();
                info!("QR code received, scan it to pair the device");
            }
            SessionEvent::Connected => {
                // Pairing may have just completed; pick up the registered id
                if let Some(id) = self.transport.registered_id() {
                    session.set_device(Some(DeviceRecord::paired(id)));
                }
                info!("Successfully connected to WhatsApp");
            }
            SessionEvent::Disconnected => info!("Disconnected from WhatsApp"),
            SessionEvent::LoggedOut => warn!("Logged out from WhatsApp"),
        }

        session.apply(transition);
        metrics().set_session_state(session.state().as_str());
        debug!(from = %from, to = %session.state(), "Connection state changed");
    }

    pub async fn get_qr_code(&self) -> BridgeResult<String> {
        self.session
            .read()
            .await
            .qr_code()
            .filter(|code| !code.is_empty())
            .map(str::to_string)
            .ok_or(BridgeError::QrNotAvailable)
    }

    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_connected()
    }

    pub async fn state(&self) -> ConnectionState {
        self.session.read().await.state()
    }

    /// Snapshot of the whole handle
    pub async fn snapshot(&self) -> SessionHandle {
        self.session.read().await.clone()
    }

    /// Shared session guard, held by senders across the transport call
    pub async fn read_session(&self) -> RwLockReadGuard<'_, SessionHandle> {
        self.session.read().await
    }

    /// Shared teardown guard for a message handler
    pub async fn message_guard(&self) -> MessageGuard {
        Arc::clone(&self.teardown).read_owned().await
    }
}
