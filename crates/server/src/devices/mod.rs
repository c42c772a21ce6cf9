use async_trait::async_trait;
use dashmap::DashMap;
use shared::{Coordinate, FixReport, ServerToDevice};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::engine::location::{
    Delivery, LocationError, LocationProvider, LocationSource, Permission, Subscription,
};

const WATCH_BUFFER: usize = 16;

/// Routes location traffic between connected field devices and the engine
#[derive(Clone, Default)]
pub struct DeviceHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    /// Map of user ID -> live device link
    links: DashMap<String, DeviceLink>,
    /// Map of user ID -> continuous watch subscribers
    watchers: DashMap<String, Vec<(Uuid, mpsc::Sender<Delivery>)>>,
    /// Map of request ID -> caller waiting on a one-shot fix
    pending: DashMap<Uuid, oneshot::Sender<FixReport>>,
}

struct DeviceLink {
    connection_id: Uuid,
    sender: mpsc::Sender<ServerToDevice>,
    permission: Permission,
}

impl DeviceHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device for `user_id`. A newer connection replaces an older one.
    pub fn register(
        &self,
        user_id: &str,
        connection_id: Uuid,
        sender: mpsc::Sender<ServerToDevice>,
        permission_granted: bool,
    ) {
        let link = DeviceLink {
            connection_id,
            sender,
            permission: permission_from(permission_granted),
        };
        if let Some(previous) = self.inner.links.insert(user_id.to_string(), link) {
            tracing::info!(
                "Device connection {} for user {} replaced by {}",
                previous.connection_id,
                user_id,
                connection_id
            );
        } else {
            tracing::info!("Device registered for user {}: {}", user_id, connection_id);
        }
    }

    /// Detach a device. Returns false when a newer connection already took over.
    pub fn unregister(&self, user_id: &str, connection_id: Uuid) -> bool {
        let removed = self
            .inner
            .links
            .remove_if(user_id, |_, link| link.connection_id == connection_id)
            .is_some();
        if removed {
            // Closing the senders ends any watch still attached to this device
            self.inner.watchers.remove(user_id);
            tracing::info!("Device unregistered for user {}: {}", user_id, connection_id);
        }
        removed
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.inner.links.contains_key(user_id)
    }

    pub fn set_permission(&self, user_id: &str, granted: bool) {
        if let Some(mut link) = self.inner.links.get_mut(user_id) {
            link.permission = permission_from(granted);
        }
        if !granted {
            self.deliver(user_id, Err(LocationError::PermissionDenied));
        }
    }

    fn permission(&self, user_id: &str) -> Option<Permission> {
        self.inner.links.get(user_id).map(|link| link.permission)
    }

    pub async fn send(&self, user_id: &str, msg: ServerToDevice) -> bool {
        let sender = self.inner.links.get(user_id).map(|link| link.sender.clone());
        match sender {
            Some(sender) => sender.send(msg).await.is_ok(),
            None => false,
        }
    }

    /// Fan a watch delivery out to every subscriber of the user's device
    pub fn deliver(&self, user_id: &str, delivery: Delivery) {
        if let Some(mut watchers) = self.inner.watchers.get_mut(user_id) {
            watchers.retain(|(id, tx)| match tx.try_send(delivery.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!("Watch {} for user {} is behind, dropping delivery", id, user_id);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }

    /// Hand a device's answer to whoever is waiting on `request_id`
    pub fn complete_fix(&self, request_id: Uuid, report: FixReport) -> bool {
        match self.inner.pending.remove(&request_id) {
            Some((_, waiter)) => waiter.send(report).is_ok(),
            None => {
                tracing::debug!("Fix {} arrived after its request gave up", request_id);
                false
            }
        }
    }

    fn watch(&self, user_id: &str) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        self.inner
            .watchers
            .entry(user_id.to_string())
            .or_default()
            .push((id, tx));

        let hub: Weak<HubInner> = Arc::downgrade(&self.inner);
        let user_id = user_id.to_string();
        Subscription::new(rx, move || {
            if let Some(hub) = hub.upgrade() {
                if let Some(mut watchers) = hub.watchers.get_mut(&user_id) {
                    watchers.retain(|(watch_id, _)| *watch_id != id);
                }
            }
        })
    }

    #[cfg(test)]
    fn watcher_count(&self, user_id: &str) -> usize {
        self.inner
            .watchers
            .get(user_id)
            .map(|w| w.len())
            .unwrap_or(0)
    }
}

impl LocationSource for DeviceHub {
    fn provider(&self, user_id: &str) -> Arc<dyn LocationProvider> {
        Arc::new(DeviceLocation {
            hub: self.clone(),
            user_id: user_id.to_string(),
        })
    }
}

fn permission_from(granted: bool) -> Permission {
    if granted {
        Permission::Granted
    } else {
        Permission::Denied
    }
}

/// Location services of one user's connected device
pub struct DeviceLocation {
    hub: DeviceHub,
    user_id: String,
}

#[async_trait]
impl LocationProvider for DeviceLocation {
    async fn request_permission(&self) -> Permission {
        self.hub
            .permission(&self.user_id)
            .unwrap_or(Permission::Denied)
    }

    async fn current_position(
        &self,
        timeout: Duration,
        high_accuracy: bool,
    ) -> Result<Coordinate, LocationError> {
        match self.hub.permission(&self.user_id) {
            None => return Err(LocationError::Unavailable("device not connected".to_string())),
            Some(Permission::Denied) => return Err(LocationError::PermissionDenied),
            Some(Permission::Granted) => {}
        }

        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.hub.inner.pending.insert(request_id, tx);

        let sent = self
            .hub
            .send(
                &self.user_id,
                ServerToDevice::LocateRequest {
                    request_id,
                    high_accuracy,
                    timeout_ms: timeout.as_millis() as u64,
                },
            )
            .await;
        if !sent {
            self.hub.inner.pending.remove(&request_id);
            return Err(LocationError::Unavailable("device not connected".to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(FixReport::Ok { coordinate })) => Ok(coordinate),
            Ok(Ok(FixReport::PermissionDenied)) => Err(LocationError::PermissionDenied),
            Ok(Ok(FixReport::Unavailable { reason })) => Err(LocationError::Unavailable(reason)),
            Ok(Err(_)) => Err(LocationError::Unavailable("device disconnected".to_string())),
            Err(_) => {
                self.hub.inner.pending.remove(&request_id);
                Err(LocationError::Timeout(timeout))
            }
        }
    }

    async fn subscribe(&self, _high_accuracy: bool) -> Result<Subscription, LocationError> {
        match self.hub.permission(&self.user_id) {
            Some(Permission::Granted) => Ok(self.hub.watch(&self.user_id)),
            Some(Permission::Denied) => Err(LocationError::PermissionDenied),
            None => Err(LocationError::Unavailable("device not connected".to_string())),
        }
    }
}
