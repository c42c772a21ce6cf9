use async_trait::async_trait;
use shared::{Coordinate, FixReport};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location unavailable: {0}")]
    Unavailable(String),

    #[error("Location request timed out after {0:?}")]
    Timeout(Duration),
}

pub type Delivery = Result<Coordinate, LocationError>;

/// Device-side location services for a single user
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_permission(&self) -> Permission;

    /// One-shot fix, expected to give up after `timeout`
    async fn current_position(
        &self,
        timeout: Duration,
        high_accuracy: bool,
    ) -> Result<Coordinate, LocationError>;

    /// Continuous watch; deliveries arrive at whatever cadence the device chooses
    async fn subscribe(&self, high_accuracy: bool) -> Result<Subscription, LocationError>;
}

/// Looks up the location provider serving a user
pub trait LocationSource: Send + Sync {
    fn provider(&self, user_id: &str) -> Arc<dyn LocationProvider>;
}

/// Handle on a continuous watch. Dropping it unsubscribes.
pub struct Subscription {
    deliveries: mpsc::Receiver<Delivery>,
    on_unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        deliveries: mpsc::Receiver<Delivery>,
        on_unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            deliveries,
            on_unsubscribe: Some(Box::new(on_unsubscribe)),
        }
    }

    /// Next delivery, or `None` once the provider has gone away
    pub async fn next(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }

    pub fn unsubscribe(self) {
        drop(self)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.on_unsubscribe.take() {
            cancel();
        }
    }
}

/// A fix the device already took and attached to a request
#[derive(Debug, Clone)]
pub struct ReportedFix(pub FixReport);

#[async_trait]
impl LocationProvider for ReportedFix {
    async fn request_permission(&self) -> Permission {
        match self.0 {
            FixReport::PermissionDenied => Permission::Denied,
            _ => Permission::Granted,
        }
    }

    async fn current_position(
        &self,
        _timeout: Duration,
        _high_accuracy: bool,
    ) -> Result<Coordinate, LocationError> {
        match &self.0 {
            FixReport::Ok { coordinate } => Ok(*coordinate),
            FixReport::PermissionDenied => Err(LocationError::PermissionDenied),
            FixReport::Unavailable { reason } => Err(LocationError::Unavailable(reason.clone())),
        }
    }

    async fn subscribe(&self, _high_accuracy: bool) -> Result<Subscription, LocationError> {
        Err(LocationError::Unavailable(
            "a reported fix cannot be watched".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn reported_fix_maps_each_outcome() {
        let ok = ReportedFix(FixReport::Ok {
            coordinate: Coordinate::new(19.0, 72.8),
        });
        assert_eq!(ok.request_permission().await, Permission::Granted);
        assert_eq!(
            ok.current_position(Duration::from_secs(1), true).await,
            Ok(Coordinate::new(19.0, 72.8))
        );

        let denied = ReportedFix(FixReport::PermissionDenied);
        assert_eq!(denied.request_permission().await, Permission::Denied);

        let lost = ReportedFix(FixReport::Unavailable {
            reason: "provider error".to_string(),
        });
        assert_eq!(
            lost.current_position(Duration::from_secs(1), true).await,
            Err(LocationError::Unavailable("provider error".to_string()))
        );
        assert!(lost.subscribe(true).await.is_err());
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes_once() {
        let (tx, rx) = mpsc::channel(4);
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let mut sub = Subscription::new(rx, move || {
            assert!(!flag.swap(true, Ordering::SeqCst));
        });

        tx.send(Ok(Coordinate::new(1.0, 2.0))).await.unwrap();
        assert_eq!(sub.next().await, Some(Ok(Coordinate::new(1.0, 2.0))));

        sub.unsubscribe();
        assert!(cancelled.load(Ordering::SeqCst));
    }
}
