//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::service::{MessagingError, MessagingService, Operation};

pub struct AppState {
    pub service: MessagingService,
}

/// Handle cloned into every request. The store is the one shared mutable
/// resource, so every operation runs under this lock.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<AppState>>,
    request_timeout: Duration,
}

impl SharedState {
    pub fn new(service: MessagingService, request_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AppState { service })),
            request_timeout,
        }
    }

    /// Acquire the state, giving up after the request timeout so a stuck
    /// store surfaces as a transient failure instead of a hung request.
    pub async fn lock(
        &self,
        operation: Operation,
        partner_id: Option<&str>,
    ) -> Result<MutexGuard<'_, AppState>, MessagingError> {
        match tokio::time::timeout(self.request_timeout, self.inner.lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                crate::tlog!(
                    "{}: store busy for {}ms, giving up",
                    operation,
                    self.request_timeout.as_millis()
                );
                Err(MessagingError::transient(
                    operation,
                    partner_id,
                    "timed out waiting for the message store",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ErrorKind;
    use crate::storage::Storage;

    #[tokio::test]
    async fn lock_times_out_when_held() {
        let service = MessagingService::new(Storage::open_in_memory().unwrap());
        let state = SharedState::new(service, Duration::from_millis(20));

        let held = state.lock(Operation::Send, None).await.unwrap();
        let err = match state.lock(Operation::Send, Some("bob")).await {
            Ok(_) => panic!("second lock should time out"),
            Err(e) => e,
        };
        assert!(matches!(err.kind, ErrorKind::TransientStore(_)));
        assert_eq!(err.partner_id.as_deref(), Some("bob"));
        drop(held);

        assert!(state.lock(Operation::Send, None).await.is_ok());
    }
}
