use futures::future::BoxFuture;
use tracing::info;
use uuid::Uuid;

use crate::error::ChatError;

/// Hook for the external push-notification service.
///
/// Invoked on a detached task for participants who are offline when a
/// message lands; failures are logged by the caller and never reach the
/// send path.
pub trait Notifier: Send + Sync {
    fn notify<'a>(
        &'a self,
        user_id: &'a str,
        conversation_id: Uuid,
        sender_name: &'a str,
    ) -> BoxFuture<'a, Result<(), ChatError>>;
}

/// Default sink until a real push provider is wired in.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(
        &'a self,
        user_id: &'a str,
        conversation_id: Uuid,
        sender_name: &'a str,
    ) -> BoxFuture<'a, Result<(), ChatError>> {
        Box::pin(async move {
            info!("push notification for {user_id}: new message from {sender_name} in {conversation_id}");
            Ok(())
        })
    }
}
