use crate::auth::ActorIdentity;

/// Fire-and-forget notification boundary. Failures are the sink's problem;
/// callers never see them.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, action: &str, file_name: &str, file_path: &str, actor: &ActorIdentity);
}

/// Default sink: structured log lines.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, action: &str, file_name: &str, file_path: &str, actor: &ActorIdentity) {
        tracing::info!(
            action,
            file_name,
            file_path,
            actor = %actor.name,
            ip = %actor.ip_address,
            "file activity"
        );
    }
}
