/// Ctrl-C handling for the watchdog process itself.
///
/// Installing the listener replaces the default SIGINT action, so the first
/// Ctrl-C no longer kills the watchdog. Each signal becomes an
/// `ExternalInterruptReceived` event; the watchdog loop forwards the first
/// one to the child and gives up on the second.
use crate::watchdog::WatchdogEvent;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Spawn a task translating SIGINT into watchdog events.
///
/// The task ends when the receiving side is dropped or the handler cannot
/// be installed.
pub fn spawn_interrupt_listener(events: UnboundedSender<WatchdogEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                return;
            }
            tracing::debug!("received Ctrl-C");
            if events.send(WatchdogEvent::ExternalInterruptReceived).is_err() {
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_sigint_becomes_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = spawn_interrupt_listener(tx);

        // Let the listener register its handler before raising the signal.
        tokio::time::sleep(Duration::from_millis(100)).await;
        signal::kill(Pid::this(), Signal::SIGINT).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert!(matches!(
            event,
            Some(WatchdogEvent::ExternalInterruptReceived)
        ));
        listener.abort();
    }
}
