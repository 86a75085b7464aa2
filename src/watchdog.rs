/// Output-idle monitor for the supervised process.
///
/// Runs alongside the child, ticking on a fixed interval. Each tick measures
/// how long the child has been silent, refreshes the status line and lets the
/// escalator decide whether to interrupt or kill the child's process group.
/// Output lines and operator Ctrl-C arrive as events on a single channel so
/// all state is mutated from this one loop.
use crate::activity::ActivityTracker;
use crate::escalation::{EscalationAction, Escalator};
use crate::recorder::{EscalationRecord, EventRecorder};
use crate::status::TitleStatus;
use crate::supervisor::{exit_code, MonitoredProcess};
use crate::termination::TerminationChannel;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, MissedTickBehavior};

/// Exit code when the operator interrupts the watchdog twice.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Inputs to the watchdog loop besides the ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// The child wrote a line on stdout or stderr.
    ActivityObserved { at: Instant },
    /// The watchdog itself received SIGINT.
    ExternalInterruptReceived,
}

/// How a watchdog run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// The child exited, on its own or because it was escalated.
    Exited {
        code: i32,
        interrupts_sent: u32,
        kills_sent: u32,
    },
    /// The operator pressed Ctrl-C a second time; the child's group was
    /// killed and the watchdog stops waiting.
    Interrupted,
}

impl WatchdogOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            WatchdogOutcome::Exited { code, .. } => *code,
            WatchdogOutcome::Interrupted => EXIT_INTERRUPTED,
        }
    }
}

#[derive(Debug)]
pub enum WatchdogError {
    /// Waiting on the child failed.
    Wait { pid: u32, source: std::io::Error },
}

impl std::fmt::Display for WatchdogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchdogError::Wait { pid, source } => {
                write!(f, "failed to wait for process {}: {}", pid, source)
            }
        }
    }
}

impl std::error::Error for WatchdogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatchdogError::Wait { source, .. } => Some(source),
        }
    }
}

pub struct Watchdog {
    escalator: Escalator,
    tracker: ActivityTracker,
    recorder: EventRecorder,
    termination: Box<dyn TerminationChannel>,
    status: TitleStatus,
    check_interval: Duration,
    interrupts_sent: u32,
    kills_sent: u32,
    external_interrupts: u32,
}

impl Watchdog {
    /// Build a watchdog for a just-launched child. Idle time counts from `run`.
    pub fn new(
        escalator: Escalator,
        recorder: EventRecorder,
        termination: Box<dyn TerminationChannel>,
        status: TitleStatus,
        check_interval: Duration,
    ) -> Self {
        Self {
            escalator,
            tracker: ActivityTracker::new(),
            recorder,
            termination,
            status,
            check_interval,
            interrupts_sent: 0,
            kills_sent: 0,
            external_interrupts: 0,
        }
    }

    /// Monitor `process` until it exits (or the operator interrupts twice).
    pub async fn run(
        &mut self,
        process: &mut MonitoredProcess,
        events: &mut UnboundedReceiver<WatchdogEvent>,
    ) -> Result<WatchdogOutcome, WatchdogError> {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.check_interval, self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Idle time counts from the start of monitoring.
        self.tracker.record_activity();

        loop {
            // Exit first, then queued output, then the tick: a tick must never
            // judge idleness while fresher activity is still waiting.
            tokio::select! {
                biased;

                status = process.wait_for_exit() => {
                    let status = status.map_err(|e| WatchdogError::Wait {
                        pid: process.pid(),
                        source: e,
                    })?;
                    self.status.clear();
                    let code = exit_code(status);
                    tracing::info!(
                        pid = process.pid(),
                        code,
                        interrupts_sent = self.interrupts_sent,
                        kills_sent = self.kills_sent,
                        "monitored process exited"
                    );
                    return Ok(WatchdogOutcome::Exited {
                        code,
                        interrupts_sent: self.interrupts_sent,
                        kills_sent: self.kills_sent,
                    });
                }
                Some(event) = events.recv() => {
                    if let Some(outcome) = self.handle_event(event) {
                        self.status.clear();
                        return Ok(outcome);
                    }
                }
                _ = ticker.tick() => {
                    if let Some(outcome) = self.on_tick(process, events) {
                        self.status.clear();
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: WatchdogEvent) -> Option<WatchdogOutcome> {
        match event {
            WatchdogEvent::ActivityObserved { at } => {
                self.tracker.record_activity_at(at);
                None
            }
            WatchdogEvent::ExternalInterruptReceived => {
                self.external_interrupts += 1;
                let result = self.termination.request_graceful();
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "could not forward interrupt");
                }
                if self.external_interrupts == 1 {
                    tracing::warn!("interrupt received, forwarded to process; press Ctrl-C again to quit");
                    self.escalator.note_external_interrupt();
                    None
                } else {
                    tracing::warn!("second interrupt received, killing process and exiting");
                    if let Err(e) = self.termination.force_kill() {
                        tracing::warn!(error = %e, "could not kill process");
                    }
                    Some(WatchdogOutcome::Interrupted)
                }
            }
        }
    }

    /// Apply everything already queued, then evaluate the tick.
    fn on_tick(
        &mut self,
        process: &MonitoredProcess,
        events: &mut UnboundedReceiver<WatchdogEvent>,
    ) -> Option<WatchdogOutcome> {
        while let Ok(event) = events.try_recv() {
            if let Some(outcome) = self.handle_event(event) {
                return Some(outcome);
            }
        }
        self.tick(process);
        None
    }

    fn tick(&mut self, process: &MonitoredProcess) {
        let idle_secs = self.tracker.idle_seconds();
        self.status.update(idle_secs);

        let evaluation = self.escalator.evaluate(idle_secs);
        tracing::trace!(idle_secs, phase = ?evaluation.phase, "watchdog tick");
        for action in evaluation.actions {
            self.escalate(action, idle_secs, process);
        }
    }

    fn escalate(&mut self, action: EscalationAction, idle_secs: u64, process: &MonitoredProcess) {
        let pid = process.pid();
        let result = match action {
            EscalationAction::Interrupt => {
                tracing::warn!(pid, idle_secs, "no output, sending CTRL-C to process");
                self.interrupts_sent += 1;
                self.termination.request_graceful()
            }
            EscalationAction::Kill => {
                tracing::warn!(pid, idle_secs, "still no output, sending kill signal");
                self.kills_sent += 1;
                self.termination.force_kill()
            }
        };
        if let Err(e) = result {
            tracing::error!(pid, error = %e, "signal delivery failed, watchdog continues");
        }

        self.recorder.record(&EscalationRecord::now(
            action,
            process.process_name(),
            pid,
        ));
    }
}
