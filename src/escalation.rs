use tracing::debug;

/// Termination step the watchdog should take on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationAction {
    /// Cooperative interrupt (SIGINT) the child may catch.
    Interrupt,
    /// Forced kill (SIGKILL) the child cannot intercept.
    Kill,
}

impl EscalationAction {
    /// Name used in the audit log line.
    pub fn signal_name(&self) -> &'static str {
        match self {
            EscalationAction::Interrupt => "CtrlC",
            EscalationAction::Kill => "Kill",
        }
    }
}

/// Where the child sits on the escalation ladder after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Output seen recently. Clears the interrupt-sent flag.
    Healthy,
    /// Idle past the warning threshold but still within the timeout.
    Warning,
    /// Interrupt has been sent; waiting out the grace period.
    InterruptSent,
    /// Grace period exhausted; kill is attempted on every tick.
    Terminating,
}

/// Outcome of evaluating one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub phase: Phase,
    pub actions: Vec<EscalationAction>,
}

/// Thresholds, in whole seconds of idleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    pub timeout_secs: u64,
    /// Delay between interrupt and kill. Zero skips the interrupt entirely.
    pub grace_period_secs: u64,
    pub warn_after_secs: u64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            grace_period_secs: 10,
            warn_after_secs: 9,
        }
    }
}

/// Per-tick escalation state machine.
///
/// Pure: it is fed idle durations and returns the actions to take. Signal
/// delivery, logging and status display live elsewhere. The interrupt fires
/// at most once per idle episode; the kill fires on every tick past
/// `timeout + grace_period` because a failed or ignored kill must be retried.
pub struct Escalator {
    policy: EscalationPolicy,
    interrupt_sent: bool,
}

impl Escalator {
    pub fn new(policy: EscalationPolicy) -> Self {
        Self {
            policy,
            interrupt_sent: false,
        }
    }

    /// Whether an interrupt already went out during the current idle episode.
    #[cfg(test)]
    pub fn interrupt_sent(&self) -> bool {
        self.interrupt_sent
    }

    /// Record that an interrupt reached the child by other means
    /// (e.g. forwarded from the operator's Ctrl-C).
    pub fn note_external_interrupt(&mut self) {
        self.interrupt_sent = true;
    }

    /// Evaluate one tick given the current idle duration in seconds.
    pub fn evaluate(&mut self, idle_secs: u64) -> Evaluation {
        let timeout = self.policy.timeout_secs;
        let grace = self.policy.grace_period_secs;

        if idle_secs > timeout.saturating_add(grace) {
            debug!(idle_secs, "kill threshold exceeded");
            return Evaluation {
                phase: Phase::Terminating,
                actions: vec![EscalationAction::Kill],
            };
        }

        if idle_secs > timeout {
            let mut actions = Vec::new();
            if !self.interrupt_sent {
                debug!(idle_secs, "timeout exceeded, interrupting");
                self.interrupt_sent = true;
                actions.push(EscalationAction::Interrupt);
            }
            return Evaluation {
                phase: Phase::InterruptSent,
                actions,
            };
        }

        if idle_secs > self.policy.warn_after_secs {
            return Evaluation {
                phase: Phase::Warning,
                actions: Vec::new(),
            };
        }

        if self.interrupt_sent {
            debug!(idle_secs, "output resumed, escalation reset");
        }
        self.interrupt_sent = false;
        Evaluation {
            phase: Phase::Healthy,
            actions: Vec::new(),
        }
    }
}
