use std::fmt;

/// Broker channel a message travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Primary,
    Retry,
    DeadLetter,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Primary => "primary",
            Channel::Retry => "retry",
            Channel::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a delivered message. Every variant is safe to acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed and recorded; `attempt` failed attempts preceded it
    Succeeded { attempt: u32 },
    /// Republished to the retry channel carrying `attempt`
    Retried { attempt: u32 },
    /// Published to the dead-letter channel carrying `attempt`
    DeadLettered { attempt: u32 },
    /// Recorded by the dead-letter observer
    Observed,
    /// Payload could not be decoded; dropped
    Discarded,
}

impl Disposition {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Disposition::Retried { .. })
    }
}
