use bytes::Bytes;
use gbn_ftp_abstract::{ProtocolEvent, SystemContext};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    Start(Duration),
    Cancel,
}

/// Actions buffered during a single protocol handler call.
#[derive(Debug, Default)]
pub struct ActionBuffer {
    pub outgoing: Vec<(SocketAddr, Bytes)>,
    /// Only the last command matters: there is a single timer per endpoint.
    pub timer: Option<TimerCommand>,
    pub events: Vec<ProtocolEvent>,
}

impl ActionBuffer {
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.timer.is_none() && self.events.is_empty()
    }
}

/// Context implementation handed to the state machines.
pub struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    now: Duration,
}

impl<'a> ScopedContext<'a> {
    pub fn new(buffer: &'a mut ActionBuffer, now: Duration) -> Self {
        Self { buffer, now }
    }
}

impl SystemContext for ScopedContext<'_> {
    fn send_datagram(&mut self, to: SocketAddr, datagram: Bytes) {
        self.buffer.outgoing.push((to, datagram));
    }

    fn start_timer(&mut self, delay: Duration) {
        self.buffer.timer = Some(TimerCommand::Start(delay));
    }

    fn cancel_timer(&mut self) {
        self.buffer.timer = Some(TimerCommand::Cancel);
    }

    fn report(&mut self, event: ProtocolEvent) {
        self.buffer.events.push(event);
    }

    fn now(&self) -> Duration {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_timer_command_wins() {
        let mut buffer = ActionBuffer::default();
        {
            let mut ctx = ScopedContext::new(&mut buffer, Duration::ZERO);
            ctx.start_timer(Duration::from_millis(200));
            ctx.cancel_timer();
        }
        assert_eq!(buffer.timer, Some(TimerCommand::Cancel));

        {
            let mut ctx = ScopedContext::new(&mut buffer, Duration::ZERO);
            ctx.start_timer(Duration::from_millis(50));
        }
        assert_eq!(
            buffer.timer,
            Some(TimerCommand::Start(Duration::from_millis(50)))
        );
    }
}
