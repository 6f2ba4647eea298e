//! Request queue gated on the worker's Ready signal.

use std::collections::VecDeque;

use crate::ipc::CompilerMessage;

/// Whether the current worker generation has announced it is listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyGate {
    #[default]
    NotReady,
    Ready,
}

/// Holds Compile messages until the worker is ready for them.
///
/// One queue serves one worker generation at a time; [`reset`](Self::reset)
/// must be called whenever the worker is torn down.
#[derive(Debug, Default)]
pub struct RequestQueue {
    gate: ReadyGate,
    pending: VecDeque<CompilerMessage>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self) -> ReadyGate {
        self.gate
    }

    /// Offer a message for sending.
    ///
    /// Returns the message back if it may be sent right away, otherwise
    /// keeps it until the gate opens.
    pub fn offer(&mut self, message: CompilerMessage) -> Option<CompilerMessage> {
        match self.gate {
            ReadyGate::Ready => Some(message),
            ReadyGate::NotReady => {
                self.pending.push_back(message);
                None
            }
        }
    }

    /// Open the gate and take every held message, in submission order.
    ///
    /// Only the first call per generation yields messages.
    pub fn open(&mut self) -> Vec<CompilerMessage> {
        if self.gate == ReadyGate::Ready {
            return Vec::new();
        }
        self.gate = ReadyGate::Ready;
        self.pending.drain(..).collect()
    }

    /// Close the gate and drop held messages for a new generation.
    ///
    /// Returns how many messages were dropped.
    pub fn reset(&mut self) -> usize {
        self.gate = ReadyGate::NotReady;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::CompileRequest;

    fn msg(id: u64) -> CompilerMessage {
        CompilerMessage::compile(
            id,
            CompileRequest {
                output_file: format!("out{}", id),
                source_files: Vec::new(),
                reference_files: Vec::new(),
            },
        )
    }

    #[test]
    fn test_holds_until_ready_then_drains_in_order_once() {
        let mut queue = RequestQueue::new();
        assert!(queue.offer(msg(1)).is_none());
        assert!(queue.offer(msg(2)).is_none());
        assert!(queue.offer(msg(3)).is_none());

        let drained: Vec<_> = queue.open().into_iter().map(|m| m.id).collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(queue.open().is_empty());

        assert_eq!(queue.offer(msg(4)).map(|m| m.id), Some(4));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reset_closes_gate_and_drops_held() {
        let mut queue = RequestQueue::new();
        queue.open();
        queue.reset();
        assert_eq!(queue.gate(), ReadyGate::NotReady);

        assert!(queue.offer(msg(5)).is_none());
        assert_eq!(queue.reset(), 1);
        assert!(queue.open().is_empty());
    }
}
