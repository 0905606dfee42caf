use crate::av::{Command, TrackId};
use crate::error::{FlowError, Result};

use super::{CommandHandler, CommandHandlerFactory, Node};

/// One edge of the graph: a producer, a consumer and their handlers.
#[derive(Debug)]
pub struct OutputInputPair {
    output: Node,
    input: Node,
    handlers: CommandHandlerFactory,
}

/// What the heads of the two queues allow right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// Nothing to do on this pair.
    Idle,
    /// One side asked to move on to the next pair.
    NextPair,
    /// Both heads form a registered key for the same track.
    Dispatch(Command, Command, TrackId),
}

impl OutputInputPair {
    /// Edge from `output` to `input`. A stage cannot be paired with itself.
    pub fn new(output: Node, input: Node, handlers: CommandHandlerFactory) -> Result<Self> {
        if output.is_same(&input) {
            return Err(FlowError::SamePair);
        }
        Ok(Self {
            output,
            input,
            handlers,
        })
    }

    /// Producing node.
    pub fn output(&self) -> &Node {
        &self.output
    }

    /// Consuming node.
    pub fn input(&self) -> &Node {
        &self.input
    }

    /// Dispatch table.
    pub fn handlers(&self) -> &CommandHandlerFactory {
        &self.handlers
    }

    /// Whether this pair joins `output` to `input`.
    pub fn connects(&self, output: &Node, input: &Node) -> bool {
        self.output.is_same(output) && self.input.is_same(input)
    }

    /// Refreshes the readiness commands of both stages.
    pub fn fill_command_queues(&self) -> Result<()> {
        self.output.fill_command_queues()?;
        self.input.fill_command_queues()
    }

    pub(crate) fn readiness(&self) -> Readiness {
        let input = self.input.with_input_queue(|q| q.first()).flatten();
        let output = self.output.with_output_queue(|q| q.first()).flatten();
        match (output, input) {
            (_, None) => Readiness::Idle,
            (_, Some((Command::NextPair, _))) => Readiness::NextPair,
            (None, _) => Readiness::Idle,
            (Some((Command::NextPair, _)), _) => Readiness::NextPair,
            (Some((out, out_track)), Some((inp, in_track))) => {
                if out_track == in_track && self.handlers.contains(out, inp) {
                    Readiness::Dispatch(out, inp, out_track)
                } else {
                    Readiness::Idle
                }
            }
        }
    }

    /// Drops a `NextPair` hint from whichever head carries it, consumer first.
    pub(crate) fn consume_next_pair(&self) {
        let consumed = self
            .input
            .with_input_queue(|q| {
                if matches!(q.first(), Some((Command::NextPair, _))) {
                    q.dequeue().is_ok()
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if !consumed {
            self.output.with_output_queue(|q| {
                if matches!(q.first(), Some((Command::NextPair, _))) {
                    let _ = q.dequeue();
                }
            });
        }
    }

    /// Dequeues both heads and builds the handler for them.
    pub(crate) fn take_handler(&self, output: Command, input: Command) -> Result<Box<dyn CommandHandler>> {
        let handler = self.handlers.create(output, input)?;
        self.output
            .with_output_queue(|q| q.dequeue())
            .ok_or(FlowError::EmptyQueue)??;
        self.input
            .with_input_queue(|q| q.dequeue())
            .ok_or(FlowError::EmptyQueue)??;
        Ok(handler)
    }
}
