use std::collections::HashMap;
use std::fmt;

use crate::av::Command;
use crate::error::{FlowError, Result};

/// The (producer, consumer) command pairs a handler may be registered for.
pub const MATCHING_COMMANDS: [(Command, Command); 6] = [
    (Command::HasData, Command::NeedData),
    (Command::HasData, Command::NeedInputFormat),
    (Command::OutputFormatChanged, Command::NeedInputFormat),
    (Command::OutputFormatChanged, Command::NeedData),
    (Command::EndOfFile, Command::NeedInputFormat),
    (Command::EndOfFile, Command::NeedData),
];

/// Whether `(output, input)` is a pair of heads the scheduler dispatches on.
pub fn is_dispatch_key(output: Command, input: Command) -> bool {
    MATCHING_COMMANDS.contains(&(output, input))
}

/// One step of the handshake between a producer and a consumer.
///
/// Handlers run to completion. A handler that cannot make progress restores
/// the commands it was dispatched for and returns.
pub trait CommandHandler: Send {
    /// Runs the step once.
    fn handle(&mut self) -> Result<()>;
}

type HandlerCreator = Box<dyn Fn() -> Box<dyn CommandHandler> + Send + Sync>;

/// Dispatch table of one edge.
#[derive(Default)]
pub struct CommandHandlerFactory {
    creators: HashMap<(Command, Command), HandlerCreator>,
}

impl CommandHandlerFactory {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler built by `create` for `(output, input)`.
    pub fn register<F, H>(&mut self, output: Command, input: Command, create: F)
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: CommandHandler + 'static,
    {
        debug_assert!(
            is_dispatch_key(output, input),
            "{:?}/{:?} is not a dispatch key",
            output,
            input
        );
        self.creators.insert(
            (output, input),
            Box::new(move || Box::new(create()) as Box<dyn CommandHandler>),
        );
    }

    /// Whether a handler is registered for the pair.
    pub fn contains(&self, output: Command, input: Command) -> bool {
        self.creators.contains_key(&(output, input))
    }

    /// Builds the handler registered for the pair.
    pub fn create(&self, output: Command, input: Command) -> Result<Box<dyn CommandHandler>> {
        self.creators
            .get(&(output, input))
            .map(|create| create())
            .ok_or(FlowError::NoHandler { output, input })
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.creators.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.creators.is_empty()
    }
}

impl fmt::Debug for CommandHandlerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.creators.keys()).finish()
    }
}
