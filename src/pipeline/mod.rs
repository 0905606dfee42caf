//! The execution engine: stage contracts, the command handshake, the
//! scheduler and the graph builder.
//!
//! Every edge of a pipeline is an [`OutputInputPair`]: a producer, a
//! consumer and the table of handlers that may run between them. The
//! [`CommandProcessor`] sweeps the pairs, matching the head of the
//! producer's output queue against the head of the consumer's input queue.

mod connector;
mod graph;
mod handler;
pub mod handlers;
mod node;
mod pair;
mod processor;
mod rules;
mod stage;

pub use connector::ConnectorFactory;
pub use graph::Pipeline;
pub use handler::{is_dispatch_key, CommandHandler, CommandHandlerFactory, MATCHING_COMMANDS};
pub use node::{Node, Role};
pub use pair::OutputInputPair;
pub use processor::{CommandProcessor, ProcessOutcome, ProcessorControl};
pub use rules::{find_rule, ConnectionRule, Strategy, CONNECTION_RULES};
pub use stage::*;

use parking_lot::Mutex;
use std::sync::Arc;

/// A stage shared between the pipeline, its pairs and the running handlers.
pub type Shared<T> = Arc<Mutex<T>>;

/// Wraps a stage for sharing.
pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
