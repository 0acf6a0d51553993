//! Event bus and contracts for the Cerise runtime.
//!
//! The in-process [`MessageBus`] is the default backbone; [`BrokerMessageBus`]
//! attaches to a shared [`FanoutBroker`] when several bus instances need to
//! see the same events.

mod broker;
mod bus;
pub mod contracts;
mod event;

pub use broker::{BrokerMessageBus, FanoutBroker};
pub use bus::{handler, EventHandler, MessageBus, SubscriptionId};
pub use event::Event;
