//! Message types exchanged with the calling agent and its model transport

mod request;

pub use request::{compose_user_turn, Message, OptimizeRequest, Role};
