mod message;

pub use message::{event_types, ClientMessage, Event};
