mod connection;
mod dead_letter_producer;
mod demo_producer;
mod lead_consumer;

pub use connection::*;
pub use dead_letter_producer::*;
pub use demo_producer::*;
pub use lead_consumer::*;
