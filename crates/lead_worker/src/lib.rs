pub mod domain;
pub mod http;
pub mod lead_worker;
pub mod nats;

#[cfg(test)]
pub(crate) mod test_support;

pub use domain::*;
pub use http::*;
pub use lead_worker::*;
pub use nats::*;
