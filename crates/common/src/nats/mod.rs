mod backoff;
mod client;
mod delivery;
mod stream;
mod trace_context;
mod traits;

pub use backoff::*;
pub use client::*;
pub use delivery::*;
pub use stream::*;
pub use trace_context::*;
pub use traits::*;
