mod backpressure;
mod batch_buffer;
mod contact_store;
mod dead_letter;
mod error;
mod flush_dispatcher;
mod lead;
mod lead_intake;
mod metrics;
mod metrics_reporter;
mod timeout_flusher;

pub use backpressure::*;
pub use batch_buffer::*;
pub use contact_store::*;
pub use dead_letter::*;
pub use error::*;
pub use flush_dispatcher::*;
pub use lead::*;
pub use lead_intake::*;
pub use metrics::*;
pub use metrics_reporter::*;
pub use timeout_flusher::*;
