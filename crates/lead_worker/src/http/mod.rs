mod contact_client;
mod retry;

pub use contact_client::*;
pub use retry::*;
