//! Built-in established-extension modules (spec §4.7).
//!
//! Each is attached conditionally at `ChannelBuilder::build` time, before
//! the receiver starts, as plain [`crate::module::Module`] registrations —
//! no special-casing elsewhere in the pipeline.

mod idle_watchdog;
mod ping;
mod recipients;

pub use idle_watchdog::{CloseRequester, CloseTrigger, IdleWatchdogModule};
pub use ping::{OutboundSink, PingModule};
pub use recipients::RecipientsModule;
