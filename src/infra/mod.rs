//! Infrastructure adapters for notification and probing backends.

pub mod notifier;
pub mod prober;
pub use notifier::InMemoryNotifier;
pub use notifier::TracingNotifier;
pub use prober::AlwaysHealthyProber;
pub use prober::{ScriptedProbe, StaticProber};
