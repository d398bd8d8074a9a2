pub mod broadcaster;
pub mod typing;

pub use broadcaster::{Broadcaster, Subscription};
pub use typing::TypingTracker;
