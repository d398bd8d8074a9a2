pub mod engine;
pub mod error;
pub mod provider;
pub mod templates;

pub use engine::{ActionOutcome, BatchSummary, NotifyEngine, OfferAction};
pub use error::NotifyError;
pub use provider::{DispatchReceipt, EmailProvider, HttpEmailProvider, OutboundEmail};
