use std::sync::Arc;

use valise_db::Database;
use valise_notify::{HttpEmailProvider, NotifyEngine};
use valise_realtime::{Broadcaster, TypingTracker};
use valise_types::delivery::DeliveryLedger;

use crate::pipeline::MessagePipeline;

pub type AppState = Arc<AppStateInner>;

/// Everything the handlers need, injected explicitly so tests can build the
/// same graph around fakes.
pub struct AppStateInner {
    pub db: Arc<Database>,
    pub broadcaster: Broadcaster,
    pub typing: TypingTracker,
    pub pipeline: MessagePipeline,
    pub ledger: DeliveryLedger,
    pub engine: NotifyEngine<HttpEmailProvider>,
    pub jwt_secret: String,
    pub ops_token: String,
}
