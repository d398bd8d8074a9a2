pub mod conversations;
pub mod convert;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod pipeline;
pub mod state;
pub mod typing;
pub mod users;
