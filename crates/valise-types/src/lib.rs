pub mod api;
pub mod delivery;
pub mod events;
pub mod models;
