pub mod events;
pub mod health;
pub mod predict;
pub mod state;
