pub mod events;
pub mod expectations;
pub mod state;
pub mod system;
