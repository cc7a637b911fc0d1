pub mod actions;
pub mod capture;
pub mod error;
pub mod event;
pub mod observer;
pub mod rules;
pub mod settings;
pub mod video;

pub use error::GuardError;
