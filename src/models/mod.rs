pub mod entry;
pub mod event;
pub mod settings;
