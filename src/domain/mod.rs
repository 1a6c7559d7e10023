pub mod face;
pub mod models;
pub mod settings;
