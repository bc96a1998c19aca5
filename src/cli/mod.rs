pub mod assets;
pub mod forecast;
pub mod setup;
pub mod ui;
