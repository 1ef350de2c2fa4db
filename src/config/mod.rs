//! Загрузка настроек узла: значения по умолчанию, TOML-файл, окружение.

pub mod settings;

pub use settings::*;
