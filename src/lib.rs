pub mod bridge;
pub mod builder;
pub mod fill;
pub mod i18n;
pub mod id;
pub mod prelude;

pub use i18n::{I18nManager, Locale};
