pub mod layout;

pub use layout::{LayoutTemplate, LearnedLayoutParams, TemplateKey};
