//! Cross-species family matching over the summary's observed species.

mod progress;
mod resolver;

pub use resolver::{FamilyQuery, FamilyRead, FamilyResolver, FamilyStatus};
