// ABOUTME: Validated domain types shared across the crate.
// ABOUTME: Target names and non-empty command argument vectors.

mod argv;
mod target_name;

pub use argv::{Argv, ArgvError};
pub use target_name::{TargetName, TargetNameError};
