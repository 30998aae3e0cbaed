// FILE: src/core/mod.rs
pub mod ignore;

pub use ignore::{Bouncer, IgnoreRules};
