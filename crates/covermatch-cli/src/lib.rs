//! covermatch command-line tools

pub mod batch;
pub mod output;
