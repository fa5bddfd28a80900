#![allow(clippy::collapsible_if)]

pub mod config;
pub mod deploy;
pub mod diagnostics;
pub mod error;
pub mod kompiler;
pub mod language;
pub mod program;

#[cfg(test)]
mod tests;
