//! This library crate contains everything needed to run the two halves of an eventbus instance.
//!
//! The publisher accepts events over HTTP, validates them and hands them to a streaming broker.
//! The dispatcher watches subscription resources and pushes matching events to their webhooks.
//!
//! Submodules have been introduced to split responsibilities. Each module has a specific focus
//! and they together form a chain of dependencies from the low-level [`library`], over the eventbus [`domain`]
//! specific logic, through the executable [`harness`], up to the high-level [`modules`](module).

#![deny(missing_docs)]
#![allow(clippy::nonstandard_macro_braces)]

pub mod constants;
pub mod domain;
pub mod harness;
pub mod library;
pub mod module;
