//! Stepflow CLI - command implementations shared by the `stepflow` binary
//! and its integration tests.

pub mod commands;
