//! Integration tests for Quill using `Unit` as the entry point.
//!
//! Contracts are declared through `TypeEnv`, their bodies built with
//! `AstBuilder`, compiled and assembled by a `Unit`, then deployed to and
//! run on the reference machine.

mod unit;
