//! HTTP handlers.
//!
//! Thin translation between the wire contract and the mediator / read
//! models: extract, dispatch, render. All business behavior lives behind
//! the mediator.

pub mod commands;
pub mod queries;
