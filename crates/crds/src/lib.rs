//! klot-io CRD Definitions
//!
//! Custom resource types reconciled by the klot-io node controller.

pub mod app;

pub use app::*;
