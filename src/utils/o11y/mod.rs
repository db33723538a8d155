//! Common observability utilities.
//!
//! This module provides the tracing and logging setup shared by the
//! provisioner binary and its tests.
//!
pub mod logging;
