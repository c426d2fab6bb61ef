//! Incremental mirror of cloud-hosted handwritten notebooks to local PDFs.
//!
//! The remote folder/notebook hierarchy is walked on every pass and compared
//! against a persisted snapshot; only notebooks modified since their last
//! materialization are rendered again, and items that disappeared remotely
//! are removed from the mirror.

pub mod logging;
pub mod sync;
