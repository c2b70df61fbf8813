//! Library target for the `nndl` package.
//!
//! The primary deliverable of this package is the `nndl` CLI binary
//! (`src/main.rs`). This library exists so CI can run `cargo test -p nndl --doc`
//! for feature/doctype validation.

#[doc(hidden)]
pub use nndl_engine;
