//! Image transformation: validation, geometry and the pure-Rust codec.
//!
//! | Stage | Where |
//! |---|---|
//! | **Sniff + header** | [`ImageBackend::metadata`] (no pixel decode) |
//! | **Validate + plan** | [`Options::check`] → [`Plan`] |
//! | **Decode / resize / crop / filter** | [`ImageBackend`] |
//! | **Encode** | [`ImageBackend::save`], format picked from [`SaveOptions`] |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Options**: Request validation and its JSON form
//! - **Parameters**: Data structures describing encoder settings
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: [`thumbnail`], which strings the above together

pub mod backend;
mod calculations;
mod format;
pub mod operations;
mod options;
mod orientation;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend, Metadata};
pub use calculations::{MAX_DIMENSION, MIN_DIMENSION, Plan, scale_aspect};
pub use format::Format;
pub use operations::{Thumbnail, read_metadata, thumbnail};
pub use options::{MAX_BLUR_SIGMA, Options, ThumbnailError};
pub use orientation::Orientation;
pub use params::{Encoded, Quality, SaveOptions, Sharpening};
pub use rust_backend::RustBackend;
