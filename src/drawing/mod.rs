//! Drawing module for the Write stage
//!
//! Provides the freehand raster surface and the quiet-period timer that
//! decides when a drawing is finished.

mod commit;
mod surface;

use thiserror::Error;

pub use commit::CommitTimer;
pub use surface::DrawingSurface;

/// Errors from the drawing surface
#[derive(Error, Debug)]
pub enum DrawingError {
    #[error("failed to encode drawing: {0}")]
    Encode(#[from] image::ImageError),
}
