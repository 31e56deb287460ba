use crate::server::engine::PixelGrid;
use image::ImageReader;
use std::io::Cursor;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unrecognized image format")]
    UnknownFormat,

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Decodes encoded image bytes into an RGB [`PixelGrid`].
///
/// The format is sniffed from the leading bytes; the result depends on the
/// input alone. Default decoder limits apply, so oversized dimensions fail
/// instead of allocating.
pub fn decode(bytes: &[u8]) -> Result<PixelGrid, DecodeError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    if reader.format().is_none() {
        return Err(DecodeError::UnknownFormat);
    }
    let image = reader.decode()?;
    Ok(PixelGrid::new(image.to_rgb8()))
}
