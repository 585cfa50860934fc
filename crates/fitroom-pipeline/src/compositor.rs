//! Multi-panel preview and artifact composition.
//!
//! All panels of one submission share the canonical `(W, H)`. The
//! preview puts a shrunk column of condition panels on the left and the
//! full-size result on the right, separated by a [`PREVIEW_GUTTER`]:
//!
//! ```text
//! +------+-----+--------------------+
//! |person|     |                    |
//! +------+ gap |       result       |
//! |garmnt|     |                    |
//! +------+-----+--------------------+
//!  W / n    5           W
//! ```

use image::imageops::{self, FilterType};
use image::{Luma, Rgb};

use crate::types::{DisplayMode, FitroomError, GrayImage, RgbImage};

/// Horizontal gap between the condition column and the result.
pub const PREVIEW_GUTTER: u32 = 5;

/// Mask values above this are treated as inside the garment region.
pub const OVERLAY_THRESHOLD: u8 = 127;

/// The four panels of a finished submission.
#[derive(Debug, Clone, Copy)]
pub struct Panels<'a> {
    /// Normalized person canvas.
    pub person: &'a RgbImage,
    /// Person canvas with the garment region blacked out.
    pub masked: &'a RgbImage,
    /// Normalized garment canvas.
    pub garment: &'a RgbImage,
    /// Try-on result.
    pub result: &'a RgbImage,
}

impl Panels<'_> {
    fn ensure_uniform(&self) -> Result<(u32, u32), FitroomError> {
        let dims = self.result.dimensions();
        for (name, panel) in [
            ("person", self.person),
            ("masked person", self.masked),
            ("garment", self.garment),
        ] {
            if panel.dimensions() != dims {
                let (w, h) = panel.dimensions();
                return Err(FitroomError::Input(format!(
                    "{name} panel is {w}x{h}, result is {}x{}",
                    dims.0, dims.1
                )));
            }
        }
        Ok(dims)
    }
}

/// Tile `panels` row-major into a `rows x cols` grid.
///
/// # Errors
///
/// Returns [`FitroomError::Input`] if `panels` is empty, its length is
/// not `rows * cols`, or the panels differ in size.
pub fn image_grid(panels: &[&RgbImage], rows: u32, cols: u32) -> Result<RgbImage, FitroomError> {
    let Some(first) = panels.first() else {
        return Err(FitroomError::Input("image grid needs at least one panel".into()));
    };
    let expected = usize::try_from(u64::from(rows) * u64::from(cols)).unwrap_or(usize::MAX);
    if panels.len() != expected {
        return Err(FitroomError::Input(format!(
            "image grid of {rows}x{cols} needs {expected} panels, got {}",
            panels.len()
        )));
    }
    let (w, h) = first.dimensions();
    if let Some(odd) = panels.iter().find(|p| p.dimensions() != (w, h)) {
        let (ow, oh) = odd.dimensions();
        return Err(FitroomError::Input(format!(
            "image grid panels must share one size, got {w}x{h} and {ow}x{oh}"
        )));
    }

    let mut grid = RgbImage::new(cols * w, rows * h);
    for (i, panel) in (0u32..).zip(panels) {
        let x = i64::from(i % cols * w);
        let y = i64::from(i / cols * h);
        imageops::replace(&mut grid, *panel, x, y);
    }
    Ok(grid)
}

/// Compose the preview for `mode`.
///
/// # Errors
///
/// Returns [`FitroomError::Input`] if the panels differ in size.
pub fn compose(mode: DisplayMode, panels: &Panels<'_>) -> Result<RgbImage, FitroomError> {
    let (width, height) = panels.ensure_uniform()?;
    let conditions: Vec<&RgbImage> = match mode {
        DisplayMode::ResultOnly => return Ok(panels.result.clone()),
        DisplayMode::InputResult => vec![panels.person, panels.garment],
        DisplayMode::InputMaskResult => vec![panels.person, panels.masked, panels.garment],
    };

    let n = u32::try_from(conditions.len()).unwrap_or(u32::MAX);
    let column = image_grid(&conditions, n, 1)?;
    let column_width = (width / n).max(1);
    let column = imageops::resize(&column, column_width, height, FilterType::Nearest);

    let mut canvas = RgbImage::new(width + column_width + PREVIEW_GUTTER, height);
    imageops::replace(&mut canvas, &column, 0, 0);
    imageops::replace(
        &mut canvas,
        panels.result,
        i64::from(column_width + PREVIEW_GUTTER),
        0,
    );
    Ok(canvas)
}

/// The persisted artifact: person, masked person, garment and result in
/// one row.
///
/// # Errors
///
/// Returns [`FitroomError::Input`] if the panels differ in size.
pub fn artifact_grid(panels: &Panels<'_>) -> Result<RgbImage, FitroomError> {
    panels.ensure_uniform()?;
    image_grid(
        &[panels.person, panels.masked, panels.garment, panels.result],
        1,
        4,
    )
}

/// Black out the garment region of `person`.
///
/// # Errors
///
/// Returns [`FitroomError::Input`] if `mask` and `person` differ in size.
pub fn mask_overlay(person: &RgbImage, mask: &GrayImage) -> Result<RgbImage, FitroomError> {
    same_size(person, mask)?;
    Ok(RgbImage::from_fn(person.width(), person.height(), |x, y| {
        let Luma([m]) = *mask.get_pixel(x, y);
        if m > OVERLAY_THRESHOLD {
            Rgb([0, 0, 0])
        } else {
            *person.get_pixel(x, y)
        }
    }))
}

/// Blend `result` back onto `person` using `mask` as alpha.
///
/// Outside the garment region the original person pixels are restored
/// exactly.
///
/// # Errors
///
/// Returns [`FitroomError::Input`] if the three images differ in size.
pub fn repaint(
    person: &RgbImage,
    result: &RgbImage,
    mask: &GrayImage,
) -> Result<RgbImage, FitroomError> {
    same_size(person, mask)?;
    same_size(result, mask)?;
    Ok(RgbImage::from_fn(person.width(), person.height(), |x, y| {
        let alpha = f32::from(mask.get_pixel(x, y).0[0]) / 255.0;
        let Rgb(p) = *person.get_pixel(x, y);
        let Rgb(r) = *result.get_pixel(x, y);
        Rgb(std::array::from_fn(|c| blend(r[c], p[c], alpha)))
    }))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn blend(over: u8, under: u8, alpha: f32) -> u8 {
    let val = f32::from(over).mul_add(alpha, f32::from(under) * (1.0 - alpha));
    val.round().clamp(0.0, 255.0) as u8
}

fn same_size(image: &RgbImage, mask: &GrayImage) -> Result<(), FitroomError> {
    if image.dimensions() == mask.dimensions() {
        return Ok(());
    }
    let (iw, ih) = image.dimensions();
    let (mw, mh) = mask.dimensions();
    Err(FitroomError::Input(format!(
        "mask is {mw}x{mh}, image is {iw}x{ih}"
    )))
}
