//! Frame dumps and video muxing.

pub use crate::dataset::Image;

use crate::error::Error;
use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

/// Writes numbered color and depth frames into a directory.
///
/// ## Details
///
/// The frames are `rgb_{i}.png` and `depth_{i}.png`.
/// The index of every frame must be greater than the previous one.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameWriter {
    pub directory: PathBuf,
    index_last: Option<usize>,
}

impl FrameWriter {
    /// Creates the directory if needed.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, Error> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            index_last: None,
        })
    }

    /// The index of the last written frame.
    #[inline]
    pub const fn index_last(&self) -> Option<usize> {
        self.index_last
    }

    /// Writes the color frame and the optional depth frame at `index`.
    ///
    /// ## Arguments
    ///
    /// * `depths` - `[H * W]` depths normalized to `[0, 1]`.
    ///
    /// ## Errors
    ///
    /// [`Error::FrameOrder`] if `index` does not increase.
    pub fn write(
        &mut self,
        index: usize,
        colors_rgb: &Image,
        depths: Option<&[f32]>,
    ) -> Result<(), Error> {
        if let Some(index_last) = self.index_last {
            if index <= index_last {
                return Err(Error::FrameOrder(index, index_last));
            }
        }

        colors_rgb
            .to_rgb8()?
            .save(self.directory.join(format!("rgb_{index}.png")))?;

        if let Some(depths) = depths {
            if depths.len() != colors_rgb.pixel_count() {
                return Err(Error::Validation(
                    "The depth count".into(),
                    format!("{}", colors_rgb.pixel_count()),
                ));
            }
            let data = depths
                .iter()
                .map(|depth| (depth.clamp(0.0, 1.0) * 255.0).round() as u8)
                .collect();
            image::GrayImage::from_raw(colors_rgb.width, colors_rgb.height, data)
                .ok_or_else(|| {
                    Error::Validation("The depth frame".into(), "complete".into())
                })?
                .save(self.directory.join(format!("depth_{index}.png")))?;
        }

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(target: "barf::export", "write > frame {index}");

        self.index_last = Some(index);
        Ok(())
    }
}

/// Muxes the frames `{prefix}_{i}.png` of `directory` into an MP4 video.
///
/// ## Details
///
/// It runs the external `ffmpeg` program.
///
/// ## Errors
///
/// [`Error::Encoder`] if `ffmpeg` cannot be run or fails.
pub fn mux_video(
    directory: impl AsRef<Path>,
    prefix: &str,
    frame_rate: u32,
    output: impl AsRef<Path>,
) -> Result<(), Error> {
    let input = directory.as_ref().join(format!("{prefix}_%d.png"));
    let result = Command::new("ffmpeg")
        .arg("-y")
        .arg("-loglevel")
        .arg("error")
        .arg("-framerate")
        .arg(frame_rate.to_string())
        .arg("-i")
        .arg(&input)
        .arg("-pix_fmt")
        .arg("yuv420p")
        .arg(output.as_ref())
        .output()
        .map_err(|error| Error::Encoder(format!("ffmpeg: {error}")))?;

    if !result.status.success() {
        return Err(Error::Encoder(format!(
            "ffmpeg exited with {}: {}",
            result.status,
            String::from_utf8_lossy(&result.stderr).trim(),
        )));
    }

    log::info!(
        target: "barf::export",
        "mux_video > {:?} from {input:?}",
        output.as_ref(),
    );

    Ok(())
}
