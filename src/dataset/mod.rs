//! Posed images with optional sensor depth.

pub mod odometry;

pub use crate::camera::{Intrinsics, PoseMatrix};
pub use burn::tensor::{backend::Backend, Tensor, TensorData};
pub use odometry::*;

use crate::{error::Error, function::tensor_extensions::TensorFloatExtension};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};

/// An RGB image with values in `[0, 1]`.
#[derive(Clone, Default, PartialEq)]
pub struct Image {
    pub height: u32,
    pub width: u32,
    /// `[H, W, 3]`
    pub data: Vec<f32>,
}

/// The camera of one image.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Camera {
    pub intrinsics: Intrinsics,
    /// World to camera.
    pub pose: PoseMatrix,
}

/// Sensor depth with a confidence tier per pixel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DepthMap {
    /// `[H * W]`
    pub depths: Vec<f32>,
    /// `[H * W]`, `0` (low) to `2` (high)
    pub confidences: Vec<u8>,
}

/// The trajectory that learned poses are evaluated against.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum ReferenceSource {
    /// The poses given by the dataset.
    #[default]
    GroundTruth,
    /// The poses tracked by an external motion capture system.
    MotionCapture,
}

/// A source of posed images.
pub trait Dataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn image(
        &self,
        index: usize,
    ) -> Result<Image, Error>;

    fn camera(
        &self,
        index: usize,
    ) -> Result<Camera, Error>;

    /// The sensor depth of the image, if any.
    fn depth(
        &self,
        index: usize,
    ) -> Result<Option<DepthMap>, Error>;

    /// The reference poses of all images, if the source is available.
    fn reference_poses(
        &self,
        source: ReferenceSource,
    ) -> Option<Vec<PoseMatrix>>;
}

/// A dataset held in memory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryDataset {
    pub images: Vec<Image>,
    pub cameras: Vec<Camera>,
    pub depths: Option<Vec<DepthMap>>,
    pub poses_motion_capture: Option<Vec<PoseMatrix>>,
}

impl Image {
    /// ## Errors
    ///
    /// If the data length is not `H * W * 3`.
    pub fn new(
        height: u32,
        width: u32,
        data: Vec<f32>,
    ) -> Result<Self, Error> {
        let image = Self {
            height,
            width,
            data,
        };
        if image.data.len() != image.pixel_count() * 3 {
            return Err(Error::Validation(
                "The image data length".into(),
                format!("{}", image.pixel_count() * 3),
            ));
        }
        Ok(image)
    }

    pub fn from_rgb8(image: &image::RgbImage) -> Self {
        Self {
            height: image.height(),
            width: image.width(),
            data: image.as_raw().iter().map(|&value| value as f32 / 255.0).collect(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::from_rgb8(&image::open(path)?.to_rgb8()))
    }

    /// ## Shapes
    ///
    /// * `colors_rgb` - `[H * W, 3]`
    pub fn from_tensor<B: Backend>(
        colors_rgb: Tensor<B, 2>,
        height: u32,
        width: u32,
    ) -> Result<Self, Error> {
        let data = colors_rgb
            .into_f64s()?
            .into_iter()
            .map(|value| value as f32)
            .collect();
        Self::new(height, width, data)
    }

    pub fn to_rgb8(&self) -> Result<image::RgbImage, Error> {
        let data = self
            .data
            .iter()
            .map(|value| (value.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        image::RgbImage::from_raw(self.width, self.height, data).ok_or_else(|| {
            Error::Validation(
                "The image data length".into(),
                format!("{}", self.pixel_count() * 3),
            )
        })
    }

    /// `[H * W, 3]`
    pub fn to_tensor<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Tensor<B, 2> {
        Tensor::from_data(
            TensorData::new(self.data.to_owned(), [self.pixel_count(), 3])
                .convert::<B::FloatElem>(),
            device,
        )
    }

    #[inline]
    pub const fn pixel_count(&self) -> usize {
        self.height as usize * self.width as usize
    }
}

impl fmt::Debug for Image {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct("Image")
            .field("height", &self.height)
            .field("width", &self.width)
            .field("data.len()", &self.data.len())
            .finish()
    }
}

impl MemoryDataset {
    /// ## Errors
    ///
    /// If the counts or the image sizes mismatch.
    pub fn new(
        images: Vec<Image>,
        cameras: Vec<Camera>,
    ) -> Result<Self, Error> {
        if images.len() != cameras.len() {
            return Err(Error::Validation(
                "The count of cameras".into(),
                format!("{}", images.len()),
            ));
        }
        for (image, camera) in images.iter().zip(&cameras) {
            let intrinsics = &camera.intrinsics;
            if image.height != intrinsics.image_height
                || image.width != intrinsics.image_width
                || image.data.len() != image.pixel_count() * 3
            {
                return Err(Error::Validation(
                    "The image size".into(),
                    format!(
                        "{} x {}",
                        intrinsics.image_height, intrinsics.image_width
                    ),
                ));
            }
        }

        Ok(Self {
            images,
            cameras,
            depths: None,
            poses_motion_capture: None,
        })
    }

    pub fn with_depths(
        mut self,
        depths: Vec<DepthMap>,
    ) -> Result<Self, Error> {
        if depths.len() != self.images.len() {
            return Err(Error::Validation(
                "The count of depth maps".into(),
                format!("{}", self.images.len()),
            ));
        }
        for (depth, image) in depths.iter().zip(&self.images) {
            let pixel_count = image.pixel_count();
            if depth.depths.len() != pixel_count
                || depth.confidences.len() != pixel_count
            {
                return Err(Error::Validation(
                    "The depth map length".into(),
                    format!("{pixel_count}"),
                ));
            }
        }

        self.depths = Some(depths);
        Ok(self)
    }

    pub fn with_motion_capture(
        mut self,
        poses: Vec<PoseMatrix>,
    ) -> Result<Self, Error> {
        if poses.len() != self.images.len() {
            return Err(Error::Validation(
                "The count of motion capture poses".into(),
                format!("{}", self.images.len()),
            ));
        }

        self.poses_motion_capture = Some(poses);
        Ok(self)
    }

    fn check_index(
        &self,
        index: usize,
    ) -> Result<(), Error> {
        if index >= self.images.len() {
            return Err(Error::Validation(
                format!("The index {index}"),
                format!("less than {}", self.images.len()),
            ));
        }
        Ok(())
    }
}

impl Dataset for MemoryDataset {
    fn len(&self) -> usize {
        self.images.len()
    }

    fn image(
        &self,
        index: usize,
    ) -> Result<Image, Error> {
        self.check_index(index)?;
        Ok(self.images[index].to_owned())
    }

    fn camera(
        &self,
        index: usize,
    ) -> Result<Camera, Error> {
        self.check_index(index)?;
        Ok(self.cameras[index])
    }

    fn depth(
        &self,
        index: usize,
    ) -> Result<Option<DepthMap>, Error> {
        self.check_index(index)?;
        Ok(self
            .depths
            .as_ref()
            .map(|depths| depths[index].to_owned()))
    }

    fn reference_poses(
        &self,
        source: ReferenceSource,
    ) -> Option<Vec<PoseMatrix>> {
        match source {
            ReferenceSource::GroundTruth => {
                Some(self.cameras.iter().map(|camera| camera.pose).collect())
            },
            ReferenceSource::MotionCapture => self.poses_motion_capture.to_owned(),
        }
    }
}
