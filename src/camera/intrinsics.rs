/// Pinhole camera intrinsics.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Intrinsics {
    /// Horizontal focal length in pixels.
    pub focal_length_x: f64,
    /// Vertical focal length in pixels.
    pub focal_length_y: f64,
    /// Horizontal principal point in pixels.
    pub principal_x: f64,
    /// Vertical principal point in pixels.
    pub principal_y: f64,
    /// Image height.
    pub image_height: u32,
    /// Image width.
    pub image_width: u32,
}

/// Linear transformations.
impl Intrinsics {
    /// Reads the focal lengths and principal point from a `3 x 3` matrix.
    ///
    /// It is in **row-major order**, i.e., `K[row][col]`.
    pub const fn from_matrix(
        matrix: &[[f64; 3]; 3],
        image_height: u32,
        image_width: u32,
    ) -> Self {
        Self {
            focal_length_x: matrix[0][0],
            focal_length_y: matrix[1][1],
            principal_x: matrix[0][2],
            principal_y: matrix[1][2],
            image_height,
            image_width,
        }
    }

    /// Centered intrinsics with the horizontal field of view in radians.
    pub fn from_field_of_view(
        field_of_view_x: f64,
        image_height: u32,
        image_width: u32,
    ) -> Self {
        let focal_length = 0.5 * image_width as f64 / (0.5 * field_of_view_x).tan();
        Self {
            focal_length_x: focal_length,
            focal_length_y: focal_length,
            principal_x: 0.5 * image_width as f64,
            principal_y: 0.5 * image_height as f64,
            image_height,
            image_width,
        }
    }

    /// Returns the `3 x 3` matrix in **row-major order**.
    #[inline]
    pub const fn matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.focal_length_x, 0.0, self.principal_x],
            [0.0, self.focal_length_y, self.principal_y],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Returns the inverse of [`Intrinsics::matrix`].
    #[inline]
    pub fn matrix_inverse(&self) -> [[f64; 3]; 3] {
        let fx = self.focal_length_x;
        let fy = self.focal_length_y;
        [
            [1.0 / fx, 0.0, -self.principal_x / fx],
            [0.0, 1.0 / fy, -self.principal_y / fy],
            [0.0, 0.0, 1.0],
        ]
    }
}

/// Dimension operations
impl Intrinsics {
    /// Returns the aspect ratio (`width / height`).
    #[inline]
    pub const fn aspect_ratio(&self) -> f32 {
        self.image_width as f32 / self.image_height as f32
    }

    /// Returns `height * width`.
    #[inline]
    pub const fn pixel_count(&self) -> usize {
        self.image_height as usize * self.image_width as usize
    }

    /// Resizing the image to the maximum side length of `to`.
    ///
    /// The focal lengths and the principal point are scaled along.
    pub fn resize_max(
        &mut self,
        to: u32,
    ) -> &mut Self {
        let ratio = self.aspect_ratio();
        let (width, height) = if ratio > 1.0 {
            (to, (to as f32 / ratio).ceil() as u32)
        } else {
            ((to as f32 * ratio).ceil() as u32, to)
        };
        let scale_x = width as f64 / self.image_width as f64;
        let scale_y = height as f64 / self.image_height as f64;

        self.focal_length_x *= scale_x;
        self.principal_x *= scale_x;
        self.focal_length_y *= scale_y;
        self.principal_y *= scale_y;
        self.image_width = width;
        self.image_height = height;
        self
    }
}
