//! Grayscale image buffers, bilinear sampling and frame pyramids.
//!
//! Pixel centers sit at integer coordinates: pixel `(x, y)` covers
//! `[x - 0.5, x + 0.5) × [y - 0.5, y + 0.5)`.

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

impl GrayImageView<'_> {
    /// Pixel value, or `None` outside the image.
    #[inline]
    pub fn get(&self, x: i64, y: i64) -> Option<u8> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(self.data[y as usize * self.width + x as usize])
    }

    /// True if `(x, y)` lies at least `border` pixels inside the image.
    #[inline]
    pub fn contains(&self, x: f64, y: f64, border: f64) -> bool {
        x >= border
            && y >= border
            && x < self.width as f64 - border
            && y < self.height as f64 - border
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Image filled with a constant value.
    pub fn new(width: usize, height: usize, fill: u8) -> Self {
        Self {
            width,
            height,
            data: vec![fill; width * height],
        }
    }

    /// Wrap a row-major buffer. Returns `None` if the length does not match.
    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
        (width.checked_mul(height)? == data.len()).then_some(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        if x < self.width && y < self.height {
            self.data[y * self.width + x] = value;
        }
    }
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i64, y: i64) -> u8 {
    src.get(x, y).unwrap_or(0)
}

#[inline]
fn get_gray_clamped(src: &GrayImageView<'_>, x: i64, y: i64) -> u8 {
    let x = x.clamp(0, src.width as i64 - 1) as usize;
    let y = y.clamp(0, src.height as i64 - 1) as usize;
    src.data[y * src.width + x]
}

/// Bilinear interpolation; pixels outside the image read as 0.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = get_gray(src, x0, y0) as f64;
    let p10 = get_gray(src, x0 + 1, y0) as f64;
    let p01 = get_gray(src, x0, y0 + 1) as f64;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

/// Bilinear interpolation rounded to the nearest intensity.
#[inline]
pub fn sample_bilinear_u8(src: &GrayImageView<'_>, x: f64, y: f64) -> u8 {
    (sample_bilinear(src, x, y) + 0.5).clamp(0.0, 255.0) as u8
}

/// Bilinear interpolation replicating the border pixels outside the image.
#[inline]
pub fn sample_bilinear_clamped(src: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    if src.width == 0 || src.height == 0 {
        return 0.0;
    }
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = get_gray_clamped(src, x0, y0) as f64;
    let p10 = get_gray_clamped(src, x0 + 1, y0) as f64;
    let p01 = get_gray_clamped(src, x0, y0 + 1) as f64;
    let p11 = get_gray_clamped(src, x0 + 1, y0 + 1) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

/// Multi-resolution pyramid; layer 0 is the full-resolution frame.
#[derive(Clone, Debug)]
pub struct FramePyramid {
    layers: Vec<GrayImage>,
}

impl FramePyramid {
    /// Build up to `layers` layers by 2×2 box averaging.
    ///
    /// Stops early once a layer would be smaller than 2×2 pixels.
    pub fn new(frame: &GrayImageView<'_>, layers: usize) -> Self {
        let mut out = Vec::with_capacity(layers.max(1));
        out.push(GrayImage {
            width: frame.width,
            height: frame.height,
            data: frame.data.to_vec(),
        });

        while out.len() < layers {
            let Some(prev) = out.last() else { break };
            let w = prev.width / 2;
            let h = prev.height / 2;
            if w < 2 || h < 2 {
                break;
            }
            let mut next = GrayImage::new(w, h, 0);
            for y in 0..h {
                let r0 = &prev.data[(2 * y) * prev.width..(2 * y + 1) * prev.width];
                let r1 = &prev.data[(2 * y + 1) * prev.width..(2 * y + 2) * prev.width];
                for x in 0..w {
                    let sum = r0[2 * x] as u32
                        + r0[2 * x + 1] as u32
                        + r1[2 * x] as u32
                        + r1[2 * x + 1] as u32;
                    next.data[y * w + x] = ((sum + 2) / 4) as u8;
                }
            }
            out.push(next);
        }

        Self { layers: out }
    }

    #[inline]
    pub fn layers(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn layer(&self, index: usize) -> Option<GrayImageView<'_>> {
        self.layers.get(index).map(GrayImage::view)
    }

    /// Full-resolution frame.
    #[inline]
    pub fn finest(&self) -> GrayImageView<'_> {
        self.layers[0].view()
    }

    /// True if both pyramids have the same layer count and sizes.
    pub fn is_compatible(&self, other: &FramePyramid) -> bool {
        self.layers.len() == other.layers.len()
            && self
                .layers
                .iter()
                .zip(&other.layers)
                .all(|(a, b)| a.width == b.width && a.height == b.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_interpolates_between_pixel_centers() {
        let img = GrayImage::from_raw(2, 2, vec![0, 100, 100, 200]).expect("buffer");
        let v = img.view();
        assert_eq!(sample_bilinear(&v, 0.0, 0.0), 0.0);
        assert_eq!(sample_bilinear(&v, 0.5, 0.0), 50.0);
        assert_eq!(sample_bilinear(&v, 0.5, 0.5), 100.0);
        assert_eq!(sample_bilinear_u8(&v, 1.0, 1.0), 200);
    }

    #[test]
    fn clamped_sampling_replicates_border() {
        let img = GrayImage::from_raw(2, 1, vec![10, 30]).expect("buffer");
        let v = img.view();
        assert_eq!(sample_bilinear_clamped(&v, -3.0, 0.0), 10.0);
        assert_eq!(sample_bilinear_clamped(&v, 5.0, 2.0), 30.0);
        assert_eq!(sample_bilinear(&v, -1.0, 0.0), 0.0);
    }

    #[test]
    fn pyramid_halves_each_layer() {
        let img = GrayImage::new(64, 48, 90);
        let pyramid = FramePyramid::new(&img.view(), 6);
        assert_eq!(pyramid.layers(), 5);
        let top = pyramid.layer(4).expect("layer");
        assert_eq!((top.width, top.height), (4, 3));
        assert!(top.data.iter().all(|&p| p == 90));
    }

    #[test]
    fn from_raw_rejects_wrong_length() {
        assert!(GrayImage::from_raw(3, 3, vec![0; 8]).is_none());
    }
}
