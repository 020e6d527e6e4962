//! Extents and pixel sizes in projected coordinates

use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};

/// Float noise tolerated when snapping to the pixel lattice, in pixels
pub const SNAP_TOLERANCE: f64 = 1e-9;

/// Axis-aligned rectangle `(xmin, xmax, ymin, ymax)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl Extent {
    /// Creates an extent, rejecting non-finite or degenerate bounds
    pub fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Result<Self> {
        let finite = [xmin, xmax, ymin, ymax].iter().all(|v| v.is_finite());
        if !finite || xmax <= xmin || ymax <= ymin {
            return Err(Error::Configuration(format!(
                "Degenerate extent ({}, {}, {}, {})",
                xmin, xmax, ymin, ymax
            )));
        }
        Ok(Self { xmin, xmax, ymin, ymax })
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Overlapping area of two extents, `None` when they only touch or are apart
    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        let xmin = self.xmin.max(other.xmin);
        let xmax = self.xmax.min(other.xmax);
        let ymin = self.ymin.max(other.ymin);
        let ymax = self.ymax.min(other.ymax);
        (xmax > xmin && ymax > ymin).then_some(Extent { xmin, xmax, ymin, ymax })
    }

    pub fn intersects(&self, other: &Extent) -> bool {
        self.intersection(other).is_some()
    }

    pub fn contains(&self, other: &Extent) -> bool {
        other.xmin >= self.xmin
            && other.xmax <= self.xmax
            && other.ymin >= self.ymin
            && other.ymax <= self.ymax
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.xmin && x <= self.xmax && y >= self.ymin && y <= self.ymax
    }

    /// Grows every edge by `dx` horizontally and `dy` vertically
    pub fn expand(&self, dx: f64, dy: f64) -> Extent {
        Extent {
            xmin: self.xmin - dx,
            xmax: self.xmax + dx,
            ymin: self.ymin - dy,
            ymax: self.ymax + dy,
        }
    }

    /// Restricts this extent to `bounds`; the two must overlap
    pub fn clamp(&self, bounds: &Extent) -> Extent {
        Extent {
            xmin: self.xmin.max(bounds.xmin),
            xmax: self.xmax.min(bounds.xmax),
            ymin: self.ymin.max(bounds.ymin),
            ymax: self.ymax.min(bounds.ymax),
        }
    }

    /// Snaps outward to multiples of the pixel size from the coordinate origin
    pub fn snap_outward(&self, pixel: PixelSize) -> Extent {
        Extent {
            xmin: (self.xmin / pixel.width + SNAP_TOLERANCE).floor() * pixel.width,
            xmax: (self.xmax / pixel.width - SNAP_TOLERANCE).ceil() * pixel.width,
            ymin: (self.ymin / pixel.height + SNAP_TOLERANCE).floor() * pixel.height,
            ymax: (self.ymax / pixel.height - SNAP_TOLERANCE).ceil() * pixel.height,
        }
    }

    /// Edge-wise equality within `tolerance`
    pub fn approx_eq(&self, other: &Extent, tolerance: f64) -> bool {
        (self.xmin - other.xmin).abs() <= tolerance
            && (self.xmax - other.xmax).abs() <= tolerance
            && (self.ymin - other.ymin).abs() <= tolerance
            && (self.ymax - other.ymax).abs() <= tolerance
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}] x [{}, {}]", self.xmin, self.xmax, self.ymin, self.ymax)
    }
}

/// Ground size of one pixel; both components are positive magnitudes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: f64,
    pub height: f64,
}

impl PixelSize {
    pub fn new(width: f64, height: f64) -> Result<Self> {
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(Error::Configuration(format!(
                "Pixel size must be positive, got {} x {}",
                width, height
            )));
        }
        Ok(Self { width, height })
    }

    pub fn square(size: f64) -> Result<Self> {
        Self::new(size, size)
    }

    /// Relative equality, used to compare resolutions read back from files
    pub fn approx_eq(&self, other: &PixelSize) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= 1e-9 * a.abs().max(b.abs());
        close(self.width, other.width) && close(self.height, other.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_degenerate() {
        assert!(Extent::new(0.0, 10.0, 0.0, 5.0).is_ok());
        assert!(matches!(Extent::new(10.0, 10.0, 0.0, 5.0), Err(Error::Configuration(_))));
        assert!(Extent::new(0.0, 10.0, 5.0, 0.0).is_err());
        assert!(Extent::new(f64::NAN, 10.0, 0.0, 5.0).is_err());
    }

    #[test]
    fn test_intersection() {
        let a = Extent::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let b = Extent::new(5.0, 15.0, -5.0, 5.0).unwrap();
        assert_eq!(a.intersection(&b), Some(Extent::new(5.0, 10.0, 0.0, 5.0).unwrap()));

        let touching = Extent::new(10.0, 20.0, 0.0, 10.0).unwrap();
        assert!(!a.intersects(&touching));
    }

    #[test]
    fn test_contains_expand_clamp() {
        let a = Extent::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let inner = Extent::new(2.0, 8.0, 2.0, 8.0).unwrap();
        assert!(a.contains(&inner));
        assert!(!inner.contains(&a));

        let grown = inner.expand(3.0, 1.0);
        assert_eq!(grown, Extent { xmin: -1.0, xmax: 11.0, ymin: 1.0, ymax: 9.0 });
        assert_eq!(grown.clamp(&a), Extent { xmin: 0.0, xmax: 10.0, ymin: 1.0, ymax: 9.0 });
    }

    #[test]
    fn test_snap_outward() {
        let pixel = PixelSize::new(2.0, 5.0).unwrap();
        let e = Extent::new(1.0, 9.5, -3.0, 12.0).unwrap();
        assert_eq!(e.snap_outward(pixel), Extent { xmin: 0.0, xmax: 10.0, ymin: -5.0, ymax: 15.0 });
    }

    #[test]
    fn test_snap_tolerates_float_noise() {
        let pixel = PixelSize::square(0.1).unwrap();
        let e = Extent::new(0.30000000000000004, 1.0, 0.0, 0.7000000000000001).unwrap();
        let snapped = e.snap_outward(pixel);
        assert!((snapped.xmin - 0.3).abs() < 1e-12);
        assert!((snapped.ymax - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_pixel_size_validation() {
        assert!(PixelSize::new(1.0, 0.0).is_err());
        assert!(PixelSize::new(-1.0, 1.0).is_err());
        assert!(PixelSize::square(0.5).unwrap().approx_eq(&PixelSize::square(0.5 + 1e-12).unwrap()));
    }
}
