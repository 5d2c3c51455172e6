use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::marker::PhantomData;

pub trait BBoxFormat: std::fmt::Debug {}

/// Left-top-width-height format, contains left top corner and width-height
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Ltwh;
impl BBoxFormat for Ltwh {}

/// Left-top-right-bottom format, contains left top and right bottom corners
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

/// Serialized as a bare `[f32; 4]` in the order of its format.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(transparent, bound = "")]
pub struct BBox<F: BBoxFormat>([f32; 4], #[serde(skip)] PhantomData<F>);

impl<F: BBoxFormat> From<BBox<F>> for [f32; 4] {
    fn from(bbox: BBox<F>) -> Self {
        bbox.0
    }
}

impl<F: BBoxFormat> BBox<F> {
    #[inline]
    pub fn as_slice(&self) -> &[f32; 4] {
        &self.0
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        BBox([x1, y1, x2, y2], PhantomData)
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.0[3]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.right() - self.left()
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.bottom() - self.top()
    }

    #[inline]
    pub fn center(&self) -> na::Point2<f32> {
        na::Point2::new(
            (self.left() + self.right()) * 0.5,
            (self.top() + self.bottom()) * 0.5,
        )
    }

    /// Snaps to the integer pixel grid and clips to a `width` x `height` image.
    pub fn clip(&self, width: usize, height: usize) -> BBox<Ltrb> {
        let (w, h) = (width as f32, height as f32);

        BBox::ltrb(
            self.left().floor().clamp(0.0, w),
            self.top().floor().clamp(0.0, h),
            self.right().floor().clamp(0.0, w),
            self.bottom().floor().clamp(0.0, h),
        )
    }

    #[inline]
    pub fn as_ltwh(&self) -> BBox<Ltwh> {
        self.into()
    }
}

impl BBox<Ltwh> {
    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.0[3]
    }
}

impl<'a> From<&'a BBox<Ltrb>> for BBox<Ltwh> {
    #[inline]
    fn from(v: &'a BBox<Ltrb>) -> Self {
        Self(
            [v.0[0], v.0[1], v.0[2] - v.0[0], v.0[3] - v.0[1]],
            PhantomData,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn center_is_midpoint() {
        let b = BBox::ltrb(10.0, 20.0, 30.0, 60.0);
        let c = b.center();

        assert_relative_eq!(c.x, 20.0);
        assert_relative_eq!(c.y, 40.0);
        assert_relative_eq!(b.width(), 20.0);
        assert_relative_eq!(b.height(), 40.0);
    }

    #[test]
    fn clip_to_image_bounds() {
        let b = BBox::ltrb(-5.7, 3.2, 700.0, 90.9).clip(640, 480);

        assert_eq!(b.as_slice(), &[0.0, 3.0, 640.0, 90.0]);

        let ltwh = b.as_ltwh();
        assert_relative_eq!(ltwh.width(), 640.0);
        assert_relative_eq!(ltwh.height(), 87.0);
    }

    #[test]
    fn serializes_as_plain_array() {
        let b = BBox::ltrb(1.0, 2.0, 3.0, 4.0);
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, "[1.0,2.0,3.0,4.0]");

        let back: BBox<Ltrb> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }
}
