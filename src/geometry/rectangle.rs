use super::interval::{Interval, MAX_VALUE, MIN_VALUE};
use crate::error::GeometryError;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

const EARTH_RADIUS_EQUATOR_M: f64 = 6_371_000.0;
const EARTH_RADIUS_POLE_M: f64 = 6_356_800.0;

/// An axis-aligned box: one [`Interval`] per dimension.
///
/// Stored as a flat `[low0, high0, low1, high1, ...]` array plus one inclusion
/// flag per bound. The zero-dimensional value is [`FULL_SPACE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperrectangle {
    bounds: Vec<f64>,
    included: Vec<bool>,
}

/// Identity for covering boxes, absorbing for overlap tests.
pub const FULL_SPACE: Hyperrectangle = Hyperrectangle {
    bounds: Vec::new(),
    included: Vec::new(),
};

impl Hyperrectangle {
    /// Closed box from `[low0, high0, low1, high1, ...]`.
    pub fn from_bounds(bounds: &[f64]) -> Result<Self, GeometryError> {
        if bounds.len() % 2 != 0 {
            return Err(GeometryError::Parse(format!(
                "even number of bounds expected, got {}",
                bounds.len()
            )));
        }

        let intervals = bounds
            .chunks(2)
            .map(|pair| Interval::closed(pair[0], pair[1]))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_intervals(&intervals))
    }

    pub fn from_intervals(intervals: &[Interval]) -> Self {
        let mut bounds = Vec::with_capacity(intervals.len() * 2);
        let mut included = Vec::with_capacity(intervals.len() * 2);

        for interval in intervals {
            bounds.push(interval.begin());
            bounds.push(interval.end());
            included.push(interval.is_begin_included());
            included.push(interval.is_end_included());
        }

        Self { bounds, included }
    }

    /// `[min,max]` in every one of `dimension` dimensions.
    pub fn full_covering(dimension: usize) -> Result<Self, GeometryError> {
        if dimension == 0 {
            return Err(GeometryError::InvalidDimension {
                dimension,
                dimensions: 0,
            });
        }

        Ok(Self::from_intervals(&vec![Interval::unbounded(); dimension]))
    }

    pub fn dimension(&self) -> usize {
        self.bounds.len() / 2
    }

    pub fn is_full_space(&self) -> bool {
        self.bounds.is_empty()
    }

    /// # Panics
    ///
    /// If `dimension` is out of range.
    pub fn low(&self, dimension: usize) -> f64 {
        self.bounds[2 * dimension]
    }

    /// # Panics
    ///
    /// If `dimension` is out of range.
    pub fn high(&self, dimension: usize) -> f64 {
        self.bounds[2 * dimension + 1]
    }

    pub fn is_low_included(&self, dimension: usize) -> bool {
        self.included[2 * dimension]
    }

    pub fn is_high_included(&self, dimension: usize) -> bool {
        self.included[2 * dimension + 1]
    }

    pub fn interval(&self, dimension: usize) -> Result<Interval, GeometryError> {
        self.check_dimension(dimension)?;
        Ok(self.interval_at(dimension))
    }

    pub fn intervals(&self) -> Vec<Interval> {
        (0..self.dimension()).map(|d| self.interval_at(d)).collect()
    }

    fn interval_at(&self, dimension: usize) -> Interval {
        Interval::from_raw(
            self.low(dimension),
            self.high(dimension),
            self.is_low_included(dimension),
            self.is_high_included(dimension),
        )
    }

    fn check_dimension(&self, dimension: usize) -> Result<(), GeometryError> {
        if dimension >= self.dimension() {
            return Err(GeometryError::InvalidDimension {
                dimension,
                dimensions: self.dimension(),
            });
        }
        Ok(())
    }

    fn check_same_dimension(&self, other: &Hyperrectangle) -> Result<(), GeometryError> {
        if self.dimension() != other.dimension() {
            return Err(GeometryError::DimensionMismatch {
                left: self.dimension(),
                right: other.dimension(),
            });
        }
        Ok(())
    }

    /// Byte footprint used for tuple size accounting.
    pub fn size(&self) -> usize {
        self.bounds.len() * std::mem::size_of::<f64>() + self.included.len()
    }

    pub fn extent(&self, dimension: usize) -> f64 {
        self.high(dimension) - self.low(dimension)
    }

    /// Product of all extents. FULL_SPACE has volume 0.
    pub fn volume(&self) -> f64 {
        if self.is_full_space() {
            return 0.0;
        }
        (0..self.dimension()).map(|d| self.extent(d)).product()
    }

    /// True if the boxes share at least one point. FULL_SPACE intersects
    /// everything; boxes of different dimensionality never do.
    pub fn intersects(&self, other: &Hyperrectangle) -> bool {
        if self.is_full_space() || other.is_full_space() {
            return true;
        }

        if self == other {
            return true;
        }

        if self.dimension() != other.dimension() {
            return false;
        }

        (0..self.dimension()).all(|d| self.interval_at(d).is_overlapping_with(&other.interval_at(d)))
    }

    /// True iff `other` lies completely inside this box.
    pub fn is_covering(&self, other: &Hyperrectangle) -> Result<bool, GeometryError> {
        if self.is_full_space() || other.is_full_space() {
            return Ok(true);
        }

        self.check_same_dimension(other)?;

        Ok((0..self.dimension()).all(|d| self.interval_at(d).is_covering(&other.interval_at(d))))
    }

    /// True if `other`'s interval in any single dimension is fully covered.
    pub fn covers_at_least_one_dimension_complete(
        &self,
        other: &Hyperrectangle,
    ) -> Result<bool, GeometryError> {
        if self.is_full_space() || other.is_full_space() {
            return Ok(true);
        }

        self.check_same_dimension(other)?;

        Ok((0..self.dimension()).any(|d| self.interval_at(d).is_covering(&other.interval_at(d))))
    }

    pub fn is_covering_point_in_dimension(
        &self,
        point: f64,
        dimension: usize,
    ) -> Result<bool, GeometryError> {
        self.check_dimension(dimension)?;
        Ok(self.interval_at(dimension).is_point_included(point))
    }

    /// The shared box, `None` if the boxes are disjoint in any dimension.
    /// FULL_SPACE intersected with anything is FULL_SPACE.
    pub fn intersection(
        &self,
        other: &Hyperrectangle,
    ) -> Result<Option<Hyperrectangle>, GeometryError> {
        if self.is_full_space() || other.is_full_space() {
            return Ok(Some(FULL_SPACE));
        }

        self.check_same_dimension(other)?;

        let mut intervals = Vec::with_capacity(self.dimension());
        for d in 0..self.dimension() {
            match self.interval_at(d).intersection(&other.interval_at(d)) {
                Some(interval) => intervals.push(interval),
                None => return Ok(None),
            }
        }

        Ok(Some(Self::from_intervals(&intervals)))
    }

    /// Lower half of a split at `position` in `dimension`.
    pub fn split_and_get_left(
        &self,
        position: f64,
        dimension: usize,
        position_included: bool,
    ) -> Result<Hyperrectangle, GeometryError> {
        self.split(position, dimension, |interval| {
            interval.split_and_get_left(position, position_included)
        })
    }

    /// Upper half of a split at `position` in `dimension`.
    pub fn split_and_get_right(
        &self,
        position: f64,
        dimension: usize,
        position_included: bool,
    ) -> Result<Hyperrectangle, GeometryError> {
        self.split(position, dimension, |interval| {
            interval.split_and_get_right(position, position_included)
        })
    }

    fn split<F>(&self, position: f64, dimension: usize, f: F) -> Result<Hyperrectangle, GeometryError>
    where
        F: FnOnce(&Interval) -> Result<Interval, GeometryError>,
    {
        self.check_dimension(dimension)?;

        let mut intervals = self.intervals();
        let target = intervals[dimension];

        if !target.is_point_included(position) {
            return Err(GeometryError::SplitPointNotCovered {
                point: position,
                dimension,
            });
        }

        intervals[dimension] = f(&target)?;
        Ok(Self::from_intervals(&intervals))
    }

    /// Smallest box covering all inputs. FULL_SPACE inputs are skipped; an
    /// empty or all-FULL_SPACE input yields FULL_SPACE.
    pub fn covering_box(boxes: &[Hyperrectangle]) -> Result<Hyperrectangle, GeometryError> {
        let mut relevant = boxes.iter().filter(|b| !b.is_full_space());

        let Some(first) = relevant.next() else {
            return Ok(FULL_SPACE);
        };

        let mut bounds = first.bounds.clone();
        let mut included = first.included.clone();

        for other in relevant {
            first.check_same_dimension(other)?;

            for d in 0..first.dimension() {
                let (low, high) = (2 * d, 2 * d + 1);

                match other.bounds[low].total_cmp(&bounds[low]) {
                    Ordering::Less => {
                        bounds[low] = other.bounds[low];
                        included[low] = other.included[low];
                    }
                    Ordering::Equal => included[low] |= other.included[low],
                    Ordering::Greater => {}
                }

                match other.bounds[high].total_cmp(&bounds[high]) {
                    Ordering::Greater => {
                        bounds[high] = other.bounds[high];
                        included[high] = other.included[high];
                    }
                    Ordering::Equal => included[high] |= other.included[high],
                    Ordering::Less => {}
                }
            }
        }

        Ok(Hyperrectangle { bounds, included })
    }

    /// Covering box of two boxes; FULL_SPACE yields the other operand.
    pub fn covering_box_of(
        a: &Hyperrectangle,
        b: &Hyperrectangle,
    ) -> Result<Hyperrectangle, GeometryError> {
        if a.is_full_space() {
            return Ok(b.clone());
        }
        if b.is_full_space() {
            return Ok(a.clone());
        }
        Self::covering_box(&[a.clone(), b.clone()])
    }

    /// Volume the box would have to grow by to cover `other`.
    pub fn calculate_enlargement(&self, other: &Hyperrectangle) -> Result<f64, GeometryError> {
        if self.is_full_space() || other.is_full_space() {
            return Ok(0.0);
        }

        if self.is_covering(other)? {
            return Ok(0.0);
        }

        let covering = Self::covering_box_of(self, other)?;
        Ok(covering.volume() - self.volume())
    }

    /// Grows every extent by `factor` around the box center.
    pub fn enlarge_by_factor(&self, factor: f64) -> Result<Hyperrectangle, GeometryError> {
        let padding: Vec<f64> = (0..self.dimension())
            .map(|d| self.extent(d) * (factor - 1.0) / 2.0)
            .collect();
        self.add_padding(&padding)
    }

    /// Pads every dimension by `amount` on both sides.
    pub fn enlarge_by_amount(&self, amount: f64) -> Result<Hyperrectangle, GeometryError> {
        self.add_padding(&vec![amount; self.dimension()])
    }

    /// Pads a latitude/longitude box (dimension 0 = latitude, dimension 1 =
    /// longitude) by distances in meters.
    pub fn enlarge_by_meters(
        &self,
        meters_latitude: f64,
        meters_longitude: f64,
    ) -> Result<Hyperrectangle, GeometryError> {
        if self.dimension() != 2 {
            return Err(GeometryError::DimensionMismatch {
                left: self.dimension(),
                right: 2,
            });
        }

        let latitude_rad = self.low(0) * PI / 180.0;

        let degree_per_meter_lat = 360.0 / (2.0 * PI * EARTH_RADIUS_POLE_M);
        let degree_per_meter_lon =
            (360.0 / (latitude_rad.cos() * 2.0 * PI * EARTH_RADIUS_EQUATOR_M)).abs();

        let diff_lat = meters_latitude * degree_per_meter_lat;
        let diff_lon = meters_longitude * degree_per_meter_lon;

        self.add_padding(&[diff_lat / 2.0, diff_lon / 2.0])
    }

    /// Pads dimension `d` by `padding[d]` on both sides. Result bounds are
    /// closed.
    pub fn add_padding(&self, padding: &[f64]) -> Result<Hyperrectangle, GeometryError> {
        if padding.len() != self.dimension() {
            return Err(GeometryError::DimensionMismatch {
                left: self.dimension(),
                right: padding.len(),
            });
        }

        let mut bounds = Vec::with_capacity(self.bounds.len());
        for (d, pad) in padding.iter().enumerate() {
            bounds.push(self.low(d) - pad);
            bounds.push(self.high(d) + pad);
        }

        Self::from_bounds(&bounds)
    }

    /// Shrinks or grows the box so its volume becomes `percentage` of the
    /// current one. Not defined for FULL_SPACE or unbounded boxes.
    pub fn scale_volume_by_percentage(&self, percentage: f64) -> Option<Hyperrectangle> {
        if self.is_full_space() {
            return None;
        }

        if self.bounds.iter().any(|&b| b == MIN_VALUE || b == MAX_VALUE) {
            return None;
        }

        let factor = percentage.powf(1.0 / self.dimension() as f64);

        let mut intervals = Vec::with_capacity(self.dimension());
        for d in 0..self.dimension() {
            let extent = self.extent(d) * factor;
            let low = self.low(d);
            intervals.push(
                Interval::new(low, low + extent, self.is_low_included(d), self.is_high_included(d))
                    .ok()?,
            );
        }

        Some(Self::from_intervals(&intervals))
    }

    /// Orders by dimension count first, then by the low corner.
    pub fn cmp_by_low_corner(&self, other: &Hyperrectangle) -> Ordering {
        self.dimension().cmp(&other.dimension()).then_with(|| {
            (0..self.dimension())
                .map(|d| self.low(d).total_cmp(&other.low(d)))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        })
    }

    /// Big-endian `f64` pairs, one pair per dimension.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bounds.iter().flat_map(|b| b.to_be_bytes()).collect()
    }

    /// Decodes [`Self::to_bytes`]; bounds are closed. Empty input is FULL_SPACE.
    pub fn from_bytes(bytes: &[u8]) -> Result<Hyperrectangle, GeometryError> {
        if bytes.len() % 16 != 0 {
            return Err(GeometryError::Parse(format!(
                "binary box length {} is not a multiple of 16",
                bytes.len()
            )));
        }

        let bounds: Vec<f64> = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                f64::from_be_bytes(buf)
            })
            .collect();

        Self::from_bounds(&bounds)
    }

    /// [`Self::to_bytes`] followed by one byte per bound inclusion flag.
    pub fn to_bytes_with_inclusion(&self) -> Vec<u8> {
        let mut bytes = self.to_bytes();
        bytes.extend(self.included.iter().map(|&i| i as u8));
        bytes
    }

    pub fn from_bytes_with_inclusion(bytes: &[u8]) -> Result<Hyperrectangle, GeometryError> {
        // 2 doubles + 2 flags per dimension
        if bytes.len() % 18 != 0 {
            return Err(GeometryError::Parse(format!(
                "binary box length {} is not a multiple of 18",
                bytes.len()
            )));
        }

        let dimension = bytes.len() / 18;
        let (values, flags) = bytes.split_at(dimension * 16);
        let plain = Self::from_bytes(values)?;

        let intervals = (0..dimension)
            .map(|d| {
                Interval::new(
                    plain.low(d),
                    plain.high(d),
                    flags[2 * d] != 0,
                    flags[2 * d + 1] != 0,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_intervals(&intervals))
    }
}

impl fmt::Display for Hyperrectangle {
    /// Compact form `[i0:i1:...]`, `[]` for FULL_SPACE.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for d in 0..self.dimension() {
            if d > 0 {
                write!(f, ":")?;
            }
            write!(f, "{}", self.interval_at(d))?;
        }
        write!(f, "]")
    }
}

impl FromStr for Hyperrectangle {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s == "[]" {
            return Ok(FULL_SPACE);
        }

        let inner = s
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| GeometryError::Parse(format!("box has to be enclosed in []: {}", s)))?;

        if !inner.contains(',') {
            return Err(GeometryError::Parse(format!("box without intervals: {}", s)));
        }

        let intervals = inner
            .split(':')
            .map(Interval::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_intervals(&intervals))
    }
}
