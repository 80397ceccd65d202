use crate::error::GeometryError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Surrogate for negative infinity in an unbounded dimension.
pub const MIN_VALUE: f64 = -(f32::MAX as f64);

/// Surrogate for positive infinity in an unbounded dimension.
pub const MAX_VALUE: f64 = f32::MAX as f64;

/// A single-dimension range with independently open or closed endpoints.
///
/// Invariants: `begin <= end`, and a degenerate interval (`begin == end`)
/// includes both endpoints. Values are immutable; every transform returns a
/// new interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    begin: f64,
    end: f64,
    begin_included: bool,
    end_included: bool,
}

impl Interval {
    pub fn new(
        begin: f64,
        end: f64,
        begin_included: bool,
        end_included: bool,
    ) -> Result<Self, GeometryError> {
        if begin.is_nan() || end.is_nan() {
            return Err(GeometryError::InvalidInterval(
                "NaN is not a valid bound".to_string(),
            ));
        }

        if begin > end {
            return Err(GeometryError::InvalidInterval(format!(
                "begin {} > end {}",
                begin, end
            )));
        }

        if begin == end && !(begin_included && end_included) {
            return Err(GeometryError::InvalidInterval(format!(
                "open interval with begin = end = {}",
                begin
            )));
        }

        Ok(Self {
            begin,
            end,
            begin_included,
            end_included,
        })
    }

    /// Closed interval `[begin, end]`.
    pub fn closed(begin: f64, end: f64) -> Result<Self, GeometryError> {
        Self::new(begin, end, true, true)
    }

    /// `[min, max]`, the whole unbounded dimension.
    pub fn unbounded() -> Self {
        Self {
            begin: MIN_VALUE,
            end: MAX_VALUE,
            begin_included: true,
            end_included: true,
        }
    }

    /// Builds an interval from bounds that were already validated.
    pub(crate) fn from_raw(begin: f64, end: f64, begin_included: bool, end_included: bool) -> Self {
        debug_assert!(begin <= end);
        Self {
            begin,
            end,
            begin_included,
            end_included,
        }
    }

    pub fn begin(&self) -> f64 {
        self.begin
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn is_begin_included(&self) -> bool {
        self.begin_included
    }

    pub fn is_end_included(&self) -> bool {
        self.end_included
    }

    pub fn length(&self) -> f64 {
        self.end - self.begin
    }

    pub fn midpoint(&self) -> f64 {
        self.begin + self.length() / 2.0
    }

    pub fn is_point_included(&self, point: f64) -> bool {
        self.overlaps(point, true)
    }

    /// Point membership. A point that sits on an endpoint is only a member
    /// when both the endpoint and the point itself are included.
    pub fn overlaps(&self, point: f64, point_included: bool) -> bool {
        if point < self.begin || point > self.end {
            return false;
        }

        if point == self.begin && !(self.begin_included && point_included) {
            return false;
        }

        if point == self.end && !(self.end_included && point_included) {
            return false;
        }

        true
    }

    /// True unless both ranges are disjoint.
    ///
    /// Covers left and right overlap, nesting in either direction, equality,
    /// touching endpoints (overlap only if both touching bounds are closed)
    /// and full separation.
    pub fn is_overlapping_with(&self, other: &Interval) -> bool {
        if self.overlaps(other.begin, other.begin_included)
            || self.overlaps(other.end, other.end_included)
            || other.overlaps(self.begin, self.begin_included)
            || other.overlaps(self.end, self.end_included)
        {
            return true;
        }

        // Identical or nested open ranges whose endpoints coincide, e.g.
        // (0,5) vs (0,5) or [0,5] vs (0,5): no endpoint is a member of the
        // other range, yet the interiors are shared.
        let low = self.begin.max(other.begin);
        let high = self.end.min(other.end);
        low < high
    }

    /// True iff `other` lies completely inside this interval. At equal
    /// coordinates a closed bound covers an open one, never the reverse.
    pub fn is_covering(&self, other: &Interval) -> bool {
        if other.begin < self.begin || other.end > self.end {
            return false;
        }

        if other.begin == self.begin && !self.begin_included && other.begin_included {
            return false;
        }

        if other.end == self.end && !self.end_included && other.end_included {
            return false;
        }

        true
    }

    /// The shared sub-range, or `None` when the intervals are disjoint.
    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        let (begin, begin_included) = if self.begin > other.begin {
            (self.begin, self.begin_included)
        } else if other.begin > self.begin {
            (other.begin, other.begin_included)
        } else {
            (self.begin, self.begin_included && other.begin_included)
        };

        let (end, end_included) = if self.end < other.end {
            (self.end, self.end_included)
        } else if other.end < self.end {
            (other.end, other.end_included)
        } else {
            (self.end, self.end_included && other.end_included)
        };

        Interval::new(begin, end, begin_included, end_included).ok()
    }

    /// Left part of a split at `position`. The position must be a member of
    /// this interval.
    pub fn split_and_get_left(
        &self,
        position: f64,
        position_included: bool,
    ) -> Result<Interval, GeometryError> {
        self.check_split_position(position)?;
        Interval::new(self.begin, position, self.begin_included, position_included)
    }

    /// Right part of a split at `position`.
    pub fn split_and_get_right(
        &self,
        position: f64,
        position_included: bool,
    ) -> Result<Interval, GeometryError> {
        self.check_split_position(position)?;
        Interval::new(position, self.end, position_included, self.end_included)
    }

    fn check_split_position(&self, position: f64) -> Result<(), GeometryError> {
        if !self.is_point_included(position) {
            return Err(GeometryError::SplitPointNotCovered {
                point: position,
                dimension: 0,
            });
        }
        Ok(())
    }
}

fn format_bound(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value == MIN_VALUE {
        write!(f, "min")
    } else if value == MAX_VALUE {
        write!(f, "max")
    } else {
        write!(f, "{}", value)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", if self.begin_included { '[' } else { '(' })?;
        format_bound(f, self.begin)?;
        write!(f, ",")?;
        format_bound(f, self.end)?;
        write!(f, "{}", if self.end_included { ']' } else { ')' })
    }
}

fn parse_bound(value: &str) -> Result<f64, GeometryError> {
    match value.trim() {
        "min" => Ok(MIN_VALUE),
        "max" => Ok(MAX_VALUE),
        other => other
            .parse::<f64>()
            .map_err(|_| GeometryError::Parse(format!("unable to parse bound: {}", other))),
    }
}

impl FromStr for Interval {
    type Err = GeometryError;

    /// Parses `[low,high]`, `(low,high)`, `[low,high)` or `(low,high]`;
    /// `min` and `max` stand in for the unbounded sentinels.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let begin_included = match s.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => {
                return Err(GeometryError::Parse(format!(
                    "interval has to start with ( or [: {}",
                    s
                )));
            }
        };

        let end_included = match s.chars().last() {
            Some(']') if s.len() > 1 => true,
            Some(')') if s.len() > 1 => false,
            _ => {
                return Err(GeometryError::Parse(format!(
                    "interval has to end with ) or ]: {}",
                    s
                )));
            }
        };

        let inner = &s[1..s.len() - 1];
        let parts: Vec<&str> = inner.split(',').collect();

        if parts.len() != 2 {
            return Err(GeometryError::Parse(format!(
                "interval has to contain exactly one ',': {}",
                s
            )));
        }

        let begin = parse_bound(parts[0])?;
        let end = parse_bound(parts[1])?;

        Interval::new(begin, end, begin_included, end_included)
    }
}
