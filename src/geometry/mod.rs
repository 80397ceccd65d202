//! Geometry Module
//!
//! Interval and box algebra used for every routing and partitioning decision.
//!
//! ## Core Concepts
//! - **Interval**: a one-dimensional range whose endpoints are independently open or closed.
//! - **Hyperrectangle**: the product of one interval per dimension; `FULL_SPACE` (zero dimensions) overlaps everything.
//! - **Formats**: compact text (`[[0,1]:(2,3]]`, `[]` = full space) and big-endian binary pairs.

pub mod interval;
pub mod rectangle;

pub use interval::{Interval, MAX_VALUE, MIN_VALUE};
pub use rectangle::{FULL_SPACE, Hyperrectangle};

#[cfg(test)]
mod tests;
