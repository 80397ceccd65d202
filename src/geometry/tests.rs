//! Geometry Module Tests
//!
//! ## Test Scopes
//! - **Interval**: construction rules, membership, overlap, covering, intersection, splitting.
//! - **Hyperrectangle**: FULL_SPACE semantics, covering boxes, enlargement, codecs.

#[cfg(test)]
mod tests {
    use crate::error::GeometryError;
    use crate::geometry::{FULL_SPACE, Hyperrectangle, Interval, MAX_VALUE, MIN_VALUE};

    fn iv(begin: f64, end: f64, bi: bool, ei: bool) -> Interval {
        Interval::new(begin, end, bi, ei).unwrap()
    }

    fn rect(bounds: &[f64]) -> Hyperrectangle {
        Hyperrectangle::from_bounds(bounds).unwrap()
    }

    // ============================================================
    // INTERVAL TESTS
    // ============================================================

    #[test]
    fn test_interval_rejects_invalid_bounds() {
        assert!(Interval::new(2.0, 1.0, true, true).is_err());
        assert!(Interval::new(1.0, 1.0, true, false).is_err());
        assert!(Interval::new(1.0, 1.0, false, true).is_err());
        assert!(Interval::new(f64::NAN, 1.0, true, true).is_err());

        // Degenerate but closed is fine
        let point = Interval::new(1.0, 1.0, true, true).unwrap();
        assert_eq!(point.length(), 0.0);
    }

    #[test]
    fn test_interval_point_membership() {
        let closed = iv(1.0, 5.0, true, true);
        let open = iv(1.0, 5.0, false, false);

        assert!(closed.is_point_included(1.0));
        assert!(closed.is_point_included(5.0));
        assert!(!open.is_point_included(1.0));
        assert!(!open.is_point_included(5.0));
        assert!(open.is_point_included(3.0));
        assert!(!closed.is_point_included(0.0));

        // An excluded point never matches an endpoint
        assert!(!closed.overlaps(1.0, false));
        assert!(closed.overlaps(3.0, false));
    }

    #[test]
    fn test_interval_overlap_cases() {
        let base = iv(10.0, 20.0, true, true);

        let cases = vec![
            (iv(5.0, 15.0, true, true), true),   // left overlap
            (iv(15.0, 25.0, true, true), true),  // right overlap
            (iv(12.0, 18.0, true, true), true),  // nested inside
            (iv(0.0, 30.0, true, true), true),   // nesting
            (iv(10.0, 20.0, true, true), true),  // equal
            (iv(20.0, 30.0, true, true), true),  // adjacent, both closed
            (iv(20.0, 30.0, false, true), false), // adjacent, one open
            (iv(30.0, 40.0, true, true), false), // disjoint
        ];

        for (other, expected) in cases {
            assert_eq!(base.is_overlapping_with(&other), expected, "{} vs {}", base, other);
            // Symmetry
            assert_eq!(other.is_overlapping_with(&base), expected, "{} vs {}", other, base);
        }
    }

    #[test]
    fn test_interval_overlap_with_shared_open_endpoints() {
        let a = iv(0.0, 5.0, false, false);
        let b = iv(0.0, 5.0, true, true);

        assert!(a.is_overlapping_with(&a));
        assert!(a.is_overlapping_with(&b));
        assert!(b.is_overlapping_with(&a));
    }

    #[test]
    fn test_interval_covering() {
        let closed = iv(0.0, 10.0, true, true);
        let open = iv(0.0, 10.0, false, false);
        let inner = iv(2.0, 8.0, true, true);

        assert!(closed.is_covering(&closed));
        assert!(open.is_covering(&open));
        assert!(closed.is_covering(&open));
        assert!(!open.is_covering(&closed));
        assert!(closed.is_covering(&inner));
        assert!(!inner.is_covering(&closed));

        // Mutual covering of closed intervals implies equality
        let other = iv(0.0, 10.0, true, true);
        assert!(closed.is_covering(&other) && other.is_covering(&closed));
        assert_eq!(closed, other);
    }

    #[test]
    fn test_interval_intersection() {
        let a = iv(0.0, 10.0, true, false);
        let b = iv(5.0, 15.0, false, true);

        assert_eq!(a.intersection(&b), Some(iv(5.0, 10.0, false, false)));
        assert_eq!(a.intersection(&a), Some(a));

        let nested = iv(2.0, 3.0, true, true);
        assert_eq!(a.intersection(&nested), Some(nested));
        assert_eq!(nested.intersection(&a), Some(nested));

        let touching = iv(10.0, 20.0, true, true);
        assert_eq!(a.intersection(&touching), None);

        let closed_touch = iv(0.0, 10.0, true, true);
        assert_eq!(closed_touch.intersection(&touching), Some(iv(10.0, 10.0, true, true)));

        assert_eq!(a.intersection(&iv(50.0, 60.0, true, true)), None);
    }

    #[test]
    fn test_interval_split() {
        let interval = iv(0.0, 10.0, true, true);

        let left = interval.split_and_get_left(4.0, true).unwrap();
        let right = interval.split_and_get_right(4.0, false).unwrap();

        assert_eq!(left, iv(0.0, 4.0, true, true));
        assert_eq!(right, iv(4.0, 10.0, false, true));
        assert!(!left.is_overlapping_with(&right));

        assert!(matches!(
            interval.split_and_get_left(11.0, true),
            Err(GeometryError::SplitPointNotCovered { .. })
        ));
    }

    #[test]
    fn test_interval_text_format() {
        let interval = iv(1.5, 2.0, false, true);
        assert_eq!(interval.to_string(), "(1.5,2]");
        assert_eq!("(1.5,2]".parse::<Interval>().unwrap(), interval);

        let unbounded = Interval::unbounded();
        assert_eq!(unbounded.to_string(), "[min,max]");
        let parsed: Interval = "[min,max]".parse().unwrap();
        assert_eq!(parsed.begin(), MIN_VALUE);
        assert_eq!(parsed.end(), MAX_VALUE);

        assert!("1,2]".parse::<Interval>().is_err());
        assert!("[1,2".parse::<Interval>().is_err());
        assert!("[1,2,3]".parse::<Interval>().is_err());
        assert!("[abc,2]".parse::<Interval>().is_err());
        assert!("[3,2]".parse::<Interval>().is_err());
    }

    // ============================================================
    // HYPERRECTANGLE TESTS
    // ============================================================

    #[test]
    fn test_full_space_semantics() {
        let r = rect(&[0.0, 1.0, 0.0, 1.0]);

        assert_eq!(FULL_SPACE.dimension(), 0);
        assert!(FULL_SPACE.intersects(&r));
        assert!(r.intersects(&FULL_SPACE));
        assert!(r.is_covering(&FULL_SPACE).unwrap());
        assert_eq!(r.intersection(&FULL_SPACE).unwrap(), Some(FULL_SPACE));
        assert_eq!(
            Hyperrectangle::covering_box_of(&FULL_SPACE, &r).unwrap(),
            r
        );
    }

    #[test]
    fn test_intersects_and_intersection() {
        let a = rect(&[0.0, 10.0, 0.0, 10.0]);
        let b = rect(&[5.0, 15.0, 5.0, 15.0]);
        let c = rect(&[20.0, 30.0, 0.0, 10.0]);
        let one_dim = rect(&[0.0, 10.0]);

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(!a.intersects(&one_dim));

        assert_eq!(a.intersection(&b).unwrap(), Some(rect(&[5.0, 10.0, 5.0, 10.0])));
        assert_eq!(a.intersection(&c).unwrap(), None);
        assert!(matches!(
            a.intersection(&one_dim),
            Err(GeometryError::DimensionMismatch { left: 2, right: 1 })
        ));
    }

    #[test]
    fn test_rectangle_round_trip() {
        let closed = rect(&[1.0, 2.0]);
        let mixed = Hyperrectangle::from_intervals(&[
            iv(0.0, 1.5, false, true),
            iv(-3.0, 4.0, true, false),
            Interval::unbounded(),
        ]);

        for r in [FULL_SPACE, closed, mixed] {
            let text = r.to_string();
            let parsed: Hyperrectangle = text.parse().unwrap();
            assert_eq!(parsed, r, "round trip of {}", text);
        }

        assert_eq!(FULL_SPACE.to_string(), "[]");
        assert_eq!(rect(&[1.0, 2.0, 3.0, 4.0]).to_string(), "[[1,2]:[3,4]]");
    }

    #[test]
    fn test_rectangle_parse_errors() {
        assert!("[1,2]:[3,4]]".parse::<Hyperrectangle>().is_err());
        assert!("[[1,2]:[3,4]".parse::<Hyperrectangle>().is_err());
        assert!("[abc]".parse::<Hyperrectangle>().is_err());
        assert!("[[2,1]]".parse::<Hyperrectangle>().is_err());
    }

    #[test]
    fn test_covering_box() {
        let r = Hyperrectangle::from_intervals(&[iv(0.0, 1.0, false, true), iv(2.0, 3.0, true, false)]);

        assert_eq!(Hyperrectangle::covering_box(&[r.clone()]).unwrap(), r);
        assert_eq!(Hyperrectangle::covering_box(&[]).unwrap(), FULL_SPACE);
        assert_eq!(
            Hyperrectangle::covering_box(&[FULL_SPACE, FULL_SPACE]).unwrap(),
            FULL_SPACE
        );

        let a = rect(&[0.0, 1.0, 5.0, 6.0]);
        let b = rect(&[2.0, 3.0, -1.0, 0.0]);
        let covering = Hyperrectangle::covering_box(&[a, FULL_SPACE, b]).unwrap();
        assert_eq!(covering, rect(&[0.0, 3.0, -1.0, 6.0]));

        assert!(Hyperrectangle::covering_box(&[rect(&[0.0, 1.0]), rect(&[0.0, 1.0, 0.0, 1.0])]).is_err());
    }

    #[test]
    fn test_split_duality() {
        let r = Hyperrectangle::from_intervals(&[iv(0.0, 100.0, true, false), iv(0.0, 10.0, true, true)]);

        for d in 0..r.dimension() {
            let p = r.interval(d).unwrap().midpoint();
            let left = r.split_and_get_left(p, d, true).unwrap();
            let right = r.split_and_get_right(p, d, false).unwrap();

            assert!(!left.intersects(&right));

            let covering = Hyperrectangle::covering_box(&[left, right]).unwrap();
            assert_eq!(covering.interval(d).unwrap(), r.interval(d).unwrap());
            assert_eq!(covering, r);
        }

        assert!(r.split_and_get_left(200.0, 0, true).is_err());
        assert!(r.split_and_get_left(5.0, 2, true).is_err());
    }

    #[test]
    fn test_enlargement() {
        let r = rect(&[0.0, 2.0, 0.0, 2.0]);

        assert_eq!(r.volume(), 4.0);
        assert_eq!(r.calculate_enlargement(&rect(&[0.5, 1.0, 0.5, 1.0])).unwrap(), 0.0);
        assert_eq!(r.calculate_enlargement(&rect(&[0.0, 4.0, 0.0, 2.0])).unwrap(), 4.0);

        assert_eq!(r.enlarge_by_factor(2.0).unwrap(), rect(&[-1.0, 3.0, -1.0, 3.0]));
        assert_eq!(r.enlarge_by_amount(1.0).unwrap(), rect(&[-1.0, 3.0, -1.0, 3.0]));
        assert_eq!(r.add_padding(&[0.0, 1.0]).unwrap(), rect(&[0.0, 2.0, -1.0, 3.0]));
        assert!(r.add_padding(&[1.0]).is_err());
    }

    #[test]
    fn test_enlarge_by_meters() {
        let r = rect(&[40.0, 40.0, 10.0, 10.0]);
        let enlarged = r.enlarge_by_meters(1000.0, 1000.0).unwrap();

        assert!(enlarged.is_covering(&r).unwrap());
        assert!(enlarged.extent(0) > 0.0 && enlarged.extent(0) < 0.1);
        // A degree of longitude is shorter than a degree of latitude at 40°N
        assert!(enlarged.extent(1) > enlarged.extent(0));

        assert!(rect(&[0.0, 1.0]).enlarge_by_meters(1.0, 1.0).is_err());
    }

    #[test]
    fn test_scale_volume_by_percentage() {
        let r = rect(&[0.0, 10.0, 0.0, 10.0]);
        let scaled = r.scale_volume_by_percentage(0.25).unwrap();

        assert!((scaled.volume() - 25.0).abs() < 1e-9);
        assert!(FULL_SPACE.scale_volume_by_percentage(0.5).is_none());
        assert!(
            Hyperrectangle::full_covering(2)
                .unwrap()
                .scale_volume_by_percentage(0.5)
                .is_none()
        );
    }

    #[test]
    fn test_covers_at_least_one_dimension() {
        let r = rect(&[0.0, 10.0, 0.0, 10.0]);

        assert!(r.covers_at_least_one_dimension_complete(&rect(&[2.0, 3.0, 50.0, 60.0])).unwrap());
        assert!(!r.covers_at_least_one_dimension_complete(&rect(&[20.0, 30.0, 50.0, 60.0])).unwrap());
    }

    #[test]
    fn test_ordering_by_low_corner() {
        use std::cmp::Ordering;

        let a = rect(&[0.0, 1.0, 5.0, 6.0]);
        let b = rect(&[0.0, 9.0, 7.0, 8.0]);
        let one_dim = rect(&[100.0, 200.0]);

        assert_eq!(a.cmp_by_low_corner(&b), Ordering::Less);
        assert_eq!(b.cmp_by_low_corner(&a), Ordering::Greater);
        assert_eq!(one_dim.cmp_by_low_corner(&a), Ordering::Less);
        assert_eq!(a.cmp_by_low_corner(&a), Ordering::Equal);
    }

    #[test]
    fn test_binary_format() {
        let r = rect(&[1.0, 2.0, -3.5, 4.25]);
        let bytes = r.to_bytes();

        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..8], &1.0f64.to_be_bytes());
        assert_eq!(Hyperrectangle::from_bytes(&bytes).unwrap(), r);
        assert_eq!(Hyperrectangle::from_bytes(&[]).unwrap(), FULL_SPACE);
        assert!(Hyperrectangle::from_bytes(&bytes[..12]).is_err());

        let mixed = Hyperrectangle::from_intervals(&[iv(0.0, 1.0, false, true)]);
        let rich = mixed.to_bytes_with_inclusion();
        assert_eq!(Hyperrectangle::from_bytes_with_inclusion(&rich).unwrap(), mixed);
    }

    #[test]
    fn test_full_covering() {
        let full = Hyperrectangle::full_covering(3).unwrap();

        assert_eq!(full.dimension(), 3);
        assert!(full.is_covering(&rect(&[0.0, 1.0, 0.0, 1.0, 0.0, 1.0])).unwrap());
        assert!(Hyperrectangle::full_covering(0).is_err());
    }
}
