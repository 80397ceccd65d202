//! Distribution Module Tests
//!
//! ## Test Scopes
//! - **Partition tree**: split and merge rules, dimension cycling, the leaves partitioning the space.
//! - **Space partitioner**: region lifecycle, change events, group versions, the local region index.
//! - **Helpers**: region lookup, utilization and outdated replica detection against the coordination service.

#[cfg(test)]
mod tests {
    use crate::distribution::coordination::group_path;
    use crate::distribution::helper::{find_region, outdated_regions, system_utilization};
    use crate::distribution::region::ROOT_REGION_ID;
    use crate::distribution::types::Traversal;
    use crate::distribution::{
        CoordinationService, InMemoryCoordinator, InstanceId, InstanceState, PartitionTree,
        RegionEvent, RegionIndex, RegionNode, RegionState, SpacePartitioner,
    };
    use crate::error::DistributionError;
    use crate::geometry::{FULL_SPACE, Hyperrectangle};
    use crate::storage::types::TupleStoreName;

    use parking_lot::Mutex;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::sync::Arc;
    use std::time::Duration;

    fn rect(bounds: &[f64]) -> Hyperrectangle {
        Hyperrectangle::from_bounds(bounds).unwrap()
    }

    fn node(name: &str) -> InstanceId {
        InstanceId::new(name)
    }

    fn tree_2d() -> PartitionTree {
        PartitionTree::new("geo", 2, vec![node("a")]).unwrap()
    }

    fn partitioner_with(
        replicas: Vec<InstanceId>,
        local: InstanceId,
        coordinator: Arc<InMemoryCoordinator>,
    ) -> Arc<SpacePartitioner> {
        SpacePartitioner::new("geo", 2, replicas, local, coordinator).unwrap()
    }

    fn split_root(partitioner: &SpacePartitioner) {
        partitioner.split_region(ROOT_REGION_ID, 50.0).unwrap();
        partitioner.complete_split(ROOT_REGION_ID).unwrap();
    }

    // ============================================================
    // PARTITION TREE TESTS
    // ============================================================

    #[test]
    fn test_new_tree_has_full_root() {
        let tree = tree_2d();
        let root = tree.root().unwrap();

        assert_eq!(root.region_id, ROOT_REGION_ID);
        assert_eq!(root.state, RegionState::Creating);
        assert!(root.is_leaf());
        assert_eq!(root.rectangle.dimension(), 2);
        assert_eq!(root.identifier("geo"), "geo_0");
        assert_eq!(tree.highest_region_id(), 0);

        assert!(PartitionTree::new("geo", 0, vec![]).is_err());
    }

    #[test]
    fn test_split_left_child_includes_split_point() {
        let mut tree = tree_2d();

        let (left, right) = tree.split(ROOT_REGION_ID, 50.0).unwrap();
        assert_eq!((left, right), (1, 2));

        let left = tree.region(1).unwrap();
        let right = tree.region(2).unwrap();

        assert_eq!(left.rectangle.high(0), 50.0);
        assert!(left.rectangle.is_high_included(0));
        assert_eq!(right.rectangle.low(0), 50.0);
        assert!(!right.rectangle.is_low_included(0));

        // Children inherit the replicas and start out invisible
        assert_eq!(left.replicas, vec![node("a")]);
        assert_eq!(left.state, RegionState::Creating);
        assert_eq!(tree.region(0).unwrap().state, RegionState::Splitting);
        assert_eq!(tree.region(0).unwrap().split_position, Some(50.0));
        assert_eq!(tree.parent(2).unwrap().region_id, 0);
    }

    #[test]
    fn test_split_cycles_dimensions() {
        let mut tree = tree_2d();

        assert_eq!(tree.split_dimension(0).unwrap(), 0);
        tree.split(0, 50.0).unwrap();

        assert_eq!(tree.split_dimension(1).unwrap(), 1);
        let (low, high) = tree.split(1, 30.0).unwrap();
        assert_eq!((low, high), (3, 4));

        let low = tree.region(3).unwrap();
        assert_eq!(low.rectangle.high(1), 30.0);
        assert_eq!(low.rectangle.high(0), 50.0);
        assert_eq!(low.depth, 2);

        // Depth 2 wraps around to the first dimension
        assert_eq!(tree.split_dimension(3).unwrap(), 0);
    }

    #[test]
    fn test_split_requires_leaf() {
        let mut tree = tree_2d();
        tree.split(0, 50.0).unwrap();

        assert!(matches!(tree.split(0, 10.0), Err(DistributionError::NotALeaf(0))));
        assert!(matches!(tree.split(42, 10.0), Err(DistributionError::UnknownRegion(42))));
    }

    #[test]
    fn test_leaves_partition_the_space() {
        let mut tree = tree_2d();
        tree.split(0, 50.0).unwrap();
        tree.split(1, 30.0).unwrap();
        tree.split(2, 70.0).unwrap();
        tree.split(3, 10.0).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let mut points: Vec<(f64, f64)> = (0..500)
            .map(|_| (rng.gen_range(-100.0..200.0), rng.gen_range(-100.0..200.0)))
            .collect();

        // Split points themselves belong to exactly one side
        points.extend([(50.0, 30.0), (50.0, 70.0), (10.0, 30.0), (50.0, 0.0)]);

        let leaves = tree.leaves();
        assert_eq!(leaves.len(), 5);

        for (x, y) in points {
            let p = rect(&[x, x, y, y]);
            let owners = leaves.iter().filter(|l| l.rectangle.intersects(&p)).count();
            assert_eq!(owners, 1, "point ({}, {}) owned by {} leaves", x, y, owners);
        }
    }

    #[test]
    fn test_merge_restores_leaf_without_reusing_ids() {
        let mut tree = tree_2d();
        tree.split(0, 50.0).unwrap();

        let removed = tree.merge(0).unwrap();
        assert_eq!(removed, vec![1, 2]);

        let root = tree.root().unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.state, RegionState::Active);
        assert_eq!(root.split_position, None);
        assert!(tree.region(1).is_none());

        assert_eq!(tree.split(0, 20.0).unwrap(), (3, 4));
    }

    #[test]
    fn test_merge_rules() {
        let mut tree = tree_2d();
        assert!(matches!(tree.merge(0), Err(DistributionError::NoChildren(0))));

        tree.split(0, 50.0).unwrap();
        tree.split(1, 30.0).unwrap();

        // Children have to be leaves
        assert!(matches!(
            tree.merge(0),
            Err(DistributionError::InvalidState { region: 0, .. })
        ));
        assert_eq!(tree.merge(1).unwrap(), vec![3, 4]);
        assert_eq!(tree.merge(0).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_traverse_is_pre_order_and_stoppable() {
        let mut tree = tree_2d();
        tree.split(0, 50.0).unwrap();
        tree.split(1, 30.0).unwrap();

        let ids: Vec<i64> = tree.all_regions().iter().map(|n| n.region_id).collect();
        assert_eq!(ids, vec![0, 1, 3, 4, 2]);

        let mut visited = Vec::new();
        tree.traverse(|node| {
            visited.push(node.region_id);
            if node.region_id == 3 {
                Traversal::Stop
            } else {
                Traversal::Continue
            }
        });
        assert_eq!(visited, vec![0, 1, 3]);

        // Visited nodes borrow from the tree, not from the walk
        let mut collected: Vec<&RegionNode> = Vec::new();
        tree.traverse(|node| {
            if node.is_leaf() {
                collected.push(node);
            }
            Traversal::Continue
        });
        let leaf_ids: Vec<i64> = collected.iter().map(|n| n.region_id).collect();
        assert_eq!(leaf_ids, vec![3, 4, 2]);
    }

    #[test]
    fn test_regions_for_box_prunes_and_filters() {
        let mut tree = PartitionTree::new("geo", 2, vec![node("a"), node("b")]).unwrap();
        tree.split(0, 50.0).unwrap();
        tree.set_state(1, RegionState::Active).unwrap();
        tree.set_state(2, RegionState::Active).unwrap();
        tree.set_state(0, RegionState::Split).unwrap();

        let all = tree.regions_for_box(&FULL_SPACE, |s| s.is_readable());
        assert_eq!(all.get(&node("a")), Some(&vec![1, 2]));
        assert_eq!(all.get(&node("b")), Some(&vec![1, 2]));

        let left = tree.regions_for_box(&rect(&[0.0, 40.0, 0.0, 10.0]), |s| s.is_writable());
        assert_eq!(left.get(&node("a")), Some(&vec![1]));

        let nothing = tree.regions_for_box(&FULL_SPACE, |s| s == RegionState::Merging);
        assert!(nothing.is_empty());
    }

    // ============================================================
    // REGION STATE & COORDINATION TESTS
    // ============================================================

    #[test]
    fn test_region_state_read_write_sets() {
        assert!(RegionState::Active.is_writable());
        assert!(RegionState::ActiveFull.is_writable());
        assert!(RegionState::Splitting.is_readable());
        assert!(!RegionState::Splitting.is_writable());
        assert!(RegionState::Merging.is_readable());
        assert!(!RegionState::Split.is_readable());
        assert!(!RegionState::Creating.is_readable());

        for state in [RegionState::ActiveFull, RegionState::RedistributionActive, RegionState::Split] {
            assert_eq!(state.as_str().parse::<RegionState>().unwrap(), state);
        }
        assert!("bogus".parse::<RegionState>().is_err());
    }

    #[test]
    fn test_in_memory_coordinator() {
        let coordinator = InMemoryCoordinator::new();

        assert!(coordinator.get_version("/groups/none").is_err());

        coordinator.set_state("/groups/geo", "x").unwrap();
        coordinator.set_state("/groups/geo", "y").unwrap();
        assert_eq!(coordinator.get_version("/groups/geo").unwrap(), 2);
        assert_eq!(coordinator.get_state("/groups/geo").unwrap().as_deref(), Some("y"));

        let a = node("a");
        assert_eq!(coordinator.get_checkpoint("geo", 0, &a).unwrap(), None);
        coordinator.set_checkpoint("geo", 0, &a, 17).unwrap();
        assert_eq!(coordinator.get_checkpoint("geo", 0, &a).unwrap(), Some(17));

        assert_eq!(coordinator.instance_state(&a).unwrap(), InstanceState::Unknown);
        coordinator.set_instance_state(&a, InstanceState::Ready).unwrap();
        assert_eq!(coordinator.instance_state(&a).unwrap(), InstanceState::Ready);
    }

    // ============================================================
    // SPACE PARTITIONER TESTS
    // ============================================================

    #[test]
    fn test_partitioner_split_lifecycle() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let partitioner = partitioner_with(vec![node("a")], node("a"), coordinator.clone());

        assert_eq!(partitioner.region(0).unwrap().state, RegionState::Active);
        let version = coordinator.get_version(&group_path("geo")).unwrap();

        partitioner.split_region(0, 50.0).unwrap();
        assert!(coordinator.get_version(&group_path("geo")).unwrap() > version);

        // Children are not served until the split completes
        assert_eq!(partitioner.region_index().all_region_ids(), vec![0]);
        assert!(partitioner.local_write_regions(&FULL_SPACE).is_empty());

        partitioner.complete_split(0).unwrap();
        assert_eq!(partitioner.region(0).unwrap().state, RegionState::Split);
        assert_eq!(partitioner.region(1).unwrap().state, RegionState::Active);
        assert_eq!(partitioner.region_index().all_region_ids(), vec![1, 2]);
        assert_eq!(partitioner.local_write_regions(&FULL_SPACE), vec![1, 2]);

        assert!(matches!(
            partitioner.complete_split(0),
            Err(DistributionError::InvalidState { region: 0, .. })
        ));
    }

    #[test]
    fn test_partitioner_merge_lifecycle() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let partitioner = partitioner_with(vec![node("a")], node("a"), coordinator);
        split_root(&partitioner);

        partitioner.prepare_merge(0).unwrap();
        assert_eq!(partitioner.region(0).unwrap().state, RegionState::Merging);
        assert_eq!(partitioner.region_index().all_region_ids(), vec![0, 1, 2]);

        assert_eq!(partitioner.merge_region(0).unwrap(), vec![1, 2]);
        assert_eq!(partitioner.region_index().all_region_ids(), vec![0]);
        assert_eq!(partitioner.local_write_regions(&FULL_SPACE), vec![0]);

        assert!(matches!(partitioner.prepare_merge(0), Err(DistributionError::NoChildren(0))));
    }

    #[test]
    fn test_partitioner_emits_events() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let partitioner = partitioner_with(vec![node("a")], node("a"), coordinator);

        let events = Arc::new(Mutex::new(Vec::<RegionEvent>::new()));
        let events_clone = events.clone();
        let id = partitioner.register_callback(Arc::new(move |event: &RegionEvent| {
            events_clone.lock().push(event.clone());
        }));

        partitioner.split_region(0, 50.0).unwrap();
        assert_eq!(
            *events.lock(),
            vec![
                RegionEvent::Changed {
                    region_id: 0,
                    state: RegionState::Splitting
                },
                RegionEvent::Added { region_id: 1 },
                RegionEvent::Added { region_id: 2 },
            ]
        );

        events.lock().clear();
        partitioner.complete_split(0).unwrap();
        assert_eq!(
            events.lock().last(),
            Some(&RegionEvent::Changed {
                region_id: 0,
                state: RegionState::Split
            })
        );

        assert!(partitioner.unregister_callback(id));
        assert!(!partitioner.unregister_callback(id));

        events.lock().clear();
        partitioner.set_region_state(1, RegionState::ActiveFull).unwrap();
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_partitioner_only_indexes_local_regions() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let partitioner = partitioner_with(vec![node("b")], node("a"), coordinator);

        assert!(partitioner.region_index().is_empty());
        assert!(partitioner.local_write_regions(&FULL_SPACE).is_empty());

        let remote = partitioner.regions_for_box(&FULL_SPACE, |s| s.is_writable());
        assert_eq!(remote.get(&node("b")), Some(&vec![0]));
    }

    #[test]
    fn test_full_region_still_accepts_writes() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let partitioner = partitioner_with(vec![node("a")], node("a"), coordinator);

        partitioner.set_region_state(0, RegionState::ActiveFull).unwrap();
        assert_eq!(partitioner.local_write_regions(&rect(&[0.0, 1.0, 0.0, 1.0])), vec![0]);

        assert!(partitioner.set_region_state(9, RegionState::Active).is_err());
    }

    // ============================================================
    // REGION INDEX TESTS
    // ============================================================

    #[test]
    fn test_region_index_mappings() {
        let index = RegionIndex::new();

        assert!(index.add_mapping(2, rect(&[50.0, 100.0, 0.0, 100.0])));
        assert!(index.add_mapping(1, rect(&[0.0, 50.0, 0.0, 100.0])));
        assert!(!index.add_mapping(1, rect(&[0.0, 1.0, 0.0, 1.0])), "duplicate mapping");

        assert_eq!(index.region_ids_for(&rect(&[40.0, 60.0, 0.0, 1.0])), vec![1, 2]);
        assert_eq!(index.region_ids_for(&rect(&[70.0, 80.0, 0.0, 1.0])), vec![2]);
        assert_eq!(index.region_ids_for(&FULL_SPACE), vec![1, 2]);
        assert_eq!(index.rectangle_of(1), Some(rect(&[0.0, 50.0, 0.0, 100.0])));

        assert!(index.remove_mapping(2));
        assert!(!index.remove_mapping(2));
        assert_eq!(index.len(), 1);

        index.clear();
        assert!(index.is_empty());
    }

    #[test]
    fn test_region_index_local_tables() {
        let index = RegionIndex::new();
        index.replace_all(vec![
            (1, rect(&[0.0, 50.0, 0.0, 100.0])),
            (2, rect(&[50.0, 100.0, 0.0, 100.0])),
        ]);

        let table = TupleStoreName::new("geo", "points", None).unwrap();
        let names = index.local_tables_for_region(&rect(&[10.0, 20.0, 10.0, 20.0]), &table, 0);
        assert_eq!(names, vec![table.clone_with_region_id(1)]);

        let outside = index.local_tables_for_region(&rect(&[500.0, 600.0, 0.0, 1.0]), &table, 0);
        assert!(outside.is_empty());
    }

    #[test]
    fn test_region_index_waits_for_changes() {
        let index = Arc::new(RegionIndex::new());

        let writer = index.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.add_mapping(5, rect(&[0.0, 1.0]));
        });

        assert!(index.wait_until_mapping_appears(5, Duration::from_secs(5)));
        handle.join().unwrap();

        assert!(!index.wait_until_mapping_disappears(5, Duration::from_millis(20)));
        index.remove_mapping(5);
        assert!(index.wait_until_mapping_disappears(5, Duration::from_millis(20)));
    }

    // ============================================================
    // HELPER TESTS
    // ============================================================

    #[test]
    fn test_find_region() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let partitioner = partitioner_with(vec![node("a")], node("a"), coordinator);

        assert_eq!(find_region(&partitioner, 0, 0).unwrap().region_id, 0);
        assert!(matches!(
            find_region(&partitioner, 7, 0),
            Err(DistributionError::UnknownRegion(7))
        ));
    }

    #[test]
    fn test_system_utilization_counts_replicas() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let shared = partitioner_with(vec![node("a"), node("b")], node("a"), coordinator.clone());
        split_root(&shared);

        let single = SpacePartitioner::new("roads", 1, vec![node("a")], node("a"), coordinator).unwrap();

        let utilization = system_utilization(&[shared, single]);
        assert_eq!(utilization.get(&node("a")), Some(&4));
        assert_eq!(utilization.get(&node("b")), Some(&3));
    }

    #[test]
    fn test_outdated_regions_picks_newest_peer() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let partitioner = partitioner_with(
            vec![node("a"), node("b"), node("c")],
            node("a"),
            coordinator.clone(),
        );

        coordinator.set_checkpoint("geo", 0, &node("a"), 100).unwrap();
        coordinator.set_checkpoint("geo", 0, &node("b"), 150).unwrap();
        coordinator.set_checkpoint("geo", 0, &node("c"), 200).unwrap();

        let outdated = outdated_regions(&partitioner, &node("a"), 5).unwrap();
        assert_eq!(outdated.len(), 1);
        assert_eq!(outdated[0].region_id, 0);
        assert_eq!(outdated[0].newest_instance, node("c"));
        assert_eq!(outdated[0].newest_version, 200);
        assert_eq!(outdated[0].local_version, 100);
    }

    #[test]
    fn test_outdated_regions_tolerance() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let partitioner =
            partitioner_with(vec![node("a"), node("b")], node("a"), coordinator.clone());

        coordinator.set_checkpoint("geo", 0, &node("b"), 100).unwrap();

        // Never flushed locally: counts as 0
        assert_eq!(outdated_regions(&partitioner, &node("a"), 5).unwrap().len(), 1);

        coordinator.set_checkpoint("geo", 0, &node("a"), 96).unwrap();
        assert!(outdated_regions(&partitioner, &node("a"), 5).unwrap().is_empty());

        coordinator.set_checkpoint("geo", 0, &node("a"), 94).unwrap();
        assert_eq!(outdated_regions(&partitioner, &node("a"), 5).unwrap().len(), 1);
    }

    #[test]
    fn test_outdated_regions_ignores_foreign_and_unflushed() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let partitioner =
            partitioner_with(vec![node("a"), node("b")], node("a"), coordinator.clone());

        // No peer ever flushed
        assert!(outdated_regions(&partitioner, &node("a"), 0).unwrap().is_empty());

        // Not a replica of the region at all
        coordinator.set_checkpoint("geo", 0, &node("b"), 100).unwrap();
        assert!(outdated_regions(&partitioner, &node("z"), 0).unwrap().is_empty());
    }
}
