use incremental_sfm::tracking::link_tracks;

#[test]
fn test_shared_ids_are_linked() {
    let carried = vec![10, 11, 12, 13];
    let new = vec![12, 99, 10, 98];
    let part = link_tracks(&carried, &new);

    assert_eq!(part.carried_known, vec![0, 2]);
    assert_eq!(part.new_known, vec![2, 0]);
    assert_eq!(part.new_novel, vec![1, 3]);
    // Paired slots point at the same keypoint id.
    for (&ci, &ni) in part.carried_known.iter().zip(part.new_known.iter()) {
        assert_eq!(carried[ci], new[ni]);
    }
}

#[test]
fn test_partition_covers_new_pair_exactly() {
    let carried: Vec<u32> = (0..50).map(|i| i * 3).collect();
    let new: Vec<u32> = (0..80).map(|i| i * 2 + 1).collect();
    let part = link_tracks(&carried, &new);

    let mut seen = vec![false; new.len()];
    for &ni in part.new_known.iter().chain(part.new_novel.iter()) {
        assert!(!seen[ni], "index {} appears twice", ni);
        seen[ni] = true;
    }
    assert!(seen.iter().all(|&s| s));
    assert_eq!(part.carried_known.len(), part.new_known.len());
}

#[test]
fn test_duplicate_carried_id_claims_once() {
    // Two carried entries share keypoint 7; only the first may claim it.
    let carried = vec![7, 7, 5];
    let new = vec![5, 7];
    let part = link_tracks(&carried, &new);

    assert_eq!(part.carried_known, vec![0, 2]);
    assert_eq!(part.new_known, vec![1, 0]);
    assert!(part.new_novel.is_empty());
}

#[test]
fn test_no_overlap_is_all_novel() {
    let part = link_tracks(&[1, 2, 3], &[4, 5, 6]);
    assert!(part.carried_known.is_empty());
    assert!(part.new_known.is_empty());
    assert_eq!(part.new_novel, vec![0, 1, 2]);
}

#[test]
fn test_empty_inputs() {
    let part = link_tracks(&[], &[]);
    assert!(part.carried_known.is_empty());
    assert!(part.new_known.is_empty());
    assert!(part.new_novel.is_empty());

    let part = link_tracks(&[], &[3, 4]);
    assert_eq!(part.new_novel, vec![0, 1]);
}
