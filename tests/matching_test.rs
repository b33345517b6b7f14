use bitarray::{BitArray, Hamming};
use incremental_sfm::matching::{Descriptor, ViewFeatures, match_views};
use space::Metric;

/// Descriptor with the first `n` bits set.
fn descriptor_with_bits(n: usize) -> Descriptor {
    let mut d = BitArray::zeros();
    let bytes = d.bytes_mut();
    for i in 0..n {
        bytes[i / 8] |= 1 << (i % 8);
    }
    d
}

fn view(descriptors: Vec<Descriptor>) -> ViewFeatures {
    let keypoints = (0..descriptors.len())
        .map(|i| glam::Vec2::new(i as f32 * 10.0, i as f32 * 5.0))
        .collect();
    ViewFeatures {
        keypoints,
        descriptors,
    }
}

#[test]
fn test_clear_winner_is_matched() {
    let a = view(vec![descriptor_with_bits(0)]);
    let b = view(vec![descriptor_with_bits(0), descriptor_with_bits(100)]);

    let matches = match_views(&a, &b, 0.7);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches.ids_a, vec![0]);
    assert_eq!(matches.ids_b, vec![0]);
    assert_eq!(matches.points_a[0], a.keypoints[0]);
    assert_eq!(matches.points_b[0], b.keypoints[0]);
}

#[test]
fn test_ambiguous_pair_is_rejected() {
    // Both candidates sit at hamming distance 1, so the ratio test fails.
    let a = view(vec![descriptor_with_bits(50)]);
    let b = view(vec![descriptor_with_bits(49), descriptor_with_bits(51)]);

    let matches = match_views(&a, &b, 0.7);
    assert!(matches.is_empty());
}

#[test]
fn test_every_match_satisfies_the_ratio() {
    let a = view((0..10).map(|i| descriptor_with_bits(i * 13)).collect());
    let b = view((0..12).map(|j| descriptor_with_bits(j * 11 + 3)).collect());

    let ratio = 0.7f32;
    let matches = match_views(&a, &b, ratio);
    for i in 0..matches.len() {
        let qa = &a.descriptors[matches.ids_a[i] as usize];
        let mut dists: Vec<u64> = b
            .descriptors
            .iter()
            .map(|qb| Hamming.distance(qa, qb) as u64)
            .collect();
        let best_to_matched = Hamming.distance(qa, &b.descriptors[matches.ids_b[i] as usize]) as u64;
        dists.sort_unstable();
        // The returned pairing is the nearest neighbor and beats the
        // second-nearest by the ratio margin.
        assert_eq!(best_to_matched, dists[0]);
        assert!((dists[0] as f32) < ratio * dists[1] as f32);
    }
}

#[test]
fn test_too_few_candidates_gives_no_matches() {
    let a = view(vec![descriptor_with_bits(4), descriptor_with_bits(16)]);
    let lonely = view(vec![descriptor_with_bits(4)]);
    assert!(match_views(&a, &lonely, 0.7).is_empty());

    let empty = view(Vec::new());
    assert!(match_views(&empty, &a, 0.7).is_empty());
}
