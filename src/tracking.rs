use std::collections::HashMap;

/// Partition of a new view pair's matches by track continuity with the
/// pair before it. `carried_known[k]` and `new_known[k]` index the same
/// physical track in the carried and new pair respectively; `new_novel`
/// is the exact complement of `new_known` within the new pair.
#[derive(Debug, Default)]
pub struct TrackPartition {
    pub carried_known: Vec<usize>,
    pub new_known: Vec<usize>,
    pub new_novel: Vec<usize>,
}

/// Links tracks across two consecutive pairs through their shared view.
///
/// `carried_ids` are the shared view's keypoint ids as the carried pair
/// recorded them (its second view); `new_ids` are the same view's ids as
/// the new pair recorded them (its first view). A new entry whose keypoint
/// was matched in the carried pair continues that track; the rest are novel.
/// Each new entry is claimed at most once, so the two output index sets
/// partition the new pair exactly.
pub fn link_tracks(carried_ids: &[u32], new_ids: &[u32]) -> TrackPartition {
    let mut first_new_index: HashMap<u32, usize> = HashMap::with_capacity(new_ids.len());
    for (i, id) in new_ids.iter().enumerate() {
        first_new_index.entry(*id).or_insert(i);
    }

    let mut part = TrackPartition::default();
    let mut claimed = vec![false; new_ids.len()];
    for (ci, id) in carried_ids.iter().enumerate() {
        if let Some(&ni) = first_new_index.get(id) {
            if !claimed[ni] {
                claimed[ni] = true;
                part.carried_known.push(ci);
                part.new_known.push(ni);
            }
        }
    }
    for (ni, was_claimed) in claimed.iter().enumerate() {
        if !was_claimed {
            part.new_novel.push(ni);
        }
    }
    log::debug!(
        "linked {} known tracks, {} novel",
        part.new_known.len(),
        part.new_novel.len()
    );
    part
}
