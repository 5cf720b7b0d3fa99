use std::cmp::Ordering;

/// One admissible track/detection pairing.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Pairing {
    pub cost: f32,
    pub track_id: u64,
    pub track: usize,
    pub detection: usize,
}

/// Greedy lowest-cost matching.
///
/// Pairs are taken in order of `(cost, track_id, detection)`, so equal costs
/// go to the earliest-created track and the result is reproducible.
pub(crate) fn greedy_assign(
    mut pairs: Vec<Pairing>,
    tracks: usize,
    detections: usize,
) -> Vec<(usize, usize)> {
    pairs.sort_by(|a, b| {
        a.cost
            .partial_cmp(&b.cost)
            .unwrap_or(Ordering::Equal)
            .then(a.track_id.cmp(&b.track_id))
            .then(a.detection.cmp(&b.detection))
    });
    let mut track_used = vec![false; tracks];
    let mut detection_used = vec![false; detections];
    let mut matches = Vec::new();
    for pair in pairs {
        if track_used[pair.track] || detection_used[pair.detection] {
            continue;
        }
        track_used[pair.track] = true;
        detection_used[pair.detection] = true;
        matches.push((pair.track, pair.detection));
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(cost: f32, track_id: u64, track: usize, detection: usize) -> Pairing {
        Pairing {
            cost,
            track_id,
            track,
            detection,
        }
    }

    #[test]
    fn lowest_cost_wins() {
        let matches = greedy_assign(
            vec![pair(10.0, 1, 0, 0), pair(2.0, 2, 1, 0), pair(3.0, 1, 0, 1)],
            2,
            2,
        );
        assert_eq!(matches, vec![(1, 0), (0, 1)]);
    }

    #[test]
    fn ties_go_to_earliest_track() {
        let matches = greedy_assign(vec![pair(5.0, 7, 1, 0), pair(5.0, 3, 0, 0)], 2, 1);
        assert_eq!(matches, vec![(0, 0)]);
    }
}
