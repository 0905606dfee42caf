use log::warn;

/// Trim ranges of one file, in microseconds, kept sorted by start.
///
/// Ranges are inclusive on both ends. Interiors never overlap: a range
/// added over existing ones is trimmed to the gap between them, and a
/// range that lies inside an existing one is dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segments {
    ranges: Vec<(i64, i64)>,
    /// Largest sample time seen inside each range, parallel to `ranges`.
    last_sample_times: Vec<Option<i64>>,
}

impl Segments {
    /// No ranges.
    pub fn new() -> Self {
        Self::default()
    }

    /// Segments built by adding `ranges` in order.
    pub fn from_ranges(ranges: impl IntoIterator<Item = (i64, i64)>) -> Self {
        let mut segments = Segments::new();
        for range in ranges {
            segments.add(range);
        }
        segments
    }

    /// Whether no range is set.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Earliest range.
    pub fn first(&self) -> Option<(i64, i64)> {
        self.ranges.first().copied()
    }

    /// Ranges by start.
    pub fn iter(&self) -> impl Iterator<Item = &(i64, i64)> {
        self.ranges.iter()
    }

    /// Adds a range, trimming it against the ranges already present.
    /// Returns whether anything was added.
    pub fn add(&mut self, range: (i64, i64)) -> bool {
        let (start, end) = range;
        if start > end {
            warn!("ignoring inverted segment {}..{}", start, end);
            return false;
        }

        // ranges the new one covers entirely are replaced by it
        let mut index = 0;
        while index < self.ranges.len() {
            let (s, e) = self.ranges[index];
            if start <= s && e <= end {
                self.remove(index);
            } else {
                index += 1;
            }
        }

        let at_start = self.index_of(start);
        let at_end = self.index_of(end);
        let arranged = match (at_start, at_end) {
            (None, None) => range,
            (Some(a), Some(b)) if a == b => return false,
            _ => {
                let start = at_start.map_or(start, |i| self.ranges[i].1);
                let end = at_end.map_or(end, |i| self.ranges[i].0);
                (start, end)
            }
        };

        let position = self
            .ranges
            .iter()
            .position(|existing| *existing > arranged)
            .unwrap_or(self.ranges.len());
        self.ranges.insert(position, arranged);
        self.last_sample_times.insert(position, None);
        true
    }

    /// Removes the range at `index`.
    pub fn remove(&mut self, index: usize) -> Option<(i64, i64)> {
        if index >= self.ranges.len() {
            return None;
        }
        self.last_sample_times.remove(index);
        Some(self.ranges.remove(index))
    }

    /// Drops ranges that start at or after `limit`, usually the file duration.
    pub fn remove_out_of_bound(&mut self, limit: i64) {
        let mut index = 0;
        while index < self.ranges.len() {
            if self.ranges[index].0 >= limit {
                self.remove(index);
            } else {
                index += 1;
            }
        }
    }

    /// True when no range is set or `pts` lies inside one.
    pub fn is_inside_segment(&self, pts: i64) -> bool {
        self.ranges.is_empty() || self.index_of(pts).is_some()
    }

    /// First range starting after `pts`.
    pub fn segment_after(&self, pts: i64) -> Option<(i64, i64)> {
        self.ranges.iter().copied().find(|(start, _)| pts < *start)
    }

    /// Records a written sample time for the range containing `pts`.
    pub fn save_sample_time(&mut self, pts: i64) {
        if let Some(index) = self.index_of(pts) {
            let last = &mut self.last_sample_times[index];
            if last.map_or(true, |last| last < pts) {
                *last = Some(pts);
            }
        }
    }

    /// Maps a file timestamp to output time, closing the gaps cut away
    /// before the range `pts` falls in. A range that follows another
    /// starts one microsecond after the last sample kept from it.
    pub fn shift(&self, pts: i64) -> i64 {
        let current_start = match self.index_of(pts) {
            Some(index) => self.ranges[index].0,
            None => return pts,
        };
        if current_start == 0 {
            return pts;
        }
        let kept_before: i64 = self
            .ranges
            .iter()
            .zip(&self.last_sample_times)
            .filter(|((_, end), _)| *end < pts)
            .map(|((start, _), last)| last.map_or(0, |last| last - start + 1))
            .sum();
        pts - current_start + kept_before
    }

    /// Sum of the range lengths.
    pub fn duration(&self) -> i64 {
        self.ranges.iter().map(|(start, end)| end - start).sum()
    }

    fn index_of(&self, pts: i64) -> Option<usize> {
        self.ranges
            .iter()
            .position(|(start, end)| *start <= pts && pts <= *end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    fn ranges(segments: &Segments) -> Vec<(i64, i64)> {
        segments.iter().copied().collect()
    }

    #[test]
    fn test_empty_accepts_everything() {
        let segments = Segments::new();
        assert!(segments.is_inside_segment(-5));
        assert!(segments.is_inside_segment(1_000_000));
        assert_eq!(segments.segment_after(0), None);
        assert_eq!(segments.shift(42), 42);
    }

    #[test]
    fn test_disjoint_ranges_are_kept_sorted() {
        let segments = Segments::from_ranges([(500, 600), (0, 100), (200, 300)]);
        assert_eq!(ranges(&segments), vec![(0, 100), (200, 300), (500, 600)]);
        assert_eq!(segments.duration(), 300);
        assert_eq!(segments.segment_after(150), Some((200, 300)));
        assert_eq!(segments.segment_after(200), Some((500, 600)));
        assert!(!segments.is_inside_segment(150));
        assert!(segments.is_inside_segment(300));
    }

    #[test]
    fn test_overlapping_range_is_trimmed_to_the_gap() {
        let mut segments = Segments::from_ranges([(0, 100), (200, 300)]);
        assert!(segments.add((50, 250)));
        assert_eq!(ranges(&segments), vec![(0, 100), (100, 200), (200, 300)]);
    }

    #[test]
    fn test_range_inside_another_is_dropped() {
        let mut segments = Segments::from_ranges([(0, 100)]);
        assert!(!segments.add((10, 20)));
        assert_eq!(ranges(&segments), vec![(0, 100)]);
    }

    #[test]
    fn test_covering_range_replaces_covered_ones() {
        let mut segments = Segments::from_ranges([(10, 20), (30, 40)]);
        assert!(segments.add((0, 50)));
        assert_eq!(ranges(&segments), vec![(0, 50)]);
    }

    #[test]
    fn test_trimmed_to_a_point_between_touching_ranges() {
        let mut segments = Segments::from_ranges([(0, 10), (10, 20)]);
        assert!(segments.add((5, 15)));
        assert_eq!(ranges(&segments), vec![(0, 10), (10, 10), (10, 20)]);
    }

    #[test]
    fn test_remove_out_of_bound() {
        let mut segments = Segments::from_ranges([(0, 10), (100, 200), (300, 400)]);
        segments.remove_out_of_bound(300);
        assert_eq!(ranges(&segments), vec![(0, 10), (100, 200)]);
    }

    #[test]
    fn test_shift_closes_cut_gaps() {
        let mut segments = Segments::from_ranges([(0, 100), (300, 400)]);
        for pts in [0, 40, 90] {
            segments.save_sample_time(pts);
            assert_eq!(segments.shift(pts), pts);
        }
        segments.save_sample_time(300);
        assert_eq!(segments.shift(300), 91);
        assert_eq!(segments.shift(340), 131);
    }

    #[test]
    fn test_shift_without_a_first_range_at_zero() {
        let mut segments = Segments::from_ranges([(1000, 2000)]);
        segments.save_sample_time(1000);
        assert_eq!(segments.shift(1000), 0);
        assert_eq!(segments.shift(1500), 500);
        // outside every range nothing is shifted
        assert_eq!(segments.shift(5000), 5000);
    }

    #[quickcheck]
    fn prop_interiors_never_overlap(pairs: Vec<(u16, u16)>) -> bool {
        let mut segments = Segments::new();
        for (a, b) in pairs {
            let (a, b) = (a.min(b) as i64, a.max(b) as i64);
            segments.add((a, b));
        }
        let ranges = ranges(&segments);
        ranges.iter().all(|(s, e)| s <= e)
            && ranges.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].1 <= w[1].0)
    }
}
