use mapstream_common::SubmapPos;

/// A cubic block of submaps: every submap within Chebyshev distance `radius`
/// of `center` on each z-level in `z_min..=z_max`.
///
/// `center.z` plays no part in membership; the z-range alone picks the levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub center: SubmapPos,
    pub radius: i32,
    pub z_min: i32,
    pub z_max: i32,
}

impl Region {
    pub fn new(center: SubmapPos, radius: i32, z_min: i32, z_max: i32) -> Self {
        Self {
            center,
            radius: radius.max(0),
            z_min: z_min.min(z_max),
            z_max: z_min.max(z_max),
        }
    }

    pub fn contains(&self, pos: SubmapPos) -> bool {
        (self.z_min..=self.z_max).contains(&pos.z) && self.center.chebyshev_xy(pos) <= self.radius
    }

    /// Number of submaps the region denotes.
    pub fn submap_count(&self) -> usize {
        let side = (2 * i64::from(self.radius) + 1) as usize;
        let levels = (i64::from(self.z_max) - i64::from(self.z_min) + 1) as usize;
        side * side * levels
    }

    /// Every member, z-level by z-level, then row by row.
    pub fn submaps(&self) -> impl Iterator<Item = SubmapPos> + '_ {
        let r = self.radius;
        let (cx, cy) = (self.center.x, self.center.y);
        (self.z_min..=self.z_max).flat_map(move |z| {
            (-r..=r).flat_map(move |dy| (-r..=r).map(move |dx| SubmapPos::new(cx + dx, cy + dy, z)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn radius_zero_is_one_submap_per_level() {
        let region = Region::new(SubmapPos::new(10, 10, 0), 0, 0, 0);
        let members: Vec<_> = region.submaps().collect();
        assert_eq!(members, vec![SubmapPos::new(10, 10, 0)]);
        assert_eq!(region.submap_count(), 1);
    }

    #[test]
    fn members_match_contains() {
        let region = Region::new(SubmapPos::new(-1, 2, 5), 2, -1, 1);
        let members: BTreeSet<_> = region.submaps().collect();
        assert_eq!(members.len(), region.submap_count());
        assert_eq!(region.submap_count(), 5 * 5 * 3);
        for x in -5..5 {
            for y in -2..7 {
                for z in -3..3 {
                    let pos = SubmapPos::new(x, y, z);
                    assert_eq!(members.contains(&pos), region.contains(pos), "{pos}");
                }
            }
        }
    }

    #[test]
    fn inverted_z_range_and_negative_radius_are_normalized() {
        let region = Region::new(SubmapPos::new(0, 0, 0), -3, 2, -2);
        assert_eq!(region.radius, 0);
        assert_eq!((region.z_min, region.z_max), (-2, 2));
        assert_eq!(region.submap_count(), 5);
    }
}
