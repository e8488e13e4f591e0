use crate::core::types::IVec3;
use crate::voxel::node::LIGHT_SUN;

/// Marks a queued cell that was not reached from a neighbour
pub const NO_SOURCE: u8 = 6;

/// One cell waiting for (un)lighting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangingLight {
    pub pos: IVec3,
    /// Face index the change travelled along to reach `pos`, or `NO_SOURCE`
    pub source_dir: u8,
}

/// Bucket queue keyed by light level, popped brightest first
#[derive(Clone, Debug)]
pub struct LightQueue {
    pub(crate) buckets: [Vec<ChangingLight>; LIGHT_SUN as usize + 1],
    max_light: u8,
}

impl Default for LightQueue {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl LightQueue {
    pub fn with_capacity(reserve: usize) -> Self {
        Self {
            buckets: std::array::from_fn(|_| Vec::with_capacity(reserve)),
            max_light: 0,
        }
    }

    pub fn push(&mut self, light: u8, pos: IVec3, source_dir: u8) {
        debug_assert!(light <= LIGHT_SUN);
        self.max_light = self.max_light.max(light);
        self.buckets[light as usize].push(ChangingLight { pos, source_dir });
    }

    /// Pop an entry from the brightest non-empty bucket
    pub fn pop(&mut self) -> Option<(u8, ChangingLight)> {
        loop {
            if let Some(c) = self.buckets[self.max_light as usize].pop() {
                return Some((self.max_light, c));
            }
            if self.max_light == 0 {
                return None;
            }
            self.max_light -= 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }
}

/// Cells whose light must be removed
pub type UnlightQueue = LightQueue;
/// Cells whose light must be spread
pub type ReLightQueue = LightQueue;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_brightest_first() {
        let mut q = LightQueue::default();
        q.push(3, IVec3::X, NO_SOURCE);
        q.push(12, IVec3::Y, 2);
        q.push(7, IVec3::Z, NO_SOURCE);
        q.push(12, IVec3::ONE, NO_SOURCE);
        assert_eq!(q.len(), 4);
        let levels: Vec<u8> = std::iter::from_fn(|| q.pop()).map(|(l, _)| l).collect();
        assert_eq!(levels, vec![12, 12, 7, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_push_after_drain() {
        let mut q = LightQueue::default();
        q.push(5, IVec3::ZERO, NO_SOURCE);
        q.pop();
        assert!(q.pop().is_none());
        q.push(0, IVec3::X, NO_SOURCE);
        q.push(15, IVec3::Y, NO_SOURCE);
        assert_eq!(q.pop().map(|(l, c)| (l, c.pos)), Some((15, IVec3::Y)));
        assert_eq!(q.pop().map(|(l, _)| l), Some(0));
    }
}
