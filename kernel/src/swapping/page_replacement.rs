//! Victim selection for eviction.

/// Chooses which resident frame to evict.
pub trait PageReplacementPolicy {
    /// Picks a victim among `frames`, the kvas of every resident frame in
    /// ascending order. `accessed` tests and clears a frame's accessed bit.
    /// Returns `None` only when `frames` is empty.
    fn select_victim(
        &mut self,
        frames: &[usize],
        accessed: impl FnMut(usize) -> bool,
    ) -> Option<usize>;
}

/// Second-chance clock over the frames in kva order.
///
/// The hand survives between evictions: each scan starts at the first frame
/// past the previous victim, wrapping around at the end.
#[derive(Debug, Default)]
pub struct Clock {
    hand: usize,
}

impl PageReplacementPolicy for Clock {
    fn select_victim(
        &mut self,
        frames: &[usize],
        mut accessed: impl FnMut(usize) -> bool,
    ) -> Option<usize> {
        let len = frames.len();
        let last = *frames.last()?;
        let start = match frames.partition_point(|&kva| kva < self.hand) {
            i if i == len => 0,
            i => i,
        };

        let mut scanned = last;
        for kva in frames[start..].iter().chain(&frames[..start]).copied() {
            scanned = kva;
            if !accessed(kva) {
                break;
            }
        }
        // All accessed: every bit is clear now and the last frame scanned goes.
        self.hand = scanned + 1;
        Some(scanned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeSet;

    #[test]
    fn second_chance() {
        let frames = [0x1000, 0x2000, 0x3000, 0x4000];
        let mut bits: BTreeSet<usize> = [0x1000, 0x2000].into();
        let mut clock = Clock::default();

        let mut test_and_clear = |kva: usize| bits.remove(&kva);
        assert_eq!(clock.select_victim(&frames, &mut test_and_clear), Some(0x3000));
        // the hand moved past the victim
        assert_eq!(clock.select_victim(&frames, &mut test_and_clear), Some(0x4000));
        // both earlier frames lost their bits on the first pass
        assert_eq!(clock.select_victim(&frames, &mut test_and_clear), Some(0x1000));
    }

    #[test]
    fn all_accessed_takes_last_scanned() {
        let frames = [0x1000, 0x2000, 0x3000];
        let mut bits: BTreeSet<usize> = frames.into();
        let mut clock = Clock { hand: 0x2000 };
        assert_eq!(
            clock.select_victim(&frames, |kva: usize| bits.remove(&kva)),
            Some(0x1000)
        );
        assert!(bits.is_empty());
    }

    #[test]
    fn hand_wraps() {
        let mut clock = Clock { hand: 0x9000 };
        assert_eq!(clock.select_victim(&[0x1000, 0x2000], |_| false), Some(0x1000));
        assert_eq!(clock.select_victim(&[], |_| false), None);
    }
}
