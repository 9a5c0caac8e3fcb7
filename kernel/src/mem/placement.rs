//! Frame placement policies for the user pool.

use super::phys::CoreMapEntry;
use super::AllocError;
use core::ops::Range;

/// A placement algorithm for allocating frames.
pub trait PlacementAlgorithm: Default {
    /// Returns [`Ok`] containing the range of frame numbers to be allocated.
    ///
    /// # Errors
    ///
    /// If no run of `frames_requested` free frames exists, the function returns an error.
    fn place(
        &mut self,
        core_map: &[CoreMapEntry],
        frames_requested: usize,
    ) -> Result<Range<usize>, AllocError>;
}

/// Resumes scanning where the previous allocation ended.
#[derive(Debug, Default)]
pub struct NextFit {
    position: usize,
}

/// Always scans from frame 0.
#[derive(Debug, Default)]
pub struct FirstFit;

/// Length of the free run starting at `start`, capped at `max`.
fn free_run(core_map: &[CoreMapEntry], start: usize, max: usize) -> usize {
    core_map[start..]
        .iter()
        .take(max)
        .take_while(|entry| !entry.allocated())
        .count()
}

/// First run of `frames_requested` free frames that starts in `starts`.
fn scan(
    core_map: &[CoreMapEntry],
    frames_requested: usize,
    mut starts: Range<usize>,
) -> Option<Range<usize>> {
    while starts.start < starts.end {
        let start = starts.start;
        if start + frames_requested > core_map.len() {
            return None;
        }
        let run = free_run(core_map, start, frames_requested);
        if run == frames_requested {
            return Some(start..start + run);
        }
        // skip past the allocated frame that ended the run
        starts.start = start + run + 1;
    }
    None
}

impl PlacementAlgorithm for NextFit {
    fn place(
        &mut self,
        core_map: &[CoreMapEntry],
        frames_requested: usize,
    ) -> Result<Range<usize>, AllocError> {
        let total_frames = core_map.len();
        if frames_requested == 0 || frames_requested > total_frames {
            return Err(AllocError);
        }
        let position = self.position.min(total_frames);
        let range = scan(core_map, frames_requested, position..total_frames)
            .or_else(|| scan(core_map, frames_requested, 0..position))
            .ok_or(AllocError)?;
        self.position = range.end % total_frames;
        Ok(range)
    }
}

impl PlacementAlgorithm for FirstFit {
    fn place(
        &mut self,
        core_map: &[CoreMapEntry],
        frames_requested: usize,
    ) -> Result<Range<usize>, AllocError> {
        if frames_requested == 0 {
            return Err(AllocError);
        }
        scan(core_map, frames_requested, 0..core_map.len()).ok_or(AllocError)
    }
}

/// The placement policy a pool was configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    #[default]
    NextFit,
    FirstFit,
}

#[derive(Debug)]
pub(super) enum Placer {
    NextFit(NextFit),
    FirstFit(FirstFit),
}

impl Placer {
    pub(super) fn new(placement: Placement) -> Self {
        match placement {
            Placement::NextFit => Self::NextFit(NextFit::default()),
            Placement::FirstFit => Self::FirstFit(FirstFit),
        }
    }

    pub(super) fn place(
        &mut self,
        core_map: &[CoreMapEntry],
        frames_requested: usize,
    ) -> Result<Range<usize>, AllocError> {
        match self {
            Self::NextFit(p) => p.place(core_map, frames_requested),
            Self::FirstFit(p) => p.place(core_map, frames_requested),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(core_map: &mut [CoreMapEntry], range: Range<usize>) {
        for entry in &mut core_map[range] {
            assert!(!entry.allocated());
            *entry = entry.with_allocated(true);
        }
    }

    #[test]
    fn next_fit() {
        let mut core_map = [CoreMapEntry::DEFAULT; 16];
        fill(&mut core_map, 1..4);
        fill(&mut core_map, 8..12);
        fill(&mut core_map, 14..16);

        // free: 0, 4-7, 12-13
        let mut algorithm = NextFit::default();
        assert_eq!(algorithm.place(&core_map, 4), Ok(4..8));
        fill(&mut core_map, 4..8);

        // resumes at 8
        assert_eq!(algorithm.place(&core_map, 1), Ok(12..13));
        fill(&mut core_map, 12..13);

        // wraps to the front
        assert_eq!(algorithm.place(&core_map, 1), Ok(13..14));
        fill(&mut core_map, 13..14);
        assert_eq!(algorithm.place(&core_map, 1), Ok(0..1));
        fill(&mut core_map, 0..1);

        assert_eq!(algorithm.place(&core_map, 1), Err(AllocError));
    }

    #[test]
    fn next_fit_wrap_around() {
        let mut core_map = [CoreMapEntry::DEFAULT; 16];
        let mut algorithm = NextFit { position: 8 };
        fill(&mut core_map, 0..1);
        assert_eq!(algorithm.place(&core_map, 16), Err(AllocError));
        assert_eq!(algorithm.place(&core_map, 15), Ok(1..16));
        assert_eq!(algorithm.position, 0);
    }

    #[test]
    fn first_fit() {
        let mut core_map = [CoreMapEntry::DEFAULT; 16];
        fill(&mut core_map, 2..4);
        fill(&mut core_map, 8..13);
        fill(&mut core_map, 15..16);

        // free: 0-1, 4-7, 13-14
        let mut algorithm = FirstFit;
        assert_eq!(algorithm.place(&core_map, 4), Ok(4..8));
        fill(&mut core_map, 4..8);
        assert_eq!(algorithm.place(&core_map, 2), Ok(0..2));
        fill(&mut core_map, 0..2);
        assert_eq!(algorithm.place(&core_map, 1), Ok(13..14));
        assert_eq!(algorithm.place(&core_map, 3), Err(AllocError));
    }
}
