//! Tunables of the memory subsystem.

use crate::logger;
use crate::mem::placement::Placement;
use log::LevelFilter;
use pagekern_shared::mem::{page_round_down, MAX_STACK_SIZE, PAGE_FRAME_SIZE, STACK_GUARD, USER_STACK};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Frames in the user pool.
    pub user_frames: usize,
    pub placement: Placement,
    /// How far below `USER_STACK` the stack may grow.
    pub stack_limit: usize,
    /// How far below the stack pointer an access still counts as a stack access.
    pub stack_guard: usize,
    pub log_level: LevelFilter,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            user_frames: 256,
            placement: Placement::NextFit,
            stack_limit: MAX_STACK_SIZE,
            stack_guard: STACK_GUARD,
            log_level: LevelFilter::Info,
        }
    }
}

impl VmConfig {
    pub fn with_user_frames(self, user_frames: usize) -> Self {
        Self {
            user_frames,
            ..self
        }
    }

    /// Sets the log level from a boot option such as `log=debug`. Unknown
    /// names turn logging off.
    pub fn with_log_level(self, name: &str) -> Self {
        Self {
            log_level: logger::parse_level(name.trim().to_ascii_lowercase().as_str()),
            ..self
        }
    }

    /// Lowest address the stack can reach.
    pub fn stack_floor(&self) -> usize {
        USER_STACK - page_round_down(self.stack_limit.clamp(PAGE_FRAME_SIZE, USER_STACK))
    }
}
