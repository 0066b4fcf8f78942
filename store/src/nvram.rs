use anyhow::Result;

/// Lock state of one NVRAM space.
#[derive(Clone, Copy, Debug, Default)]
pub struct LockState {
    pub locked_for_reading: bool,
    pub locked_for_writing: bool,
}

/// Read-only access to hardware NVRAM spaces.
pub trait NVRam {
    /// Returns the lock state of the space at `index`.
    fn is_space_locked(&self, index: u32) -> Result<LockState>;

    /// Reads the contents of the space at `index`.
    fn read_space(&self, index: u32) -> Result<Vec<u8>>;
}
