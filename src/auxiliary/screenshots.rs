use crate::package::{Auxiliary, PackageOptions};

/// Illustrative side-channel module: periodic screenshotting. Left as a
/// no-op stub — a real implementation would own a capture thread and a
/// timer — but it exercises the auxiliary loader's start/stop/finish
/// contract end to end.
pub struct Screenshots {
    _options: PackageOptions,
}

impl Screenshots {
    pub fn new(options: PackageOptions) -> Self {
        Self { _options: options }
    }
}

impl Auxiliary for Screenshots {}
