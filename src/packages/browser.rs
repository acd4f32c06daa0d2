use crate::errors::PackageError;
use crate::package::{Package, PackageOptions, Target};

/// URL-sample package. Illustrative stub: a real implementation would
/// launch the configured browser and navigate to `target`. No pids are
/// returned, so the supervisor disables liveness polling and runs for the
/// full timeout.
pub struct Browser {
    _options: PackageOptions,
}

impl Browser {
    pub fn new(options: PackageOptions) -> Self {
        Self { _options: options }
    }
}

impl Package for Browser {
    fn start(&mut self, _target: &Target) -> Result<Vec<u32>, PackageError> {
        Ok(Vec::new())
    }
}
