use std::process::Command;

use crate::errors::PackageError;
use crate::package::{Package, PackageOptions, Target};

/// Default executable launcher: runs the target with no special handling,
/// the way most Windows PE samples are analyzed. Illustrative — exercises
/// `Package::start`'s pid-seeding contract.
pub struct Generic {
    options: PackageOptions,
}

impl Generic {
    pub fn new(options: PackageOptions) -> Self {
        Self { options }
    }
}

impl Package for Generic {
    fn start(&mut self, target: &Target) -> Result<Vec<u32>, PackageError> {
        let args = self.options.get("arguments").map(|s| s.as_str()).unwrap_or("");
        let child = Command::new(&target.0)
            .args(args.split_whitespace())
            .spawn()
            .map_err(|e| PackageError::Failed(format!("failed to launch {}: {}", target.0, e)))?;

        Ok(vec![child.id()])
    }
}
