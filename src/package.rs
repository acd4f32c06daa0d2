use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::TargetCategory;
use crate::errors::{AuxiliaryError, PackageError};

/// The resolved sample location, produced by `AnalysisConfig::resolve_target`.
#[derive(Clone, Debug)]
pub struct Target(pub String);

/// A sample-type-specific controller. This crate only defines the
/// capability surface the supervisor drives; the actual launch/check/cleanup
/// logic for a given sample type lives in the implementing type.
pub trait Package: Send {
    fn start(&mut self, target: &Target) -> Result<Vec<u32>, PackageError>;

    /// Periodic tick; `false` requests termination. Default: keep running.
    fn check(&mut self) -> bool {
        true
    }

    /// Post-run cleanup; best-effort.
    fn finish(&mut self) {}

    /// Artifacts to upload under `package_files/`; best-effort.
    fn package_files(&mut self) -> Vec<(PathBuf, String)> {
        Vec::new()
    }

    /// Informational update, called each polling tick.
    fn set_pids(&mut self, _pids: &[u32]) {}
}

/// A side-channel instrumentation module, independent of sample type.
/// Missing capabilities are just the default no-op, not a caught type
/// error.
pub trait Auxiliary: Send {
    fn start(&mut self) -> Result<(), AuxiliaryError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AuxiliaryError> {
        Ok(())
    }

    fn finish(&mut self) {}
}

pub type PackageOptions = HashMap<String, String>;
type PackageCtor = fn(PackageOptions) -> Box<dyn Package>;
type AuxiliaryCtor = fn(PackageOptions) -> Box<dyn Auxiliary>;

/// Explicit select-by-name registry: packages and auxiliaries are looked up
/// by a fixed name rather than discovered through namespace enumeration or
/// subclass introspection.
pub fn package_registry() -> Vec<(&'static str, PackageCtor)> {
    vec![
        ("generic", |opts| Box::new(crate::packages::generic::Generic::new(opts))),
        ("browser", |opts| Box::new(crate::packages::browser::Browser::new(opts))),
    ]
}

pub fn auxiliary_registry() -> Vec<(&'static str, AuxiliaryCtor)> {
    vec![(
        "screenshots",
        (|opts| Box::new(crate::auxiliary::screenshots::Screenshots::new(opts))) as AuxiliaryCtor,
    )]
}

pub fn instantiate_package(name: &str, options: PackageOptions) -> Option<Box<dyn Package>> {
    package_registry()
        .into_iter()
        .find(|(n, _)| *n == name)
        .map(|(_, ctor)| ctor(options))
}

pub fn instantiate_all_auxiliaries(options: &PackageOptions) -> Vec<(&'static str, Box<dyn Auxiliary>)> {
    auxiliary_registry()
        .into_iter()
        .map(|(name, ctor)| (name, ctor(options.clone())))
        .collect()
}

/// Maps a sample to a package name when none was specified at submission.
/// URL samples default to the browser package; pure function over the
/// fixed registry's declared extensions.
pub fn choose_package(
    category: TargetCategory,
    file_type: Option<&str>,
    file_name: Option<&str>,
) -> Option<&'static str> {
    if category == TargetCategory::Url {
        return Some("browser");
    }

    let lowered_type = file_type.map(|t| t.to_lowercase());
    let lowered_name = file_name.map(|n| n.to_lowercase());

    if lowered_type.as_deref().is_some_and(|t| t.contains("pe32") || t.contains("executable"))
        || lowered_name.as_deref().is_some_and(|n| n.ends_with(".exe") || n.ends_with(".dll"))
    {
        return Some("generic");
    }

    None
}
