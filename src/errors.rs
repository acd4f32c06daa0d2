use std::path::PathBuf;

/// Errors that abort the analysis lifecycle outright. Reported to the host
/// as `success=false`.
#[derive(thiserror::Error, Debug)]
pub enum FatalError {
    #[error("package \"{0}\" does not exist")]
    PackageNotFound(String),

    #[error("package \"{0}\" start function failed: {1}")]
    PackageStartFailed(String, PackageError),

    #[error("no analysis package available for file type \"{0}\"")]
    NoPackageForFileType(String),
}

/// Errors raised by a `Package`'s `start` hook. Anything else (`check`,
/// `finish`, `package_files`) is logged and swallowed, never fatal.
#[derive(thiserror::Error, Debug)]
pub enum PackageError {
    #[error("{0}")]
    Failed(String),

    #[error("package raised an unhandled error: {0}")]
    Unhandled(#[from] anyhow::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum AuxiliaryError {
    #[error("{0}")]
    Failed(String),
}

/// Malformed or unknown wire commands. Never panics the handler; every
/// variant maps to an empty reply and a log line.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message had no ':' separator")]
    MissingSeparator,

    #[error("unknown command \"{0}\"")]
    UnknownCommand(String),

    #[error("{field} was not a valid number")]
    NotANumber { field: &'static str },

    #[error("wrong argument count for {command}")]
    WrongArgCount { command: &'static str },
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("pid {0} is not tracked")]
    NotTracked(u32),
}

#[derive(thiserror::Error, Debug)]
pub enum InjectError {
    #[error("OpenProcess failed for pid {pid}: {source}")]
    OpenProcess { pid: u32, source: std::io::Error },

    #[error("injection primitive failed for pid {pid}: {source}")]
    Primitive { pid: u32, source: std::io::Error },
}

#[derive(thiserror::Error, Debug)]
pub enum HostError {
    #[error("host rpc call failed: {0}")]
    Rpc(#[from] reqwest::Error),

    #[error("failed to read local file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed line {line} in analysis.conf")]
    Malformed { line: usize },

    #[error("missing required key \"{0}\" in analysis.conf")]
    MissingKey(&'static str),

    #[error("key \"{key}\" had an invalid value \"{value}\"")]
    InvalidValue { key: &'static str, value: String },
}
