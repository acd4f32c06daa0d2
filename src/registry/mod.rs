pub mod files;
pub mod process;

pub use files::FileRegistry;
pub use process::ProcessRegistry;
