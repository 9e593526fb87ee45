pub mod clean;
pub mod compat;
pub mod config;
pub mod console;
pub mod error;
pub mod fetcher;
pub mod install;
pub mod integrity;
pub mod linker;
pub mod lockfile;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod scripts;
pub mod update_check;
pub mod version;

pub use config::SkiffConfig;
pub use error::SkiffError;
pub use install::{InstallFlags, InstallResult};

pub type Result<T> = std::result::Result<T, SkiffError>;
