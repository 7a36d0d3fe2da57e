pub mod archive;
pub mod axml;
pub mod error;
pub mod patcher;
pub mod payload;
pub mod sign;

pub use archive::{SourceApk, WorkArchive};
pub use error::Error;
pub use patcher::{PatchDecision, PatchStatus, Patcher, PatcherOptions};
pub use sign::SigningIdentity;

pub type Result<T> = std::result::Result<T, Error>;
