use thiserror::Error;

/// Failure cases of the patching pipeline.
///
/// Per-input errors are caught at the orchestrator boundary and downgrade
/// that input to skipped/failed; setup errors (bad key material) abort the
/// run before any input is touched.
#[derive(Debug, Error)]
pub enum Error {
    /// The input file has no usable zip central directory.
    #[error("'{0}' is not a valid apk file")]
    NotAnArchive(String),

    /// The binary manifest has a bad magic or a broken chunk structure.
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    /// A bundled payload is missing from the resource table.
    #[error("missing bundled resource '{0}'")]
    MissingResource(String),

    /// Key material is unusable or a signature could not be produced.
    #[error("signing failed: {0}")]
    SigningFailure(String),

    /// The application attribute already points at the proxy loader.
    #[error("'{0}' is already patched")]
    AlreadyPatched(String),

    /// The package is outside the accepted namespace.
    #[error("'{0}' is not a facebook app")]
    PackageRejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}
