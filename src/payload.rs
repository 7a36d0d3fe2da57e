//! Bundled resource set: the per-architecture loader libraries, the
//! bootstrap/trampoline dex payloads and the default signing key, all baked
//! into the binary and fetched by logical name.

use crate::archive::WorkArchive;
use crate::error::Error;
use crate::Result;

/// The class the application attribute is redirected to. The bundled
/// trampoline dex provides it.
pub const PROXY_APP_COMPONENT_FACTORY: &str = "org.mrv.loader.MRVAppComponentFactoryStub";

pub const CONFIG_ASSET_PATH: &str = "assets/mrv/config.json";
pub const ORIGINAL_APK_ASSET_PATH: &str = "assets/mrv/origin.apk";
pub const LOADER_DEX_ASSET_PATH: &str = "assets/mrv/loader.dex";

pub const NATIVE_LIBRARY_NAME: &str = "libmrv.so";

const RESOURCES: &[(&str, &[u8])] = &[
    (
        "so/armeabi-v7a/libmrv.so",
        include_bytes!("../payloads/lib-armeabi-v7a.so"),
    ),
    (
        "so/arm64-v8a/libmrv.so",
        include_bytes!("../payloads/lib-arm64-v8a.so"),
    ),
    ("so/x86/libmrv.so", include_bytes!("../payloads/lib-x86.so")),
    (
        "so/x86_64/libmrv.so",
        include_bytes!("../payloads/lib-x86_64.so"),
    ),
    ("dex/loader.dex", include_bytes!("../payloads/loader.dex")),
    (
        "dex/metaloader.dex",
        include_bytes!("../payloads/metaloader.dex"),
    ),
    ("keystore/signing.pem", include_bytes!("../payloads/signing.pem")),
];

/// Fetches a bundled blob by logical name.
pub fn resource(name: &str) -> Result<&'static [u8]> {
    RESOURCES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, bytes)| *bytes)
        .ok_or_else(|| Error::MissingResource(name.to_string()))
}

pub fn loader_dex() -> Result<&'static [u8]> {
    resource("dex/loader.dex")
}

pub fn trampoline_dex() -> Result<&'static [u8]> {
    resource("dex/metaloader.dex")
}

pub fn default_signing_pem() -> Result<&'static [u8]> {
    resource("keystore/signing.pem")
}

/// Logical architecture names and the library folder each maps to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Arch {
    Arm,
    Arm64,
    X86,
    X86_64,
}

impl Arch {
    pub const ALL: [Arch; 4] = [Arch::Arm, Arch::Arm64, Arch::X86, Arch::X86_64];

    pub fn name(self) -> &'static str {
        match self {
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
        }
    }

    /// Identifier used on-device to refer to the ABI folder.
    pub fn library_dir(self) -> &'static str {
        match self {
            Arch::Arm => "armeabi-v7a",
            Arch::Arm64 => "arm64-v8a",
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
        }
    }
}

/// Adds the loader library for every architecture at
/// `lib/<folder>/libmrv.so`, stored uncompressed so the `.so` alignment rule
/// lets the runtime map it straight out of the archive. All payloads are
/// resolved before the first entry is written: either every architecture is
/// injected or none is.
pub fn inject_native_libraries(work: &mut WorkArchive<'_>) -> Result<()> {
    let mut payloads = Vec::with_capacity(Arch::ALL.len());
    for arch in Arch::ALL {
        let logical = format!("so/{}/{}", arch.library_dir(), NATIVE_LIBRARY_NAME);
        payloads.push((arch, resource(&logical)?));
    }
    for (arch, bytes) in payloads {
        let entry = format!("lib/{}/{}", arch.library_dir(), NATIVE_LIBRARY_NAME);
        tracing::debug!("injecting {entry}");
        work.add_bytes(&entry, bytes.to_vec(), false);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::AlignmentRules;
    use tempfile::tempdir;

    #[test]
    fn should_map_architectures_to_library_folders() {
        assert_eq!(Arch::Arm.library_dir(), "armeabi-v7a");
        assert_eq!(Arch::Arm64.library_dir(), "arm64-v8a");
        assert_eq!(Arch::X86.library_dir(), "x86");
        assert_eq!(Arch::X86_64.library_dir(), "x86_64");
    }

    #[test]
    fn should_fail_on_unknown_resources() {
        match resource("so/mips/libmrv.so") {
            Err(Error::MissingResource(name)) => assert_eq!(name, "so/mips/libmrv.so"),
            other => panic!("expected MissingResource, got {other:?}"),
        }
    }

    #[test]
    fn should_inject_one_library_per_architecture() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("libs.apk");
        let mut work = WorkArchive::create(&path, AlignmentRules::new()).unwrap();
        inject_native_libraries(&mut work).unwrap();
        for arch in Arch::ALL {
            assert!(work.contains(&format!("lib/{}/libmrv.so", arch.library_dir())));
        }
    }
}
