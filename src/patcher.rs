//! Per-input orchestration: identity query, eligibility checks, the
//! sign-only and full-patch flows, and the error boundary that keeps one
//! bad input from stopping the rest.

use crate::archive::{AlignmentRules, SourceApk, WorkArchive};
use crate::axml::{self, ManifestDocument};
use crate::error::Error;
use crate::payload;
use crate::sign::{v1, v2, ApkSigner, SigningConfig, SigningIdentity};
use crate::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

/// Only applications in this namespace are processed at all.
pub const VALID_PACKAGE_PREFIX: &str = "com.facebook.";

/// Packages patched without the force flag. Doubles as the set whose
/// signature fingerprint is already known to the loader, so no metadata is
/// embedded for them.
pub const DEFAULT_PATCHABLE_PACKAGES: &[&str] = &["com.facebook.orca", "com.facebook.katana"];

pub const EXTRA_CONFIG_META_KEY: &str = "mrv.extra.config";

const ANDROID_MANIFEST_NAME: &str = "AndroidManifest.xml";
const QUERY_ALL_PACKAGES_PERMISSION: &str = "android.permission.QUERY_ALL_PACKAGES";
const PATCHED_SUFFIX: &str = "-mrv.apk";
const SIGNED_SUFFIX: &str = "-signed.apk";

/// Written to the config asset so the loader can restore the original
/// factory at runtime.
#[derive(Serialize)]
struct PatchConfig<'a> {
    #[serde(rename = "appComponentFactory")]
    app_component_factory: &'a str,
}

/// Embedded as manifest metadata (base64 of this json) for packages whose
/// original signature the loader has to verify itself.
#[derive(Serialize)]
struct ExtraConfig {
    signature: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PatchDecision {
    SignOnly,
    FullPatch,
}

impl PatchDecision {
    /// Pure decision function; namespace rejection happens before this.
    pub fn decide(package_name: &str, force: bool) -> Self {
        if force || DEFAULT_PATCHABLE_PACKAGES.contains(&package_name) {
            PatchDecision::FullPatch
        } else {
            PatchDecision::SignOnly
        }
    }
}

/// Terminal state of one input.
#[derive(Debug)]
pub enum PatchStatus {
    Patched { output: PathBuf },
    Signed { output: PathBuf },
    Skipped { cause: Error },
    Failed { cause: Error },
}

impl PatchStatus {
    /// An occupied output without the overwrite flag stops the whole run
    /// before anything is clobbered.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            PatchStatus::Failed { cause: Error::Io(e) }
                if e.kind() == io::ErrorKind::AlreadyExists
        )
    }
}

#[derive(Clone, Debug)]
pub struct PatcherOptions {
    pub output_dir: PathBuf,
    pub force_overwrite: bool,
    pub force_patch: bool,
}

impl Default for PatcherOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            force_overwrite: false,
            force_patch: false,
        }
    }
}

pub struct Patcher {
    identity: SigningIdentity,
    options: PatcherOptions,
}

impl Patcher {
    pub fn new(identity: SigningIdentity, options: PatcherOptions) -> Self {
        Self { identity, options }
    }

    /// Processes every input in order. One input's failure never stops the
    /// rest; the only early exit is an output that already exists without
    /// the overwrite flag, which aborts before anything is clobbered.
    pub fn run(&self, inputs: &[PathBuf]) -> Vec<(PathBuf, PatchStatus)> {
        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            let status = self.process(input);
            let abort = status.aborts_run();
            results.push((input.clone(), status));
            if abort {
                break;
            }
        }
        results
    }

    /// One input, errors downgraded to a terminal status at this boundary.
    pub fn process(&self, input: &Path) -> PatchStatus {
        match self.try_process(input) {
            Ok(status) => status,
            Err(
                cause @ (Error::NotAnArchive(_)
                | Error::MalformedManifest(_)
                | Error::PackageRejected(_)
                | Error::AlreadyPatched(_)),
            ) => PatchStatus::Skipped { cause },
            Err(cause) => PatchStatus::Failed { cause },
        }
    }

    fn try_process(&self, input: &Path) -> Result<PatchStatus> {
        let mut source = SourceApk::open(input)?;
        tracing::debug!("parsing manifest");
        let manifest = source
            .read(ANDROID_MANIFEST_NAME)?
            .ok_or_else(|| Error::NotAnArchive(file_name(input)))?;
        let identity = axml::query_identity(&manifest)?;
        let (Some(package), Some(factory)) =
            (identity.package_name, identity.app_component_factory)
        else {
            return Err(Error::MalformedManifest(
                "no package name or component factory".into(),
            ));
        };
        if package.is_empty() || factory.is_empty() {
            return Err(Error::MalformedManifest(
                "empty package name or component factory".into(),
            ));
        }

        if !package.starts_with(VALID_PACKAGE_PREFIX) {
            return Err(Error::PackageRejected(package));
        }
        if factory == payload::PROXY_APP_COMPONENT_FACTORY {
            return Err(Error::AlreadyPatched(file_name(input)));
        }

        let decision = PatchDecision::decide(&package, self.options.force_patch);
        let output = self.output_path(input, decision);
        if output.exists() && !self.options.force_overwrite {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("'{}' already exists. Use -f to overwrite.", file_name(&output)),
            )));
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match decision {
            PatchDecision::SignOnly => {
                self.sign_only(&mut source, &output)?;
                Ok(PatchStatus::Signed { output })
            }
            PatchDecision::FullPatch => {
                self.full_patch(&mut source, &output, &manifest, &package, &factory)?;
                Ok(PatchStatus::Patched { output })
            }
        }
    }

    /// Verbatim re-signing: every original entry is linked through except
    /// prior signature metadata, then both schemes are written fresh.
    fn sign_only(&self, source: &mut SourceApk, output: &Path) -> Result<()> {
        tracing::debug!("generating apk");
        let names = source.names();
        let rules = AlignmentRules::new().constant_for_suffix(".so", 4096);
        let mut work = WorkArchive::create(output, rules)?;
        work.attach_source(source);
        for name in &names {
            if v1::is_signature_entry(name) {
                continue;
            }
            work.link_entry(name, name)?;
        }
        work.realign();
        work.register_signer(self.signer()?);
        work.close()
    }

    fn full_patch(
        &self,
        source: &mut SourceApk,
        output: &Path,
        manifest: &[u8],
        package: &str,
        factory: &str,
    ) -> Result<()> {
        // fingerprint the original signature before the writer borrows the
        // source handle
        let extra_metadata = self.signature_metadata(source, package);
        let names = source.names();

        let rules = AlignmentRules::new()
            .constant_for_suffix(".so", 4096)
            .constant_for_path(payload::ORIGINAL_APK_ASSET_PATH, 4096);
        let mut work = WorkArchive::create(output, rules)?;
        work.mount_as_asset(payload::ORIGINAL_APK_ASSET_PATH, source);

        tracing::debug!("patching files");
        let mut doc = ManifestDocument::parse(manifest)?;
        doc.add_uses_permission(QUERY_ALL_PACKAGES_PERMISSION);
        doc.set_application_attribute(
            "appComponentFactory",
            payload::PROXY_APP_COMPONENT_FACTORY,
        )?;
        if let Some(metadata) = extra_metadata {
            tracing::debug!("adding metadata");
            doc.add_meta_data(EXTRA_CONFIG_META_KEY, &metadata)?;
        }
        work.add_bytes(ANDROID_MANIFEST_NAME, doc.serialize()?, true);

        payload::inject_native_libraries(&mut work)?;
        work.add_bytes("classes.dex", payload::trampoline_dex()?.to_vec(), true);
        work.add_bytes(
            payload::LOADER_DEX_ASSET_PATH,
            payload::loader_dex()?.to_vec(),
            true,
        );

        let config = PatchConfig {
            app_component_factory: factory,
        };
        work.add_bytes(payload::CONFIG_ASSET_PATH, to_json(&config)?, true);

        for name in &names {
            if name.starts_with("classes") && name.ends_with(".dex") {
                continue;
            }
            if name == ANDROID_MANIFEST_NAME {
                continue;
            }
            if v1::is_signature_entry(name) {
                continue;
            }
            work.link_entry(name, name)?;
        }

        tracing::debug!("generating apk");
        work.realign();
        work.register_signer(self.signer()?);
        work.close()
    }

    /// Base64 `ExtraConfig` for packages outside the default set, or `None`
    /// when the fingerprint is not needed or cannot be extracted.
    fn signature_metadata(&self, source: &mut SourceApk, package: &str) -> Option<String> {
        if DEFAULT_PATCHABLE_PACKAGES.contains(&package) {
            return None;
        }
        let cert = match v2::extract_signer_certificate(source.path()) {
            Ok(Some(cert)) => cert,
            _ => {
                // v1-only apps: first pkcs#7 block under META-INF
                let block_name = source
                    .names()
                    .into_iter()
                    .find(|n| n.starts_with("META-INF/") && n.ends_with(".RSA"))?;
                let block = source.read(&block_name).ok().flatten()?;
                v1::extract_certificate_der(&block)?
            }
        };
        let config = ExtraConfig {
            signature: BASE64.encode(&cert),
        };
        let json = to_json(&config).ok()?;
        Some(BASE64.encode(json))
    }

    fn signer(&self) -> Result<ApkSigner> {
        ApkSigner::new(self.identity.clone(), SigningConfig::default())
    }

    fn output_path(&self, input: &Path, decision: PatchDecision) -> PathBuf {
        let base = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let suffix = match decision {
            PatchDecision::SignOnly => SIGNED_SUFFIX,
            PatchDecision::FullPatch => PATCHED_SUFFIX,
        };
        self.options.output_dir.join(format!("{base}{suffix}"))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axml::sample_manifest;
    use tempfile::tempdir;

    fn build_source(dir: &Path, name: &str, package: &str, factory: &str) -> PathBuf {
        let path = dir.join(name);
        let mut work = WorkArchive::create(&path, AlignmentRules::new()).unwrap();
        work.add_bytes(
            "AndroidManifest.xml",
            sample_manifest(package, Some(factory)),
            true,
        );
        work.add_bytes("classes.dex", vec![0xca; 400], true);
        work.add_bytes("classes2.dex", vec![0xfe; 400], true);
        work.add_bytes("resources.arsc", vec![0x02; 900], true);
        work.add_bytes("assets/sounds.bin", vec![0x11; 3000], true);
        work.add_bytes("META-INF/CERT.SF", b"old signature file".to_vec(), true);
        work.add_bytes("META-INF/CERT.RSA", b"old signature block".to_vec(), true);
        work.close().unwrap();
        path
    }

    fn patcher(output_dir: &Path, force_patch: bool) -> Patcher {
        Patcher::new(
            SigningIdentity::bundled().unwrap(),
            PatcherOptions {
                output_dir: output_dir.to_path_buf(),
                force_overwrite: false,
                force_patch,
            },
        )
    }

    #[test]
    fn should_decide_from_the_allow_list_and_force_flag() {
        assert_eq!(
            PatchDecision::decide("com.facebook.orca", false),
            PatchDecision::FullPatch
        );
        assert_eq!(
            PatchDecision::decide("com.facebook.katana", false),
            PatchDecision::FullPatch
        );
        assert_eq!(
            PatchDecision::decide("com.facebook.lite", false),
            PatchDecision::SignOnly
        );
        assert_eq!(
            PatchDecision::decide("com.facebook.lite", true),
            PatchDecision::FullPatch
        );
    }

    #[test]
    fn should_fully_patch_an_allow_listed_package() {
        let dir = tempdir().unwrap();
        let source = build_source(
            dir.path(),
            "orca.apk",
            "com.facebook.orca",
            "android.app.AppComponentFactory",
        );
        let source_bytes = std::fs::read(&source).unwrap();
        let out_dir = dir.path().join("out");
        let status = patcher(&out_dir, false).process(&source);
        let PatchStatus::Patched { output } = status else {
            panic!("expected Patched, got {status:?}");
        };
        assert_eq!(file_name(&output), "orca-mrv.apk");

        let mut apk = SourceApk::open(&output).unwrap();

        // manifest redirected, original factory recorded in the config asset
        let manifest = apk.read("AndroidManifest.xml").unwrap().unwrap();
        let identity = axml::query_identity(&manifest).unwrap();
        assert_eq!(
            identity.app_component_factory.as_deref(),
            Some(payload::PROXY_APP_COMPONENT_FACTORY)
        );
        let config = apk.read(payload::CONFIG_ASSET_PATH).unwrap().unwrap();
        assert_eq!(
            String::from_utf8(config).unwrap(),
            r#"{"appComponentFactory":"android.app.AppComponentFactory"}"#
        );

        // four architecture libraries
        for abi in ["armeabi-v7a", "arm64-v8a", "x86", "x86_64"] {
            assert!(apk.contains(&format!("lib/{abi}/libmrv.so")), "{abi} missing");
        }

        // bootstrap payloads in, original dex and signature metadata out
        assert_eq!(
            apk.read("classes.dex").unwrap().unwrap(),
            payload::trampoline_dex().unwrap()
        );
        assert_eq!(
            apk.read(payload::LOADER_DEX_ASSET_PATH).unwrap().unwrap(),
            payload::loader_dex().unwrap()
        );
        assert!(!apk.contains("classes2.dex"));

        // untouched content is linked through, the original is recoverable
        assert_eq!(apk.read("assets/sounds.bin").unwrap().unwrap(), vec![0x11; 3000]);
        assert_eq!(
            apk.read(payload::ORIGINAL_APK_ASSET_PATH).unwrap().unwrap(),
            source_bytes
        );

        // both signature schemes verify
        v1::verify(&output).unwrap();
        v2::verify(&output).unwrap();
    }

    #[test]
    fn should_resign_in_namespace_packages_without_patching() {
        let dir = tempdir().unwrap();
        let source = build_source(
            dir.path(),
            "lite.apk",
            "com.facebook.lite",
            "android.app.AppComponentFactory",
        );
        let out_dir = dir.path().join("out");
        let status = patcher(&out_dir, false).process(&source);
        let PatchStatus::Signed { output } = status else {
            panic!("expected Signed, got {status:?}");
        };
        assert_eq!(file_name(&output), "lite-signed.apk");

        let mut apk = SourceApk::open(&output).unwrap();
        // content untouched, old signature files replaced by fresh ones
        assert_eq!(apk.read("classes.dex").unwrap().unwrap(), vec![0xca; 400]);
        assert!(!apk.contains(payload::CONFIG_ASSET_PATH));
        assert_ne!(
            apk.read("META-INF/CERT.SF").unwrap().unwrap(),
            b"old signature file"
        );
        v1::verify(&output).unwrap();
        v2::verify(&output).unwrap();
    }

    #[test]
    fn should_skip_packages_outside_the_namespace() {
        let dir = tempdir().unwrap();
        let source = build_source(
            dir.path(),
            "other.apk",
            "com.other.app",
            "android.app.AppComponentFactory",
        );
        let out_dir = dir.path().join("out");
        // force flag must not override the namespace check
        let status = patcher(&out_dir, true).process(&source);
        match status {
            PatchStatus::Skipped {
                cause: Error::PackageRejected(package),
            } => assert_eq!(package, "com.other.app"),
            other => panic!("expected Skipped, got {other:?}"),
        }
        assert!(!out_dir.exists() || std::fs::read_dir(&out_dir).unwrap().count() == 0);
    }

    #[test]
    fn should_skip_inputs_that_already_carry_the_proxy_factory() {
        let dir = tempdir().unwrap();
        let source = build_source(
            dir.path(),
            "patched.apk",
            "com.facebook.orca",
            payload::PROXY_APP_COMPONENT_FACTORY,
        );
        let status = patcher(&dir.path().join("out"), false).process(&source);
        match status {
            PatchStatus::Skipped {
                cause: Error::AlreadyPatched(name),
            } => assert_eq!(name, "patched.apk"),
            other => panic!("expected Skipped, got {other:?}"),
        }
    }

    #[test]
    fn should_skip_inputs_that_are_not_archives() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not-an.apk");
        std::fs::write(&path, b"hello").unwrap();
        let status = patcher(&dir.path().join("out"), false).process(&path);
        assert!(matches!(
            status,
            PatchStatus::Skipped {
                cause: Error::NotAnArchive(_)
            }
        ));
    }

    #[test]
    fn should_embed_signature_metadata_for_forced_extra_packages() {
        let dir = tempdir().unwrap();

        // a v2-signed source carrying a recoverable signer certificate
        let path = dir.path().join("extra.apk");
        let rules = AlignmentRules::new();
        let mut work = WorkArchive::create(&path, rules).unwrap();
        work.add_bytes(
            "AndroidManifest.xml",
            sample_manifest("com.facebook.mlite", Some("android.app.AppComponentFactory")),
            true,
        );
        work.add_bytes("classes.dex", vec![0xab; 100], true);
        let identity = SigningIdentity::bundled().unwrap();
        work.register_signer(ApkSigner::new(identity.clone(), SigningConfig::default()).unwrap());
        work.close().unwrap();

        let out_dir = dir.path().join("out");
        let status = patcher(&out_dir, true).process(&path);
        let PatchStatus::Patched { output } = status else {
            panic!("expected Patched, got {status:?}");
        };

        let mut apk = SourceApk::open(&output).unwrap();
        let manifest = apk.read("AndroidManifest.xml").unwrap().unwrap();
        let doc = ManifestDocument::parse(&manifest).unwrap();
        let app = doc.root.child("application").unwrap();
        let meta = app
            .children_named("meta-data")
            .find(|m| {
                m.attribute(Some(axml::ANDROID_NAMESPACE), "name")
                    .map(|a| a.value == crate::axml::TypedValue::Str(EXTRA_CONFIG_META_KEY.into()))
                    .unwrap_or(false)
            })
            .expect("metadata entry missing");
        let value = meta
            .attribute(Some(axml::ANDROID_NAMESPACE), "value")
            .unwrap();
        let crate::axml::TypedValue::Str(encoded) = &value.value else {
            panic!("metadata value is not a string");
        };
        let json = BASE64.decode(encoded).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&json).unwrap();
        let signature = BASE64
            .decode(parsed["signature"].as_str().unwrap())
            .unwrap();
        assert_eq!(signature, identity.leaf_certificate_der().unwrap());
    }

    #[test]
    fn should_abort_the_run_when_an_output_exists_without_force() {
        let dir = tempdir().unwrap();
        let first = build_source(
            dir.path(),
            "orca.apk",
            "com.facebook.orca",
            "android.app.AppComponentFactory",
        );
        let second = build_source(
            dir.path(),
            "katana.apk",
            "com.facebook.katana",
            "android.app.AppComponentFactory",
        );
        let out_dir = dir.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::write(out_dir.join("orca-mrv.apk"), b"occupied").unwrap();

        let results = patcher(&out_dir, false).run(&[first, second]);
        assert_eq!(results.len(), 1, "run must stop at the occupied output");
        assert!(matches!(results[0].1, PatchStatus::Failed { .. }));
        // the occupied file was not clobbered
        assert_eq!(
            std::fs::read(out_dir.join("orca-mrv.apk")).unwrap(),
            b"occupied"
        );
    }
}
