//! First-generation (jar-style) signing: a digest manifest, a signature
//! file over it, and a pkcs#7 signature block, all written as ordinary
//! archive entries. Tolerant of data appended outside the entry table,
//! which is what lets the v2 block coexist.

use super::SigningIdentity;
use crate::error::Error;
use crate::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rasn_pkix::Certificate;
use rsa::pkcs8::DecodePublicKey;
use rsa::{PaddingScheme, PublicKey as _, RsaPublicKey};
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";
pub const SIGNATURE_FILE_NAME: &str = "META-INF/CERT.SF";
pub const SIGNATURE_BLOCK_NAME: &str = "META-INF/CERT.RSA";

const CREATED_BY: &str = "1.0 (MRVPatcher)";
// Attribute lines wrap below the 72-byte limit of the jar manifest format.
const LINE_LIMIT: usize = 70;

/// Builds the three v1 artifacts from the per-entry content digests, in
/// entry layout order.
pub(crate) fn signature_entries(
    identity: &SigningIdentity,
    digests: &[(String, [u8; 32])],
) -> Result<Vec<(String, Vec<u8>)>> {
    let mut manifest = Vec::new();
    write_attribute(&mut manifest, "Manifest-Version", "1.0");
    write_attribute(&mut manifest, "Created-By", CREATED_BY);
    manifest.extend_from_slice(b"\r\n");

    let mut sections = Vec::with_capacity(digests.len());
    for (name, digest) in digests {
        let mut section = Vec::new();
        write_attribute(&mut section, "Name", name);
        write_attribute(&mut section, "SHA-256-Digest", &BASE64.encode(digest));
        section.extend_from_slice(b"\r\n");
        manifest.extend_from_slice(&section);
        sections.push(section);
    }

    let mut sf = Vec::new();
    write_attribute(&mut sf, "Signature-Version", "1.0");
    write_attribute(&mut sf, "Created-By", CREATED_BY);
    write_attribute(
        &mut sf,
        "SHA-256-Digest-Manifest",
        &BASE64.encode(Sha256::digest(&manifest)),
    );
    write_attribute(&mut sf, "X-Android-APK-Signed", "2");
    sf.extend_from_slice(b"\r\n");
    for ((name, _), section) in digests.iter().zip(&sections) {
        write_attribute(&mut sf, "Name", name);
        write_attribute(&mut sf, "SHA-256-Digest", &BASE64.encode(Sha256::digest(section)));
        sf.extend_from_slice(b"\r\n");
    }

    let block = pkcs7_signature(identity, &sf)?;
    Ok(vec![
        (MANIFEST_NAME.to_string(), manifest),
        (SIGNATURE_FILE_NAME.to_string(), sf),
        (SIGNATURE_BLOCK_NAME.to_string(), block),
    ])
}

pub(crate) fn is_signature_entry(name: &str) -> bool {
    name.starts_with("META-INF/")
        && (name.ends_with(".SF") || name.ends_with(".MF") || name.ends_with(".RSA"))
}

fn write_attribute(out: &mut Vec<u8>, key: &str, value: &str) {
    let line = format!("{key}: {value}");
    let mut rest = line.as_str();
    let mut first = true;
    while !rest.is_empty() {
        let limit = if first { LINE_LIMIT } else { LINE_LIMIT - 1 };
        let mut cut = rest.len().min(limit);
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if !first {
            out.push(b' ');
        }
        out.extend_from_slice(rest[..cut].as_bytes());
        out.extend_from_slice(b"\r\n");
        rest = &rest[cut..];
        first = false;
    }
}

// pkcs#7 SignedData assembly. The container shape is fixed (one signer,
// detached content, no signed attributes), so the handful of records is
// emitted directly instead of pulling in a cms library.

const OID_SIGNED_DATA: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02,
];
const OID_DATA: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01,
];
const OID_SHA256: &[u8] = &[
    0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
];
const OID_RSA_ENCRYPTION: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01,
];
const DER_NULL: &[u8] = &[0x05, 0x00];

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;
const TAG_CONTEXT_0: u8 = 0xa0;

fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    if content.len() < 128 {
        out.push(content.len() as u8);
    } else {
        let bytes = (usize::BITS / 8 - content.len().leading_zeros() / 8) as usize;
        out.push(0x80 | bytes as u8);
        for i in (0..bytes).rev() {
            out.push((content.len() >> (i * 8)) as u8);
        }
    }
    out.extend_from_slice(content);
    out
}

fn algorithm(oid: &[u8]) -> Vec<u8> {
    der(TAG_SEQUENCE, &[oid, DER_NULL].concat())
}

fn pkcs7_signature(identity: &SigningIdentity, content: &[u8]) -> Result<Vec<u8>> {
    let cert = identity.leaf_certificate();
    let cert_der = identity.leaf_certificate_der()?;
    let issuer = rasn::der::encode(&cert.tbs_certificate.issuer)
        .map_err(|e| Error::SigningFailure(format!("issuer encode: {e}")))?;
    let serial = rasn::der::encode(&cert.tbs_certificate.serial_number)
        .map_err(|e| Error::SigningFailure(format!("serial encode: {e}")))?;
    let signature = identity.sign(content)?;

    let signer_info = der(
        TAG_SEQUENCE,
        &[
            der(TAG_INTEGER, &[1]),
            der(TAG_SEQUENCE, &[issuer, serial].concat()),
            algorithm(OID_SHA256),
            algorithm(OID_RSA_ENCRYPTION),
            der(TAG_OCTET_STRING, &signature),
        ]
        .concat(),
    );

    let signed_data = der(
        TAG_SEQUENCE,
        &[
            der(TAG_INTEGER, &[1]),
            der(TAG_SET, &algorithm(OID_SHA256)),
            der(TAG_SEQUENCE, OID_DATA),
            der(TAG_CONTEXT_0, &cert_der),
            der(TAG_SET, &signer_info),
        ]
        .concat(),
    );

    Ok(der(
        TAG_SEQUENCE,
        &[OID_SIGNED_DATA.to_vec(), der(TAG_CONTEXT_0, &signed_data)].concat(),
    ))
}

// Minimal tlv walker for pulling the certificate and signature back out of
// a pkcs#7 block (ours, or the one found in a source apk).

struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Returns `(tag, whole_tlv, content)` of the next element.
    fn next(&mut self) -> Option<(u8, &'a [u8], &'a [u8])> {
        let start = self.pos;
        let tag = *self.data.get(self.pos)?;
        self.pos += 1;
        let first = *self.data.get(self.pos)? as usize;
        self.pos += 1;
        let len = if first < 128 {
            first
        } else {
            let count = first & 0x7f;
            let mut len = 0usize;
            for _ in 0..count {
                len = len << 8 | *self.data.get(self.pos)? as usize;
                self.pos += 1;
            }
            len
        };
        let content = self.data.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some((tag, &self.data[start..self.pos], content))
    }
}

/// Pulls `(certificate_der, signature)` out of a pkcs#7 SignedData block.
pub(crate) fn extract_signature(pkcs7: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let (tag, _, content) = DerReader::new(pkcs7).next()?;
    if tag != TAG_SEQUENCE {
        return None;
    }
    let mut r = DerReader::new(content);
    let (tag, _, _) = r.next()?; // contentType oid
    if tag != 0x06 {
        return None;
    }
    let (_, _, explicit) = r.next()?; // [0] SignedData
    let (_, _, signed_data) = DerReader::new(explicit).next()?;
    let mut r = DerReader::new(signed_data);
    r.next()?; // version
    r.next()?; // digestAlgorithms
    r.next()?; // encapContentInfo
    let (tag, _, certs) = r.next()?;
    if tag != TAG_CONTEXT_0 {
        return None;
    }
    let (_, cert_der, _) = DerReader::new(certs).next()?;

    let (tag, _, signer_infos) = r.next()?;
    if tag != TAG_SET {
        return None;
    }
    let (_, _, signer_info) = DerReader::new(signer_infos).next()?;
    let mut r = DerReader::new(signer_info);
    r.next()?; // version
    r.next()?; // issuerAndSerialNumber
    r.next()?; // digestAlgorithm
    r.next()?; // signatureAlgorithm
    let (tag, _, signature) = r.next()?;
    if tag != TAG_OCTET_STRING {
        return None;
    }
    Some((cert_der.to_vec(), signature.to_vec()))
}

/// The signer certificate of a pkcs#7 block, used when fingerprinting a
/// source apk that only carries a v1 signature.
pub(crate) fn extract_certificate_der(pkcs7: &[u8]) -> Option<Vec<u8>> {
    extract_signature(pkcs7).map(|(cert, _)| cert)
}

/// Full verification of the v1 scheme: every entry digest, the manifest
/// digest in the signature file, and the pkcs#7 signature over it.
pub(crate) fn verify(path: &Path) -> Result<()> {
    let file = File::open(path)?;
    let mut zip = zip::ZipArchive::new(file)?;

    let manifest = read_required(&mut zip, MANIFEST_NAME)?;
    let sf = read_required(&mut zip, SIGNATURE_FILE_NAME)?;
    let block = read_required(&mut zip, SIGNATURE_BLOCK_NAME)?;

    let digests = parse_digests(&manifest);
    let mut seen = 0usize;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = entry.name().to_string();
        if name == MANIFEST_NAME || name == SIGNATURE_FILE_NAME || name == SIGNATURE_BLOCK_NAME {
            continue;
        }
        let expected = digests.get(&name).ok_or_else(|| {
            Error::SigningFailure(format!("entry '{name}' is not covered by the manifest"))
        })?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = entry.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        if BASE64.encode(hasher.finalize()) != *expected {
            return Err(Error::SigningFailure(format!("digest mismatch for '{name}'")));
        }
        seen += 1;
    }
    if seen != digests.len() {
        return Err(Error::SigningFailure(
            "manifest covers entries that are not present".into(),
        ));
    }

    let sf_attrs = parse_main_attributes(&sf);
    let manifest_digest = sf_attrs
        .get("SHA-256-Digest-Manifest")
        .ok_or_else(|| Error::SigningFailure("no manifest digest in signature file".into()))?;
    if *manifest_digest != BASE64.encode(Sha256::digest(&manifest)) {
        return Err(Error::SigningFailure("manifest digest mismatch".into()));
    }

    let (cert_der, signature) = extract_signature(&block)
        .ok_or_else(|| Error::SigningFailure("unreadable pkcs#7 block".into()))?;
    let cert = rasn::der::decode::<Certificate>(&cert_der)
        .map_err(|e| Error::SigningFailure(format!("bad signer certificate: {e}")))?;
    let spki = rasn::der::encode(&cert.tbs_certificate.subject_public_key_info)
        .map_err(|e| Error::SigningFailure(format!("{e}")))?;
    let pubkey = RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| Error::SigningFailure(format!("{e}")))?;
    let padding = PaddingScheme::new_pkcs1v15_sign::<Sha256>();
    pubkey
        .verify(padding, &Sha256::digest(&sf), &signature)
        .map_err(|_| Error::SigningFailure("signature file verification failed".into()))
}

fn read_required(zip: &mut zip::ZipArchive<File>, name: &str) -> Result<Vec<u8>> {
    let mut entry = zip
        .by_name(name)
        .map_err(|_| Error::SigningFailure(format!("missing '{name}'")))?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Logical lines of a jar manifest, continuations unfolded.
fn logical_lines(bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines: Vec<String> = Vec::new();
    for raw in text.split("\r\n") {
        if let Some(rest) = raw.strip_prefix(' ') {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        lines.push(raw.to_string());
    }
    lines
}

fn parse_digests(manifest: &[u8]) -> HashMap<String, String> {
    let mut digests = HashMap::new();
    let mut current: Option<String> = None;
    for line in logical_lines(manifest) {
        if let Some(name) = line.strip_prefix("Name: ") {
            current = Some(name.to_string());
        } else if let Some(digest) = line.strip_prefix("SHA-256-Digest: ") {
            if let Some(name) = current.take() {
                digests.insert(name, digest.to_string());
            }
        }
    }
    digests
}

fn parse_main_attributes(sf: &[u8]) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    for line in logical_lines(sf) {
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(": ") {
            attrs.insert(key.to_string(), value.to_string());
        }
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_wrap_long_attribute_lines() {
        let mut out = Vec::new();
        let name = "assets/some/deeply/nested/path/with/a/quite/long/file-name-inside.bin";
        write_attribute(&mut out, "Name", name);
        let text = String::from_utf8(out).unwrap();
        for line in text.split("\r\n") {
            assert!(line.len() <= LINE_LIMIT, "line too long: {line:?}");
        }
        let unfolded = logical_lines(text.as_bytes());
        assert_eq!(unfolded[0], format!("Name: {name}"));
    }

    #[test]
    fn should_round_trip_the_pkcs7_block() {
        let identity = SigningIdentity::bundled().unwrap();
        let content = b"signature file bytes";
        let block = pkcs7_signature(&identity, content).unwrap();
        let (cert_der, signature) = extract_signature(&block).unwrap();
        assert_eq!(cert_der, identity.leaf_certificate_der().unwrap());

        let cert = rasn::der::decode::<Certificate>(&cert_der).unwrap();
        let spki = rasn::der::encode(&cert.tbs_certificate.subject_public_key_info).unwrap();
        let pubkey = RsaPublicKey::from_public_key_der(&spki).unwrap();
        let padding = PaddingScheme::new_pkcs1v15_sign::<Sha256>();
        pubkey
            .verify(padding, &Sha256::digest(content), &signature)
            .unwrap();
    }

    #[test]
    fn should_recognize_prior_signature_entries() {
        assert!(is_signature_entry("META-INF/CERT.SF"));
        assert!(is_signature_entry("META-INF/MANIFEST.MF"));
        assert!(is_signature_entry("META-INF/FACEBOOK.RSA"));
        assert!(!is_signature_entry("META-INF/services/com.example.Spi"));
        assert!(!is_signature_entry("classes.dex"));
    }
}
