//! Second-generation signing: a block keyed by a fixed identifier, spliced
//! between the last entry and the central directory, covering a chunked
//! digest of the entire file. Any byte changed after signing invalidates
//! it.

use super::SigningIdentity;
use crate::error::Error;
use crate::Result;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rasn_pkix::Certificate;
use rsa::pkcs8::DecodePublicKey;
use rsa::{PaddingScheme, PublicKey as _, RsaPublicKey};
use sha2::{Digest as _, Sha256};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

const SIGNING_BLOCK_MAGIC: &[u8] = b"APK Sig Block 42";
const SIGNING_BLOCK_V2_ID: u32 = 0x7109871a;
const RSA_PKCS1V15_SHA2_256: u32 = 0x0103;
const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Chunked whole-file digest: 1 MiB chunks over the entry section, the
/// central directory and the end-of-central-directory record (with the
/// central directory offset replaced by the signing block offset so the
/// digest is independent of the block's size).
pub(crate) fn chunked_digest<R: Read + Seek>(
    r: &mut R,
    entries_end: u64,
    cd: &[u8],
    eocd: &[u8],
) -> Result<[u8; 32]> {
    let mut chunks: Vec<[u8; 32]> = Vec::new();
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; MAX_CHUNK_SIZE];

    r.rewind()?;
    let mut pos = 0u64;
    while pos < entries_end {
        let len = ((entries_end - pos) as usize).min(MAX_CHUNK_SIZE);
        r.read_exact(&mut buffer[..len])?;
        hasher.update([0xa5]);
        hasher.update((len as u32).to_le_bytes());
        hasher.update(&buffer[..len]);
        chunks.push(hasher.finalize_reset().into());
        pos += len as u64;
    }

    for part in cd.chunks(MAX_CHUNK_SIZE) {
        hasher.update([0xa5]);
        hasher.update((part.len() as u32).to_le_bytes());
        hasher.update(part);
        chunks.push(hasher.finalize_reset().into());
    }

    let mut eocd = eocd.to_vec();
    if eocd.len() >= 20 {
        eocd[16..20].copy_from_slice(&(entries_end as u32).to_le_bytes());
    }
    for part in eocd.chunks(MAX_CHUNK_SIZE) {
        hasher.update([0xa5]);
        hasher.update((part.len() as u32).to_le_bytes());
        hasher.update(part);
        chunks.push(hasher.finalize_reset().into());
    }

    hasher.update([0x5a]);
    hasher.update((chunks.len() as u32).to_le_bytes());
    for chunk in &chunks {
        hasher.update(chunk);
    }
    Ok(hasher.finalize().into())
}

/// The complete signing block for the given root digest, ready to be
/// written between the last entry and the central directory.
pub(crate) fn signing_block(identity: &SigningIdentity, digest: [u8; 32]) -> Result<Vec<u8>> {
    let mut signed_data = Vec::new();
    write_signed_data(&mut signed_data, identity, digest)?;
    let signature = identity.sign(&signed_data)?;
    let public_key = identity.public_key_der()?;

    let mut signer = Vec::new();
    signer.write_u32::<LittleEndian>(signed_data.len() as u32)?;
    signer.extend_from_slice(&signed_data);
    signer.write_u32::<LittleEndian>(signature.len() as u32 + 12)?;
    signer.write_u32::<LittleEndian>(signature.len() as u32 + 8)?;
    signer.write_u32::<LittleEndian>(RSA_PKCS1V15_SHA2_256)?;
    signer.write_u32::<LittleEndian>(signature.len() as u32)?;
    signer.extend_from_slice(&signature);
    signer.write_u32::<LittleEndian>(public_key.len() as u32)?;
    signer.extend_from_slice(&public_key);

    let mut value = Vec::new();
    value.write_u32::<LittleEndian>(signer.len() as u32 + 4)?;
    value.write_u32::<LittleEndian>(signer.len() as u32)?;
    value.extend_from_slice(&signer);

    let size = value.len() as u64 + 36;
    let mut block = Vec::with_capacity(size as usize + 8);
    block.write_u64::<LittleEndian>(size)?;
    block.write_u64::<LittleEndian>(value.len() as u64 + 4)?;
    block.write_u32::<LittleEndian>(SIGNING_BLOCK_V2_ID)?;
    block.extend_from_slice(&value);
    block.write_u64::<LittleEndian>(size)?;
    block.extend_from_slice(SIGNING_BLOCK_MAGIC);
    Ok(block)
}

fn write_signed_data(
    w: &mut Vec<u8>,
    identity: &SigningIdentity,
    digest: [u8; 32],
) -> Result<()> {
    let cert = identity.leaf_certificate_der()?;
    w.write_u32::<LittleEndian>(digest.len() as u32 + 12)?;
    w.write_u32::<LittleEndian>(digest.len() as u32 + 8)?;
    w.write_u32::<LittleEndian>(RSA_PKCS1V15_SHA2_256)?;
    w.write_u32::<LittleEndian>(digest.len() as u32)?;
    w.extend_from_slice(&digest);
    w.write_u32::<LittleEndian>(cert.len() as u32 + 4)?;
    w.write_u32::<LittleEndian>(cert.len() as u32)?;
    w.extend_from_slice(&cert);
    w.write_u32::<LittleEndian>(0)?; // additional attributes
    Ok(())
}

#[derive(Debug, Default)]
struct BlockDigest {
    algorithm: u32,
    digest: Vec<u8>,
}

#[derive(Debug, Default)]
struct BlockSignedData {
    digests: Vec<BlockDigest>,
    certificates: Vec<Vec<u8>>,
}

impl BlockSignedData {
    fn read(r: &mut impl Read) -> Result<Self> {
        let mut out = BlockSignedData::default();
        let mut remaining = r.read_u32::<LittleEndian>()?;
        while remaining > 0 {
            let size = r.read_u32::<LittleEndian>()?;
            let algorithm = r.read_u32::<LittleEndian>()?;
            let len = r.read_u32::<LittleEndian>()?;
            let mut digest = vec![0; len as usize];
            r.read_exact(&mut digest)?;
            out.digests.push(BlockDigest { algorithm, digest });
            remaining -= size + 4;
        }
        let mut remaining = r.read_u32::<LittleEndian>()?;
        while remaining > 0 {
            let len = r.read_u32::<LittleEndian>()?;
            let mut cert = vec![0; len as usize];
            r.read_exact(&mut cert)?;
            out.certificates.push(cert);
            remaining -= len + 4;
        }
        Ok(out)
    }
}

#[derive(Debug)]
struct BlockSigner {
    signed_data: Vec<u8>,
    signatures: Vec<(u32, Vec<u8>)>,
    public_key: Vec<u8>,
}

fn read_signers(r: &mut impl Read) -> Result<Vec<BlockSigner>> {
    let mut signers = Vec::new();
    let mut remaining = r.read_u32::<LittleEndian>()? as u64;
    while remaining > 0 {
        let signer_size = r.read_u32::<LittleEndian>()?;

        let signed_data_size = r.read_u32::<LittleEndian>()?;
        let mut signed_data = vec![0; signed_data_size as usize];
        r.read_exact(&mut signed_data)?;

        let mut signatures = Vec::new();
        let mut sig_remaining = r.read_u32::<LittleEndian>()?;
        while sig_remaining > 0 {
            let signature_size = r.read_u32::<LittleEndian>()?;
            let algorithm = r.read_u32::<LittleEndian>()?;
            let len = r.read_u32::<LittleEndian>()?;
            let mut signature = vec![0; len as usize];
            r.read_exact(&mut signature)?;
            signatures.push((algorithm, signature));
            sig_remaining -= signature_size + 4;
        }

        let public_key_size = r.read_u32::<LittleEndian>()?;
        let mut public_key = vec![0; public_key_size as usize];
        r.read_exact(&mut public_key)?;

        signers.push(BlockSigner {
            signed_data,
            signatures,
            public_key,
        });
        remaining -= signer_size as u64 + 4;
    }
    Ok(signers)
}

struct BlockLayout {
    blocks: Vec<(u32, u64)>,
    sb_start: u64,
    cd_start: u64,
    cde_start: u64,
}

fn find_cde_start<R: Read + Seek>(r: &mut R) -> Result<u64> {
    const CENTRAL_DIRECTORY_END_SIGNATURE: u32 = 0x06054b50;
    const EOCD_SIZE: u64 = 22;
    let file_length = r.seek(SeekFrom::End(0))?;
    if file_length < EOCD_SIZE {
        return Err(Error::SigningFailure("no end of central directory".into()));
    }
    let lower_bound = file_length.saturating_sub(EOCD_SIZE + u16::MAX as u64);
    let mut pos = file_length - EOCD_SIZE;
    while pos >= lower_bound {
        r.seek(SeekFrom::Start(pos))?;
        if r.read_u32::<LittleEndian>()? == CENTRAL_DIRECTORY_END_SIGNATURE {
            return Ok(pos);
        }
        pos = match pos.checked_sub(1) {
            Some(p) => p,
            None => break,
        };
    }
    Err(Error::SigningFailure("no end of central directory".into()))
}

fn parse_block_layout<R: Read + Seek>(r: &mut R) -> Result<BlockLayout> {
    let cde_start = find_cde_start(r)?;
    r.seek(SeekFrom::Start(cde_start + 16))?;
    let cd_start = r.read_u32::<LittleEndian>()? as u64;
    let mut layout = BlockLayout {
        blocks: Vec::new(),
        sb_start: cd_start,
        cd_start,
        cde_start,
    };
    if cd_start < 24 {
        return Ok(layout);
    }
    r.seek(SeekFrom::Start(cd_start - 16 - 8))?;
    let mut remaining = r.read_u64::<LittleEndian>()?;
    let mut magic = [0u8; 16];
    r.read_exact(&mut magic)?;
    if magic != SIGNING_BLOCK_MAGIC {
        return Ok(layout);
    }
    let first_pair = cd_start.saturating_sub(remaining);
    layout.sb_start = first_pair.saturating_sub(8);
    let mut pos = r.seek(SeekFrom::Start(first_pair))?;
    // walk the id/value pairs; the trailing size+magic take the last 24
    while remaining > 24 {
        let length = r.read_u64::<LittleEndian>()?;
        let id = r.read_u32::<LittleEndian>()?;
        layout.blocks.push((id, pos + 8 + 4));
        pos = r.seek(SeekFrom::Start(pos + length + 8))?;
        remaining -= length + 8;
    }
    Ok(layout)
}

/// Verifies the whole-file scheme and returns the signer certificates.
pub(crate) fn verify(path: &Path) -> Result<Vec<Certificate>> {
    let file = File::open(path)?;
    let mut r = BufReader::new(file);
    let layout = parse_block_layout(&mut r)?;
    let block = layout
        .blocks
        .iter()
        .find(|(id, _)| *id == SIGNING_BLOCK_V2_ID)
        .ok_or_else(|| Error::SigningFailure("no v2 signing block".into()))?;

    r.seek(SeekFrom::Start(block.1))?;
    let signers = read_signers(&mut r)?;
    if signers.is_empty() {
        return Err(Error::SigningFailure("no signers in v2 block".into()));
    }

    let mut cd = vec![0u8; (layout.cde_start - layout.cd_start) as usize];
    r.seek(SeekFrom::Start(layout.cd_start))?;
    r.read_exact(&mut cd)?;
    let mut eocd = Vec::new();
    r.seek(SeekFrom::Start(layout.cde_start))?;
    r.read_to_end(&mut eocd)?;
    let computed = chunked_digest(&mut r, layout.sb_start, &cd, &eocd)?;

    let mut certificates = Vec::new();
    for signer in &signers {
        if signer.signatures.is_empty() {
            return Err(Error::SigningFailure("signer without signatures".into()));
        }
        for (algorithm, signature) in &signer.signatures {
            if *algorithm != RSA_PKCS1V15_SHA2_256 {
                return Err(Error::SigningFailure(format!(
                    "unsupported signature algorithm 0x{algorithm:x}"
                )));
            }
            let pubkey = RsaPublicKey::from_public_key_der(&signer.public_key)
                .map_err(|e| Error::SigningFailure(format!("{e}")))?;
            let padding = PaddingScheme::new_pkcs1v15_sign::<Sha256>();
            pubkey
                .verify(padding, &Sha256::digest(&signer.signed_data), signature)
                .map_err(|_| Error::SigningFailure("v2 signature verification failed".into()))?;
        }
        let signed_data = BlockSignedData::read(&mut Cursor::new(&signer.signed_data[..]))?;
        if signed_data.digests.is_empty() {
            return Err(Error::SigningFailure("no digests in v2 block".into()));
        }
        for digest in &signed_data.digests {
            if digest.algorithm != RSA_PKCS1V15_SHA2_256 {
                return Err(Error::SigningFailure(format!(
                    "unsupported digest algorithm 0x{:x}",
                    digest.algorithm
                )));
            }
            if digest.digest != computed {
                return Err(Error::SigningFailure(
                    "computed digest doesn't match signed digest".into(),
                ));
            }
        }
        for cert in &signed_data.certificates {
            certificates.push(
                rasn::der::decode::<Certificate>(cert)
                    .map_err(|e| Error::SigningFailure(format!("{e}")))?,
            );
        }
    }
    Ok(certificates)
}

/// Der bytes of the first signer certificate in the v2 block, if the file
/// carries one. Used to fingerprint the original application signature.
pub(crate) fn extract_signer_certificate(path: &Path) -> Result<Option<Vec<u8>>> {
    let file = File::open(path)?;
    let mut r = BufReader::new(file);
    let layout = parse_block_layout(&mut r)?;
    let Some(block) = layout
        .blocks
        .iter()
        .find(|(id, _)| *id == SIGNING_BLOCK_V2_ID)
    else {
        return Ok(None);
    };
    r.seek(SeekFrom::Start(block.1))?;
    let signers = read_signers(&mut r)?;
    let Some(signer) = signers.first() else {
        return Ok(None);
    };
    let signed_data = BlockSignedData::read(&mut Cursor::new(&signer.signed_data[..]))?;
    Ok(signed_data.certificates.first().cloned())
}
