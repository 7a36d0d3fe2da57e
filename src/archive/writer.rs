use crate::error::Error;
use crate::sign::ApkSigner;
use crate::Result;
use byteorder::{LittleEndian, WriteBytesExt};
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::SourceApk;

const LOCAL_HEADER_SIGNATURE: u32 = 0x04034b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x02014b50;
const CENTRAL_DIRECTORY_END_SIGNATURE: u32 = 0x06054b50;
const VERSION_NEEDED: u16 = 20;
// Fixed timestamp (1980-01-01) keeps output byte-for-byte reproducible.
const DOS_TIME: u16 = 0;
const DOS_DATE: u16 = 0x0021;
// Extra-field id used by zipalign for padding runs.
const ALIGNMENT_EXTRA_ID: u16 = 0xd935;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Alignment policy applied on [`WorkArchive::realign`]: entries whose name
/// matches a suffix or exact-path rule start at offsets divisible by the
/// configured power of two, everything else is packed densely.
#[derive(Clone, Debug, Default)]
pub struct AlignmentRules {
    suffixes: Vec<(String, u64)>,
    paths: Vec<(String, u64)>,
}

impl AlignmentRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant_for_suffix(mut self, suffix: &str, alignment: u64) -> Self {
        debug_assert!(alignment.is_power_of_two());
        self.suffixes.push((suffix.to_string(), alignment));
        self
    }

    pub fn constant_for_path(mut self, path: &str, alignment: u64) -> Self {
        debug_assert!(alignment.is_power_of_two());
        self.paths.push((path.to_string(), alignment));
        self
    }

    fn alignment_for(&self, name: &str) -> Option<u64> {
        self.paths
            .iter()
            .find(|(p, _)| p == name)
            .or_else(|| self.suffixes.iter().find(|(s, _)| name.ends_with(s)))
            .map(|(_, a)| *a)
    }
}

enum EntrySource {
    Bytes(Vec<u8>),
    /// Streamed from disk at finalize time, always stored uncompressed.
    File(PathBuf),
    /// Raw pass-through from the attached source archive.
    Linked { index: usize },
}

struct PlannedEntry {
    name: String,
    source: EntrySource,
    compress: bool,
}

struct CentralRecord {
    name: String,
    method: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    offset: u64,
}

/// The output apk under construction.
///
/// Entries are planned in insertion order and only hit the disk in
/// [`WorkArchive::close`], which streams them into a private temporary file,
/// runs the registered signer and atomically renames the result over the
/// destination. Dropping the archive without closing leaves the destination
/// untouched.
pub struct WorkArchive<'s> {
    dest: PathBuf,
    tmp: NamedTempFile,
    entries: Vec<PlannedEntry>,
    index: HashMap<String, usize>,
    rules: AlignmentRules,
    aligned: bool,
    signer: Option<ApkSigner>,
    source: Option<&'s mut SourceApk>,
}

impl<'s> WorkArchive<'s> {
    /// Creates a working archive that will finally replace `dest`. The
    /// temporary file lives next to `dest` so the rename stays on one
    /// filesystem.
    pub fn create(dest: &Path, rules: AlignmentRules) -> Result<Self> {
        let dir = dest.parent().filter(|p| !p.as_os_str().is_empty());
        let tmp = tempfile::Builder::new()
            .prefix("mrv-")
            .suffix("-internal")
            .tempfile_in(dir.unwrap_or_else(|| Path::new(".")))?;
        Ok(Self {
            dest: dest.to_path_buf(),
            tmp,
            entries: Vec::new(),
            index: HashMap::new(),
            rules,
            aligned: false,
            signer: None,
            source: None,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Inserts or replaces an entry with in-memory content.
    pub fn add_bytes(&mut self, name: &str, bytes: Vec<u8>, compress: bool) {
        self.insert(PlannedEntry {
            name: name.to_string(),
            source: EntrySource::Bytes(bytes),
            compress,
        });
    }

    pub fn delete(&mut self, name: &str) {
        if let Some(i) = self.index.remove(name) {
            self.entries.remove(i);
            self.reindex();
        }
    }

    /// Attaches the source archive all subsequent links resolve against.
    /// The borrow keeps the handle open until the output is finalized.
    pub fn attach_source(&mut self, source: &'s mut SourceApk) {
        self.source = Some(source);
    }

    /// Embeds the complete source archive as one opaque stored entry at
    /// `target_name` and attaches it for linking.
    pub fn mount_as_asset(&mut self, target_name: &str, source: &'s mut SourceApk) {
        self.insert(PlannedEntry {
            name: target_name.to_string(),
            source: EntrySource::File(source.path().to_path_buf()),
            compress: false,
        });
        self.attach_source(source);
    }

    /// Links `source_name` from the attached source archive under `name`,
    /// reusing its still-compressed bytes. Skipped (returns `false`) when
    /// `name` is already present: the first explicit writer wins.
    pub fn link_entry(&mut self, name: &str, source_name: &str) -> Result<bool> {
        if self.index.contains_key(name) {
            return Ok(false);
        }
        let source = self.source.as_deref().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no source archive attached",
            ))
        })?;
        let index = source.entry_index(source_name).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no entry '{source_name}' in source archive"),
            ))
        })?;
        self.insert(PlannedEntry {
            name: name.to_string(),
            source: EntrySource::Linked { index },
            compress: false,
        });
        Ok(true)
    }

    /// Applies the alignment rules to the final layout.
    pub fn realign(&mut self) {
        self.aligned = true;
    }

    /// Attaches the finalize-time signing hook. Must be the last
    /// registration before [`WorkArchive::close`].
    pub fn register_signer(&mut self, signer: ApkSigner) {
        self.signer = Some(signer);
    }

    fn insert(&mut self, entry: PlannedEntry) {
        match self.index.get(&entry.name) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index.insert(entry.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, e) in self.entries.iter().enumerate() {
            self.index.insert(e.name.clone(), i);
        }
    }

    /// Streams all planned entries into the temporary file, appends the v1
    /// signature entries and the v2 signing block when a signer is
    /// registered, writes the central directory and atomically renames the
    /// result over the destination.
    pub fn close(self) -> Result<()> {
        let WorkArchive {
            dest,
            mut tmp,
            entries,
            rules,
            aligned,
            signer,
            mut source,
            ..
        } = self;

        let mut records = Vec::with_capacity(entries.len() + 3);
        {
            let out = tmp.as_file_mut();
            for entry in &entries {
                let record = write_entry(out, entry, &rules, aligned, source.as_deref_mut())?;
                records.push(record);
            }

            if let Some(signer) = &signer {
                tracing::debug!("signing {} entries", records.len());
                let digests = entry_digests(&entries, source.as_deref_mut())?;
                for (name, bytes) in signer.v1_signature_entries(&digests)? {
                    let planned = PlannedEntry {
                        name,
                        source: EntrySource::Bytes(bytes),
                        compress: true,
                    };
                    records.push(write_entry(out, &planned, &rules, aligned, None)?);
                }

                let entries_end = out.stream_position()?;
                let cd = central_directory(&records)?;
                let eocd = end_of_central_directory(records.len(), cd.len() as u64, entries_end)?;
                let digest = crate::sign::v2::chunked_digest(out, entries_end, &cd, &eocd)?;
                let block = signer.signing_block(digest)?;
                out.seek(SeekFrom::Start(entries_end))?;
                out.write_all(&block)?;
                out.write_all(&cd)?;
                let eocd = end_of_central_directory(
                    records.len(),
                    cd.len() as u64,
                    entries_end + block.len() as u64,
                )?;
                out.write_all(&eocd)?;
            } else {
                let entries_end = out.stream_position()?;
                let cd = central_directory(&records)?;
                out.write_all(&cd)?;
                let eocd = end_of_central_directory(records.len(), cd.len() as u64, entries_end)?;
                out.write_all(&eocd)?;
            }
            out.flush()?;
        }

        tmp.persist(&dest).map_err(|e| Error::Io(e.error))?;
        tracing::debug!("wrote {}", dest.display());
        Ok(())
    }
}

/// Lays out one entry: local header (with alignment padding in the extra
/// field when a rule matches), then the entry data.
fn write_entry(
    out: &mut File,
    entry: &PlannedEntry,
    rules: &AlignmentRules,
    aligned: bool,
    source: Option<&mut SourceApk>,
) -> Result<CentralRecord> {
    let offset = out.stream_position()?;
    let name_bytes = entry.name.as_bytes();
    let alignment = if aligned {
        rules.alignment_for(&entry.name)
    } else {
        None
    };
    let extra = padding_extra(offset, name_bytes.len(), alignment);

    let header_at = |record: &CentralRecord, out: &mut File| -> Result<()> {
        out.write_u32::<LittleEndian>(LOCAL_HEADER_SIGNATURE)?;
        out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        out.write_u16::<LittleEndian>(0)?; // general purpose flags
        out.write_u16::<LittleEndian>(record.method)?;
        out.write_u16::<LittleEndian>(DOS_TIME)?;
        out.write_u16::<LittleEndian>(DOS_DATE)?;
        out.write_u32::<LittleEndian>(record.crc32)?;
        out.write_u32::<LittleEndian>(record.compressed_size as u32)?;
        out.write_u32::<LittleEndian>(record.uncompressed_size as u32)?;
        out.write_u16::<LittleEndian>(name_bytes.len() as u16)?;
        out.write_u16::<LittleEndian>(extra.len() as u16)?;
        out.write_all(name_bytes)?;
        out.write_all(&extra)?;
        Ok(())
    };

    match &entry.source {
        EntrySource::Bytes(bytes) => {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(bytes);
            let crc32 = hasher.finalize();
            let (method, data) = if entry.compress {
                (METHOD_DEFLATED, deflate(bytes)?)
            } else {
                (METHOD_STORED, bytes.clone())
            };
            let record = CentralRecord {
                name: entry.name.clone(),
                method,
                crc32,
                compressed_size: data.len() as u64,
                uncompressed_size: bytes.len() as u64,
                offset,
            };
            header_at(&record, out)?;
            out.write_all(&data)?;
            Ok(record)
        }
        EntrySource::File(path) => {
            // Stored streaming copy; the crc is back-patched once known.
            let size = std::fs::metadata(path)?.len();
            let mut record = CentralRecord {
                name: entry.name.clone(),
                method: METHOD_STORED,
                crc32: 0,
                compressed_size: size,
                uncompressed_size: size,
                offset,
            };
            header_at(&record, out)?;
            let mut reader = File::open(path)?;
            let mut hasher = crc32fast::Hasher::new();
            let mut buf = vec![0u8; COPY_BUFFER_SIZE];
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                out.write_all(&buf[..n])?;
            }
            record.crc32 = hasher.finalize();
            let end = out.stream_position()?;
            out.seek(SeekFrom::Start(offset + 14))?;
            out.write_u32::<LittleEndian>(record.crc32)?;
            out.seek(SeekFrom::Start(end))?;
            Ok(record)
        }
        EntrySource::Linked { index } => {
            let source = source.ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "source archive detached before finalize",
                ))
            })?;
            let mut raw = source.archive_mut().by_index_raw(*index)?;
            let record = CentralRecord {
                name: entry.name.clone(),
                method: method_code(raw.compression())?,
                crc32: raw.crc32(),
                compressed_size: raw.compressed_size(),
                uncompressed_size: raw.size(),
                offset,
            };
            header_at(&record, out)?;
            std::io::copy(&mut raw, out)?;
            Ok(record)
        }
    }
}

/// Sha-256 of every planned entry's uncompressed content, in layout order.
/// Linked entries are re-read (decompressed) from the source archive.
fn entry_digests(
    entries: &[PlannedEntry],
    mut source: Option<&mut SourceApk>,
) -> Result<Vec<(String, [u8; 32])>> {
    let mut digests = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut hasher = Sha256::new();
        match &entry.source {
            EntrySource::Bytes(bytes) => hasher.update(bytes),
            EntrySource::File(path) => {
                let mut reader = File::open(path)?;
                let mut buf = vec![0u8; COPY_BUFFER_SIZE];
                loop {
                    let n = reader.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
            }
            EntrySource::Linked { index } => {
                let source = source.as_deref_mut().ok_or_else(|| {
                    Error::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "source archive detached before finalize",
                    ))
                })?;
                let mut reader = source.archive_mut().by_index(*index)?;
                let mut buf = vec![0u8; COPY_BUFFER_SIZE];
                loop {
                    let n = reader.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
            }
        }
        digests.push((entry.name.clone(), hasher.finalize().into()));
    }
    Ok(digests)
}

fn deflate(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

fn method_code(method: zip::CompressionMethod) -> Result<u16> {
    match method {
        zip::CompressionMethod::Stored => Ok(METHOD_STORED),
        zip::CompressionMethod::Deflated => Ok(METHOD_DEFLATED),
        _ => Err(Error::Zip(zip::result::ZipError::UnsupportedArchive(
            "unsupported compression method in source entry",
        ))),
    }
}

/// Padding run that makes the entry data start on `alignment`. Encoded as a
/// zipalign extra field so strict extra-field parsers stay happy.
fn padding_extra(offset: u64, name_len: usize, alignment: Option<u64>) -> Vec<u8> {
    let Some(alignment) = alignment else {
        return Vec::new();
    };
    let data_start = offset + 30 + name_len as u64;
    let mut pad = (alignment - data_start % alignment) % alignment;
    if pad == 0 {
        return Vec::new();
    }
    if pad < 4 {
        pad += alignment;
    }
    let mut extra = Vec::with_capacity(pad as usize);
    extra.extend_from_slice(&ALIGNMENT_EXTRA_ID.to_le_bytes());
    extra.extend_from_slice(&((pad - 4) as u16).to_le_bytes());
    extra.resize(pad as usize, 0);
    extra
}

fn central_directory(records: &[CentralRecord]) -> Result<Vec<u8>> {
    let mut cd = Vec::new();
    for record in records {
        cd.write_u32::<LittleEndian>(CENTRAL_HEADER_SIGNATURE)?;
        cd.write_u16::<LittleEndian>(VERSION_NEEDED)?; // version made by
        cd.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        cd.write_u16::<LittleEndian>(0)?; // general purpose flags
        cd.write_u16::<LittleEndian>(record.method)?;
        cd.write_u16::<LittleEndian>(DOS_TIME)?;
        cd.write_u16::<LittleEndian>(DOS_DATE)?;
        cd.write_u32::<LittleEndian>(record.crc32)?;
        cd.write_u32::<LittleEndian>(record.compressed_size as u32)?;
        cd.write_u32::<LittleEndian>(record.uncompressed_size as u32)?;
        cd.write_u16::<LittleEndian>(record.name.len() as u16)?;
        cd.write_u16::<LittleEndian>(0)?; // extra length
        cd.write_u16::<LittleEndian>(0)?; // comment length
        cd.write_u16::<LittleEndian>(0)?; // disk number start
        cd.write_u16::<LittleEndian>(0)?; // internal attributes
        cd.write_u32::<LittleEndian>(0)?; // external attributes
        cd.write_u32::<LittleEndian>(record.offset as u32)?;
        cd.write_all(record.name.as_bytes())?;
    }
    Ok(cd)
}

fn end_of_central_directory(count: usize, cd_size: u64, cd_offset: u64) -> Result<Vec<u8>> {
    let mut eocd = Vec::with_capacity(22);
    eocd.write_u32::<LittleEndian>(CENTRAL_DIRECTORY_END_SIGNATURE)?;
    eocd.write_u16::<LittleEndian>(0)?; // disk number
    eocd.write_u16::<LittleEndian>(0)?; // central directory disk
    eocd.write_u16::<LittleEndian>(count as u16)?;
    eocd.write_u16::<LittleEndian>(count as u16)?;
    eocd.write_u32::<LittleEndian>(cd_size as u32)?;
    eocd.write_u32::<LittleEndian>(cd_offset as u32)?;
    eocd.write_u16::<LittleEndian>(0)?; // comment length
    Ok(eocd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    fn so_rules() -> AlignmentRules {
        AlignmentRules::new().constant_for_suffix(".so", 4096)
    }

    fn write_sample(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut work = WorkArchive::create(&path, AlignmentRules::new()).unwrap();
        work.add_bytes("AndroidManifest.xml", b"not-really-a-manifest".to_vec(), true);
        work.add_bytes("classes.dex", vec![0xde, 0xca, 0xff, 0xed], true);
        work.add_bytes("assets/data.bin", vec![7u8; 5000], true);
        work.add_bytes("lib/x86/libnative.so", vec![0x7f, b'E', b'L', b'F'], false);
        work.close().unwrap();
        path
    }

    #[test]
    fn should_write_archives_the_zip_crate_can_read_back() {
        let dir = tempdir().unwrap();
        let path = write_sample(dir.path(), "sample.apk");
        let mut apk = SourceApk::open(&path).unwrap();
        assert_eq!(apk.names().len(), 4);
        assert_eq!(
            apk.read("AndroidManifest.xml").unwrap().unwrap(),
            b"not-really-a-manifest"
        );
        assert_eq!(apk.read("assets/data.bin").unwrap().unwrap(), vec![7u8; 5000]);
    }

    #[test]
    fn should_align_matching_entries_to_the_configured_boundary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aligned.apk");
        let mut work = WorkArchive::create(&path, so_rules()).unwrap();
        work.add_bytes("a.txt", vec![1, 2, 3], true);
        work.add_bytes("lib/arm64-v8a/libmrv.so", vec![9u8; 300], false);
        work.add_bytes("b.txt", vec![4, 5], true);
        work.add_bytes("lib/x86/libmrv.so", vec![8u8; 300], false);
        work.realign();
        work.close().unwrap();

        let file = File::open(&path).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        for i in 0..zip.len() {
            let entry = zip.by_index(i).unwrap();
            if entry.name().ends_with(".so") {
                assert_eq!(
                    entry.data_start() % 4096,
                    0,
                    "{} starts at {}",
                    entry.name(),
                    entry.data_start()
                );
            }
        }
    }

    #[test]
    fn should_round_trip_linked_entries_byte_identically() {
        let dir = tempdir().unwrap();
        let source_path = write_sample(dir.path(), "source.apk");
        let mut source = SourceApk::open(&source_path).unwrap();
        let expected = source.read("assets/data.bin").unwrap().unwrap();

        let out_path = dir.path().join("out.apk");
        let mut work = WorkArchive::create(&out_path, so_rules()).unwrap();
        work.attach_source(&mut source);
        assert!(work.link_entry("assets/data.bin", "assets/data.bin").unwrap());
        assert!(work
            .link_entry("lib/x86/libnative.so", "lib/x86/libnative.so")
            .unwrap());
        work.realign();
        work.close().unwrap();

        let mut out = SourceApk::open(&out_path).unwrap();
        assert_eq!(out.read("assets/data.bin").unwrap().unwrap(), expected);
        assert_eq!(
            out.read("lib/x86/libnative.so").unwrap().unwrap(),
            vec![0x7f, b'E', b'L', b'F']
        );
    }

    #[test]
    fn should_let_explicit_entries_win_over_links() {
        let dir = tempdir().unwrap();
        let source_path = write_sample(dir.path(), "source.apk");
        let mut source = SourceApk::open(&source_path).unwrap();

        let out_path = dir.path().join("out.apk");
        let mut work = WorkArchive::create(&out_path, AlignmentRules::new()).unwrap();
        work.add_bytes("classes.dex", b"replacement".to_vec(), true);
        work.attach_source(&mut source);
        assert!(!work.link_entry("classes.dex", "classes.dex").unwrap());
        work.close().unwrap();

        let mut out = SourceApk::open(&out_path).unwrap();
        assert_eq!(out.read("classes.dex").unwrap().unwrap(), b"replacement");
    }

    #[test]
    fn should_embed_the_whole_source_as_one_stored_entry() {
        let dir = tempdir().unwrap();
        let source_path = write_sample(dir.path(), "source.apk");
        let raw = std::fs::read(&source_path).unwrap();
        let mut source = SourceApk::open(&source_path).unwrap();

        let out_path = dir.path().join("out.apk");
        let rules = AlignmentRules::new().constant_for_path("assets/mrv/origin.apk", 4096);
        let mut work = WorkArchive::create(&out_path, rules).unwrap();
        work.mount_as_asset("assets/mrv/origin.apk", &mut source);
        work.realign();
        work.close().unwrap();

        let file = File::open(&out_path).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        let mut entry = zip.by_name("assets/mrv/origin.apk").unwrap();
        assert_eq!(entry.data_start() % 4096, 0);
        let mut embedded = Vec::new();
        entry.read_to_end(&mut embedded).unwrap();
        assert_eq!(embedded, raw);
    }

    #[test]
    fn should_not_touch_the_destination_until_close_succeeds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never.apk");
        {
            let mut work = WorkArchive::create(&path, AlignmentRules::new()).unwrap();
            work.add_bytes("a", vec![1], false);
            // dropped without close
        }
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn should_replace_entries_added_twice() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dup.apk");
        let mut work = WorkArchive::create(&path, AlignmentRules::new()).unwrap();
        work.add_bytes("a", b"first".to_vec(), true);
        work.add_bytes("a", b"second".to_vec(), true);
        work.close().unwrap();
        let mut out = SourceApk::open(&path).unwrap();
        assert_eq!(out.names().len(), 1);
        assert_eq!(out.read("a").unwrap().unwrap(), b"second");
    }

    #[test]
    fn should_drop_deleted_entries_from_the_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trimmed.apk");
        let mut work = WorkArchive::create(&path, AlignmentRules::new()).unwrap();
        work.add_bytes("keep.txt", b"keep".to_vec(), true);
        work.add_bytes("drop.txt", b"drop".to_vec(), true);
        work.delete("drop.txt");
        work.delete("never-added.txt");
        work.close().unwrap();
        let mut out = SourceApk::open(&path).unwrap();
        assert_eq!(out.names(), vec!["keep.txt".to_string()]);
        assert_eq!(out.read("keep.txt").unwrap().unwrap(), b"keep");
    }

    #[test]
    fn should_reject_files_without_a_central_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.apk");
        std::fs::write(&path, b"definitely not a zip file").unwrap();
        match SourceApk::open(&path) {
            Err(Error::NotAnArchive(name)) => assert_eq!(name, "garbage.apk"),
            other => panic!("expected NotAnArchive, got {other:?}"),
        }
    }
}
