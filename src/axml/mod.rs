//! Binary manifest (compiled XML) parsing and re-serialization.
//!
//! Only the chunk families an application manifest actually contains are
//! modeled: the string pool, the attribute resource map, namespace records
//! and element records. The document is parsed into a typed element tree,
//! edited in place, and re-encoded with a deterministically rebuilt string
//! pool. Resource tables and style spans are out of scope.

mod editor;

pub use editor::{query_identity, ManifestIdentity};

#[cfg(test)]
pub(crate) use editor::tests::sample_manifest;

use crate::error::Error;
use crate::Result;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Seek, SeekFrom, Write};

pub const ANDROID_NAMESPACE: &str = "http://schemas.android.com/apk/res/android";

const CHUNK_STRING_POOL: u16 = 0x0001;
const CHUNK_XML: u16 = 0x0003;
const CHUNK_START_NAMESPACE: u16 = 0x0100;
const CHUNK_END_NAMESPACE: u16 = 0x0101;
const CHUNK_START_ELEMENT: u16 = 0x0102;
const CHUNK_END_ELEMENT: u16 = 0x0103;
const CHUNK_RESOURCE_MAP: u16 = 0x0180;

const UTF8_FLAG: u32 = 1 << 8;

const TYPE_REFERENCE: u8 = 0x01;
const TYPE_STRING: u8 = 0x03;
const TYPE_INT_DEC: u8 = 0x10;
const TYPE_INT_HEX: u8 = 0x11;
const TYPE_INT_BOOLEAN: u8 = 0x12;

/// Attribute resource ids for the handful of attributes this tool touches.
pub const RES_ID_NAME: u32 = 0x0101_0003;
pub const RES_ID_VALUE: u32 = 0x0101_0024;
pub const RES_ID_APP_COMPONENT_FACTORY: u32 = 0x0101_057a;

pub(crate) fn well_known_resource_id(name: &str) -> Option<u32> {
    match name {
        "name" => Some(RES_ID_NAME),
        "value" => Some(RES_ID_VALUE),
        "appComponentFactory" => Some(RES_ID_APP_COMPONENT_FACTORY),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct ChunkHeader {
    ty: u16,
    header_size: u16,
    size: u32,
}

impl ChunkHeader {
    fn read(r: &mut Cursor<&[u8]>) -> Result<Self> {
        let ty = r.read_u16::<LittleEndian>()?;
        let header_size = r.read_u16::<LittleEndian>()?;
        let size = r.read_u32::<LittleEndian>()?;
        Ok(Self {
            ty,
            header_size,
            size,
        })
    }
}

/// A typed attribute value. The encoded form is the 8-byte `Res_value`
/// record: size, reserved byte, type, and a 4-byte payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypedValue {
    Str(String),
    Reference(u32),
    IntDec(i32),
    IntHex(u32),
    Boolean(bool),
    /// Anything this tool has no reason to interpret, kept verbatim.
    Raw { data_type: u8, data: u32 },
}

impl TypedValue {
    fn data_type(&self) -> u8 {
        match self {
            TypedValue::Str(_) => TYPE_STRING,
            TypedValue::Reference(_) => TYPE_REFERENCE,
            TypedValue::IntDec(_) => TYPE_INT_DEC,
            TypedValue::IntHex(_) => TYPE_INT_HEX,
            TypedValue::Boolean(_) => TYPE_INT_BOOLEAN,
            TypedValue::Raw { data_type, .. } => *data_type,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Attribute {
    /// Namespace uri, `None` for attributes like `package`.
    pub namespace: Option<String>,
    pub name: String,
    /// Present for attributes that appear in the document's resource map.
    pub resource_id: Option<u32>,
    pub value: TypedValue,
}

#[derive(Clone, Debug, Default)]
pub struct Element {
    pub namespace: Option<String>,
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, namespace: Option<&str>, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.namespace.as_deref() == namespace && a.name == name)
    }

    pub fn attribute_mut(
        &mut self,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<&mut Attribute> {
        self.attributes
            .iter_mut()
            .find(|a| a.namespace.as_deref() == namespace && a.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }
}

/// A parsed binary manifest.
#[derive(Debug)]
pub struct ManifestDocument {
    pub root: Element,
    /// `(prefix, uri)` pairs in document order, re-emitted around the root.
    namespaces: Vec<(String, String)>,
    /// Attribute-name to resource-id pairs in original map order. The
    /// rebuilt string pool keeps these names at the front, in this order.
    resource_map: Vec<(String, u32)>,
}

impl ManifestDocument {
    /// Parses the compiled manifest. Fails with
    /// [`Error::MalformedManifest`] on a bad magic or broken structure.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(bytes);
        let header = ChunkHeader::read(&mut r).map_err(truncated)?;
        if header.ty != CHUNK_XML {
            return Err(Error::MalformedManifest(format!(
                "bad magic 0x{:04x}",
                header.ty
            )));
        }
        let end = (header.size as u64).min(bytes.len() as u64);

        let mut strings: Vec<String> = Vec::new();
        let mut raw_map: Vec<u32> = Vec::new();
        let mut namespaces: Vec<(String, String)> = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        while r.position() < end {
            let chunk_start = r.position();
            let chunk = ChunkHeader::read(&mut r).map_err(truncated)?;
            if chunk.size < 8 {
                return Err(Error::MalformedManifest("zero-size chunk".into()));
            }
            let chunk_end = chunk_start + chunk.size as u64;
            match chunk.ty {
                CHUNK_STRING_POOL => {
                    tracing::trace!("string pool");
                    strings = parse_string_pool(&mut r, bytes, chunk_start)?;
                }
                CHUNK_RESOURCE_MAP => {
                    tracing::trace!("resource map");
                    let count = (chunk.size - chunk.header_size as u32) / 4;
                    for _ in 0..count {
                        raw_map.push(r.read_u32::<LittleEndian>().map_err(truncated)?);
                    }
                }
                CHUNK_START_NAMESPACE => {
                    tracing::trace!("start namespace");
                    skip_node_header(&mut r)?;
                    let prefix = r.read_i32::<LittleEndian>().map_err(truncated)?;
                    let uri = r.read_i32::<LittleEndian>().map_err(truncated)?;
                    namespaces.push((
                        pool_string(&strings, prefix)?.unwrap_or_default(),
                        pool_string(&strings, uri)?.unwrap_or_default(),
                    ));
                }
                CHUNK_END_NAMESPACE => {
                    tracing::trace!("end namespace");
                }
                CHUNK_START_ELEMENT => {
                    tracing::trace!("start element");
                    skip_node_header(&mut r)?;
                    let element = parse_start_element(&mut r, &strings, &raw_map)?;
                    stack.push(element);
                }
                CHUNK_END_ELEMENT => {
                    tracing::trace!("end element");
                    let done = stack.pop().ok_or_else(|| {
                        Error::MalformedManifest("end element without start".into())
                    })?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(done),
                        None if root.is_none() => root = Some(done),
                        None => {
                            return Err(Error::MalformedManifest(
                                "multiple root elements".into(),
                            ))
                        }
                    }
                }
                _ => {
                    tracing::trace!("skipping chunk 0x{:04x}", chunk.ty);
                }
            }
            r.seek(SeekFrom::Start(chunk_end)).map_err(truncated)?;
        }

        let root = root.ok_or_else(|| Error::MalformedManifest("no root element".into()))?;
        let resource_map = raw_map
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                strings
                    .get(i)
                    .cloned()
                    .map(|name| (name, id))
                    .ok_or_else(|| Error::MalformedManifest("resource map out of range".into()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            root,
            namespaces,
            resource_map,
        })
    }

    /// Re-encodes the document. The string pool is rebuilt from scratch:
    /// resource-mapped attribute names first (map order), then every other
    /// string in document order, so the same tree always encodes to the
    /// same bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut resource_map = self.resource_map.clone();
        register_missing_attribute_ids(&self.root, &mut resource_map);

        let mut pool = PoolBuilder::default();
        for (name, _) in &resource_map {
            pool.intern(name);
        }
        for (prefix, uri) in &self.namespaces {
            pool.intern(prefix);
            pool.intern(uri);
        }
        pool.collect_element(&self.root);

        let mut w = Cursor::new(Vec::new());
        w.write_u16::<LittleEndian>(CHUNK_XML)?;
        w.write_u16::<LittleEndian>(8)?;
        w.write_u32::<LittleEndian>(0)?; // patched at the end

        write_string_pool(&mut w, &pool.strings)?;

        w.write_u16::<LittleEndian>(CHUNK_RESOURCE_MAP)?;
        w.write_u16::<LittleEndian>(8)?;
        w.write_u32::<LittleEndian>(8 + resource_map.len() as u32 * 4)?;
        for (_, id) in &resource_map {
            w.write_u32::<LittleEndian>(*id)?;
        }

        for (prefix, uri) in &self.namespaces {
            write_namespace_chunk(&mut w, CHUNK_START_NAMESPACE, &pool, prefix, uri)?;
        }
        write_element(&mut w, &pool, &self.root)?;
        for (prefix, uri) in self.namespaces.iter().rev() {
            write_namespace_chunk(&mut w, CHUNK_END_NAMESPACE, &pool, prefix, uri)?;
        }

        let total = w.position() as u32;
        let mut bytes = w.into_inner();
        bytes[4..8].copy_from_slice(&total.to_le_bytes());
        Ok(bytes)
    }

    pub(crate) fn register_resource_id(&mut self, name: &str, id: u32) {
        if !self.resource_map.iter().any(|(n, _)| n == name) {
            self.resource_map.push((name.to_string(), id));
        }
    }
}

fn truncated(e: impl std::fmt::Display) -> Error {
    Error::MalformedManifest(format!("truncated chunk: {e}"))
}

fn skip_node_header(r: &mut Cursor<&[u8]>) -> Result<()> {
    let _line_number = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let _comment = r.read_i32::<LittleEndian>().map_err(truncated)?;
    Ok(())
}

fn pool_string(strings: &[String], index: i32) -> Result<Option<String>> {
    if index < 0 {
        return Ok(None);
    }
    strings
        .get(index as usize)
        .cloned()
        .map(Some)
        .ok_or_else(|| Error::MalformedManifest(format!("string index {index} out of range")))
}

fn parse_start_element(
    r: &mut Cursor<&[u8]>,
    strings: &[String],
    raw_map: &[u32],
) -> Result<Element> {
    let namespace = r.read_i32::<LittleEndian>().map_err(truncated)?;
    let name = r.read_i32::<LittleEndian>().map_err(truncated)?;
    let _attribute_start = r.read_u16::<LittleEndian>().map_err(truncated)?;
    let _attribute_size = r.read_u16::<LittleEndian>().map_err(truncated)?;
    let attribute_count = r.read_u16::<LittleEndian>().map_err(truncated)?;
    let _id_index = r.read_u16::<LittleEndian>().map_err(truncated)?;
    let _class_index = r.read_u16::<LittleEndian>().map_err(truncated)?;
    let _style_index = r.read_u16::<LittleEndian>().map_err(truncated)?;

    let mut element = Element {
        namespace: pool_string(strings, namespace)?,
        name: pool_string(strings, name)?
            .ok_or_else(|| Error::MalformedManifest("unnamed element".into()))?,
        attributes: Vec::with_capacity(attribute_count as usize),
        children: Vec::new(),
    };

    for _ in 0..attribute_count {
        let namespace = r.read_i32::<LittleEndian>().map_err(truncated)?;
        let name_index = r.read_i32::<LittleEndian>().map_err(truncated)?;
        let _raw_value = r.read_i32::<LittleEndian>().map_err(truncated)?;
        let _value_size = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let _res0 = r.read_u8().map_err(truncated)?;
        let data_type = r.read_u8().map_err(truncated)?;
        let data = r.read_u32::<LittleEndian>().map_err(truncated)?;

        let name = pool_string(strings, name_index)?
            .ok_or_else(|| Error::MalformedManifest("unnamed attribute".into()))?;
        let resource_id = (name_index >= 0)
            .then(|| raw_map.get(name_index as usize).copied())
            .flatten();
        let value = match data_type {
            TYPE_STRING => TypedValue::Str(
                pool_string(strings, data as i32)?
                    .ok_or_else(|| Error::MalformedManifest("bad string value".into()))?,
            ),
            TYPE_REFERENCE => TypedValue::Reference(data),
            TYPE_INT_DEC => TypedValue::IntDec(data as i32),
            TYPE_INT_HEX => TypedValue::IntHex(data),
            TYPE_INT_BOOLEAN => TypedValue::Boolean(data != 0),
            data_type => TypedValue::Raw { data_type, data },
        };
        element.attributes.push(Attribute {
            namespace: pool_string(strings, namespace)?,
            name,
            resource_id,
            value,
        });
    }
    Ok(element)
}

fn parse_string_pool(
    r: &mut Cursor<&[u8]>,
    bytes: &[u8],
    chunk_start: u64,
) -> Result<Vec<String>> {
    let string_count = r.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let _style_count = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let flags = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let strings_start = r.read_u32::<LittleEndian>().map_err(truncated)? as u64;
    let _styles_start = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let utf8 = flags & UTF8_FLAG != 0;

    let mut offsets = Vec::with_capacity(string_count);
    for _ in 0..string_count {
        offsets.push(r.read_u32::<LittleEndian>().map_err(truncated)? as u64);
    }

    let mut strings = Vec::with_capacity(string_count);
    for offset in offsets {
        let at = chunk_start + strings_start + offset;
        if at >= bytes.len() as u64 {
            return Err(Error::MalformedManifest("string offset out of range".into()));
        }
        let mut sr = Cursor::new(bytes);
        sr.set_position(at);
        strings.push(if utf8 {
            read_utf8_string(&mut sr)?
        } else {
            read_utf16_string(&mut sr)?
        });
    }
    Ok(strings)
}

fn read_length8(r: &mut Cursor<&[u8]>) -> Result<usize> {
    let first = r.read_u8().map_err(truncated)? as usize;
    Ok(if first & 0x80 != 0 {
        (first & 0x7f) << 8 | r.read_u8().map_err(truncated)? as usize
    } else {
        first
    })
}

fn read_utf8_string(r: &mut Cursor<&[u8]>) -> Result<String> {
    let _utf16_len = read_length8(r)?;
    let byte_len = read_length8(r)?;
    let mut buf = vec![0u8; byte_len];
    std::io::Read::read_exact(r, &mut buf).map_err(truncated)?;
    String::from_utf8(buf).map_err(|_| Error::MalformedManifest("invalid utf-8 string".into()))
}

fn read_utf16_string(r: &mut Cursor<&[u8]>) -> Result<String> {
    let first = r.read_u16::<LittleEndian>().map_err(truncated)? as usize;
    let len = if first & 0x8000 != 0 {
        (first & 0x7fff) << 16 | r.read_u16::<LittleEndian>().map_err(truncated)? as usize
    } else {
        first
    };
    let mut units = Vec::with_capacity(len);
    for _ in 0..len {
        units.push(r.read_u16::<LittleEndian>().map_err(truncated)?);
    }
    String::from_utf16(&units).map_err(|_| Error::MalformedManifest("invalid utf-16 string".into()))
}

#[derive(Default)]
struct PoolBuilder {
    strings: Vec<String>,
    index: HashMap<String, u32>,
}

impl PoolBuilder {
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), i);
        i
    }

    fn get(&self, s: &str) -> i32 {
        self.index.get(s).map(|&i| i as i32).unwrap_or(-1)
    }

    fn collect_element(&mut self, element: &Element) {
        if let Some(ns) = &element.namespace {
            self.intern(ns);
        }
        self.intern(&element.name);
        for attr in &element.attributes {
            if let Some(ns) = &attr.namespace {
                self.intern(ns);
            }
            self.intern(&attr.name);
            if let TypedValue::Str(s) = &attr.value {
                self.intern(s);
            }
        }
        for child in &element.children {
            self.collect_element(child);
        }
    }
}

fn register_missing_attribute_ids(element: &Element, map: &mut Vec<(String, u32)>) {
    for attr in &element.attributes {
        if let Some(id) = attr.resource_id {
            if !map.iter().any(|(n, _)| *n == attr.name) {
                map.push((attr.name.clone(), id));
            }
        }
    }
    for child in &element.children {
        register_missing_attribute_ids(child, map);
    }
}

fn write_length8(w: &mut impl Write, len: usize) -> Result<()> {
    if len > 0x7f {
        w.write_u8((0x80 | (len >> 8)) as u8)?;
    }
    w.write_u8((len & 0xff) as u8)?;
    Ok(())
}

fn write_string_pool(w: &mut Cursor<Vec<u8>>, strings: &[String]) -> Result<()> {
    let chunk_start = w.position();
    w.write_u16::<LittleEndian>(CHUNK_STRING_POOL)?;
    w.write_u16::<LittleEndian>(28)?;
    w.write_u32::<LittleEndian>(0)?; // size, patched below
    w.write_u32::<LittleEndian>(strings.len() as u32)?;
    w.write_u32::<LittleEndian>(0)?; // style count
    w.write_u32::<LittleEndian>(UTF8_FLAG)?;
    w.write_u32::<LittleEndian>(0)?; // strings start, patched below
    w.write_u32::<LittleEndian>(0)?; // styles start

    let index_at = w.position();
    for _ in strings {
        w.write_u32::<LittleEndian>(0)?;
    }

    let strings_start = w.position();
    let mut offsets = Vec::with_capacity(strings.len());
    for s in strings {
        offsets.push((w.position() - strings_start) as u32);
        write_length8(w, s.encode_utf16().count())?;
        write_length8(w, s.len())?;
        w.write_all(s.as_bytes())?;
        w.write_u8(0)?;
    }
    while w.position() % 4 != 0 {
        w.write_u8(0)?;
    }

    let chunk_end = w.position();
    w.seek(SeekFrom::Start(chunk_start + 4))?;
    w.write_u32::<LittleEndian>((chunk_end - chunk_start) as u32)?;
    w.seek(SeekFrom::Start(chunk_start + 20))?;
    w.write_u32::<LittleEndian>((strings_start - chunk_start) as u32)?;
    w.seek(SeekFrom::Start(index_at))?;
    for offset in offsets {
        w.write_u32::<LittleEndian>(offset)?;
    }
    w.seek(SeekFrom::Start(chunk_end))?;
    Ok(())
}

fn write_namespace_chunk(
    w: &mut Cursor<Vec<u8>>,
    ty: u16,
    pool: &PoolBuilder,
    prefix: &str,
    uri: &str,
) -> Result<()> {
    w.write_u16::<LittleEndian>(ty)?;
    w.write_u16::<LittleEndian>(16)?;
    w.write_u32::<LittleEndian>(24)?;
    w.write_u32::<LittleEndian>(1)?; // line number
    w.write_i32::<LittleEndian>(-1)?; // comment
    w.write_i32::<LittleEndian>(pool.get(prefix))?;
    w.write_i32::<LittleEndian>(pool.get(uri))?;
    Ok(())
}

fn write_element(w: &mut Cursor<Vec<u8>>, pool: &PoolBuilder, element: &Element) -> Result<()> {
    // Attributes carrying a resource id come first, sorted by id; the
    // runtime binary-searches them.
    let mut attributes: Vec<&Attribute> = element.attributes.iter().collect();
    attributes.sort_by_key(|a| a.resource_id.unwrap_or(u32::MAX));

    let ns = element
        .namespace
        .as_deref()
        .map(|ns| pool.get(ns))
        .unwrap_or(-1);
    let name = pool.get(&element.name);

    w.write_u16::<LittleEndian>(CHUNK_START_ELEMENT)?;
    w.write_u16::<LittleEndian>(16)?;
    w.write_u32::<LittleEndian>(36 + attributes.len() as u32 * 20)?;
    w.write_u32::<LittleEndian>(1)?; // line number
    w.write_i32::<LittleEndian>(-1)?; // comment
    w.write_i32::<LittleEndian>(ns)?;
    w.write_i32::<LittleEndian>(name)?;
    w.write_u16::<LittleEndian>(0x0014)?; // attribute start
    w.write_u16::<LittleEndian>(0x0014)?; // attribute size
    w.write_u16::<LittleEndian>(attributes.len() as u16)?;
    w.write_u16::<LittleEndian>(0)?; // id index
    w.write_u16::<LittleEndian>(0)?; // class index
    w.write_u16::<LittleEndian>(0)?; // style index

    for attr in attributes {
        let attr_ns = attr
            .namespace
            .as_deref()
            .map(|ns| pool.get(ns))
            .unwrap_or(-1);
        let raw_value = match &attr.value {
            TypedValue::Str(s) => pool.get(s),
            _ => -1,
        };
        let data = match &attr.value {
            TypedValue::Str(s) => pool.get(s) as u32,
            TypedValue::Reference(r) => *r,
            TypedValue::IntDec(i) => *i as u32,
            TypedValue::IntHex(h) => *h,
            TypedValue::Boolean(b) => {
                if *b {
                    0xffff_ffff
                } else {
                    0
                }
            }
            TypedValue::Raw { data, .. } => *data,
        };
        w.write_i32::<LittleEndian>(attr_ns)?;
        w.write_i32::<LittleEndian>(pool.get(&attr.name))?;
        w.write_i32::<LittleEndian>(raw_value)?;
        w.write_u16::<LittleEndian>(8)?; // value size
        w.write_u8(0)?; // res0
        w.write_u8(attr.value.data_type())?;
        w.write_u32::<LittleEndian>(data)?;
    }

    for child in &element.children {
        write_element(w, pool, child)?;
    }

    w.write_u16::<LittleEndian>(CHUNK_END_ELEMENT)?;
    w.write_u16::<LittleEndian>(16)?;
    w.write_u32::<LittleEndian>(24)?;
    w.write_u32::<LittleEndian>(1)?; // line number
    w.write_i32::<LittleEndian>(-1)?; // comment
    w.write_i32::<LittleEndian>(ns)?;
    w.write_i32::<LittleEndian>(name)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::editor::tests::sample_manifest;
    use super::*;

    #[test]
    fn should_reject_non_manifest_bytes() {
        match ManifestDocument::parse(b"plain text, no chunks") {
            Err(Error::MalformedManifest(_)) => {}
            other => panic!("expected MalformedManifest, got {other:?}"),
        }
    }

    #[test]
    fn should_round_trip_a_manifest_tree() {
        let bytes = sample_manifest("com.facebook.orca", Some("android.app.AppComponentFactory"));
        let doc = ManifestDocument::parse(&bytes).unwrap();
        assert_eq!(doc.root.name, "manifest");
        assert_eq!(
            doc.root
                .attribute(None, "package")
                .map(|a| a.value.clone()),
            Some(TypedValue::Str("com.facebook.orca".into()))
        );
        let app = doc.root.child("application").unwrap();
        let factory = app
            .attribute(Some(ANDROID_NAMESPACE), "appComponentFactory")
            .unwrap();
        assert_eq!(factory.resource_id, Some(RES_ID_APP_COMPONENT_FACTORY));
        assert_eq!(
            factory.value,
            TypedValue::Str("android.app.AppComponentFactory".into())
        );

        // a second encode of the unchanged tree is byte-identical
        let reencoded = doc.serialize().unwrap();
        let doc2 = ManifestDocument::parse(&reencoded).unwrap();
        assert_eq!(doc2.serialize().unwrap(), reencoded);
    }

    #[test]
    fn should_preserve_non_string_attribute_types() {
        let bytes = sample_manifest("com.facebook.katana", None);
        let doc = ManifestDocument::parse(&bytes).unwrap();
        let app = doc.root.child("application").unwrap();
        assert_eq!(
            app.attribute(Some(ANDROID_NAMESPACE), "debuggable")
                .map(|a| a.value.clone()),
            Some(TypedValue::Boolean(false))
        );
    }
}
