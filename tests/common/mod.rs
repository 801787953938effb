//! Hand-written archive builder for tests.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
pub const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];

struct Entry {
    name: Vec<u8>,
    method: u16,
    payload: Vec<u8>,
    crc32: u32,
    uncompressed_size: u32,
    extra: Vec<u8>,
}

#[derive(Default)]
pub struct ArchiveBuilder {
    entries: Vec<Entry>,
    comment: Vec<u8>,
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut enc = DeflateEncoder::new(Vec::new(), Compression::best());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Fake page image: a format signature followed by a recognisable body.
pub fn png(body: &str) -> Vec<u8> {
    let mut data = PNG_MAGIC.to_vec();
    data.extend_from_slice(body.as_bytes());
    data
}

pub fn jpeg(body: &str) -> Vec<u8> {
    let mut data = JPEG_MAGIC.to_vec();
    data.extend_from_slice(body.as_bytes());
    data
}

/// A PNG that actually decodes, filled with one colour.
pub fn decodable_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([20, 90, 160]));
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.raw(name.as_bytes(), 0, data.to_vec(), data)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.raw(name.as_bytes(), 8, deflate(data), data)
    }

    /// Entry with an arbitrary method code and payload.
    pub fn raw(mut self, name: &[u8], method: u16, payload: Vec<u8>, plain: &[u8]) -> Self {
        self.entries.push(Entry {
            name: name.to_vec(),
            method,
            payload,
            crc32: crc32(plain),
            uncompressed_size: plain.len() as u32,
            extra: Vec::new(),
        });
        self
    }

    /// Give the most recent entry an extra field in its local header.
    pub fn with_local_extra(mut self, extra: &[u8]) -> Self {
        if let Some(last) = self.entries.last_mut() {
            last.extra = extra.to_vec();
        }
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut offsets = Vec::new();

        for e in &self.entries {
            offsets.push(out.len() as u32);
            out.extend_from_slice(b"PK\x03\x04");
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&e.method.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0x5821u16.to_le_bytes());
            out.extend_from_slice(&e.crc32.to_le_bytes());
            out.extend_from_slice(&(e.payload.len() as u32).to_le_bytes());
            out.extend_from_slice(&e.uncompressed_size.to_le_bytes());
            out.extend_from_slice(&(e.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&(e.extra.len() as u16).to_le_bytes());
            out.extend_from_slice(&e.name);
            out.extend_from_slice(&e.extra);
            out.extend_from_slice(&e.payload);
        }

        let cd_offset = out.len() as u32;
        for (e, offset) in self.entries.iter().zip(&offsets) {
            out.extend_from_slice(b"PK\x01\x02");
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&e.method.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0x5821u16.to_le_bytes());
            out.extend_from_slice(&e.crc32.to_le_bytes());
            out.extend_from_slice(&(e.payload.len() as u32).to_le_bytes());
            out.extend_from_slice(&e.uncompressed_size.to_le_bytes());
            out.extend_from_slice(&(e.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&e.name);
        }
        let cd_size = out.len() as u32 - cd_offset;

        out.extend_from_slice(b"PK\x05\x06");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);
        out
    }

    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}

/// The three-page archive used across tests: out-of-order names, mixed
/// extension case, and a metadata entry that must be skipped.
pub fn sample_archive() -> ArchiveBuilder {
    ArchiveBuilder::new()
        .stored("003.jpg", &jpeg("three"))
        .stored("001.png", &png("one"))
        .stored("__MACOSX/info", b"resource fork")
        .stored("002.PNG", &png("two"))
}
