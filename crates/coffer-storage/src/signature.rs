//! File signature detection
//!
//! Uploads are accepted only when their leading bytes match a known
//! magic number. [`SignatureGate`] applies the check to a stream: it holds
//! back the first [`SNIFF_LEN`] bytes, decides once, and then passes every
//! later chunk through untouched.

use bytes::{Bytes, BytesMut};

use crate::error::{StorageError, StorageResult};

/// Number of leading bytes inspected
pub const SNIFF_LEN: usize = 4;

/// A known file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignature {
    /// Short format name, used in configuration
    pub name: &'static str,
    /// Leading bytes, 1 to 4 long
    pub magic: &'static [u8],
    /// MIME types this format is commonly declared as. The first entry is
    /// canonical; entries ending in `*` match by prefix.
    pub mime_types: &'static [&'static str],
}

impl FileSignature {
    /// Canonical MIME type
    pub fn mime(&self) -> &'static str {
        self.mime_types
            .first()
            .copied()
            .unwrap_or("application/octet-stream")
    }

    /// Whether a declared MIME type is consistent with this format
    pub fn accepts_mime(&self, declared: &str) -> bool {
        let declared = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.mime_types.iter().any(|m| match m.strip_suffix('*') {
            Some(prefix) => declared.starts_with(prefix),
            None => declared == *m,
        })
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        self.magic.len() <= prefix.len() && prefix.starts_with(self.magic)
    }
}

const fn sig(
    name: &'static str,
    magic: &'static [u8],
    mime_types: &'static [&'static str],
) -> FileSignature {
    FileSignature {
        name,
        magic,
        mime_types,
    }
}

const ZIP_MIMES: &[&str] = &[
    "application/zip",
    "application/x-zip-compressed",
    "application/vnd.openxmlformats-officedocument.*",
    "application/vnd.oasis.opendocument.*",
    "application/java-archive",
    "application/vnd.android.package-archive",
    "application/epub+zip",
];

/// Formats accepted out of the box
pub const DEFAULT_SIGNATURES: &[FileSignature] = &[
    sig("pdf", b"%PDF", &["application/pdf"]),
    sig("zip", b"PK\x03\x04", ZIP_MIMES),
    sig("zip-empty", b"PK\x05\x06", ZIP_MIMES),
    sig("zip-spanned", b"PK\x07\x08", ZIP_MIMES),
    sig("png", b"\x89PNG", &["image/png"]),
    sig("jpeg", b"\xFF\xD8\xFF", &["image/jpeg", "image/pjpeg"]),
    sig("gif", b"GIF8", &["image/gif"]),
    sig(
        "riff",
        b"RIFF",
        &["image/webp", "audio/wav", "audio/x-wav", "video/x-msvideo", "audio/vnd.wave"],
    ),
    sig("tiff-le", b"II*\x00", &["image/tiff"]),
    sig("tiff-be", b"MM\x00*", &["image/tiff"]),
    sig("ico", b"\x00\x00\x01\x00", &["image/x-icon", "image/vnd.microsoft.icon"]),
    sig("psd", b"8BPS", &["image/vnd.adobe.photoshop", "application/x-photoshop"]),
    sig("rar", b"Rar!", &["application/vnd.rar", "application/x-rar-compressed"]),
    sig("7z", b"7z\xBC\xAF", &["application/x-7z-compressed"]),
    sig("xz", b"\xFD7zX", &["application/x-xz"]),
    sig("zstd", b"\x28\xB5\x2F\xFD", &["application/zstd"]),
    sig(
        "ole2",
        b"\xD0\xCF\x11\xE0",
        &[
            "application/x-ole-storage",
            "application/msword",
            "application/vnd.ms-*",
            "application/vnd.visio",
        ],
    ),
    sig("ogg", b"OggS", &["application/ogg", "audio/ogg", "video/ogg"]),
    sig("flac", b"fLaC", &["audio/flac", "audio/x-flac"]),
    sig("matroska", b"\x1A\x45\xDF\xA3", &["video/x-matroska", "video/webm", "audio/webm"]),
    sig("rtf", b"{\\rt", &["application/rtf", "text/rtf"]),
    sig("wasm", b"\x00asm", &["application/wasm"]),
    sig("elf", b"\x7FELF", &["application/x-elf", "application/x-executable"]),
    sig("mp3-id3", b"ID3", &["audio/mpeg", "audio/mp3"]),
    sig("bzip2", b"BZh", &["application/x-bzip2"]),
    sig("gzip", b"\x1F\x8B", &["application/gzip", "application/x-gzip"]),
    sig("bmp", b"BM", &["image/bmp", "image/x-ms-bmp"]),
];

/// The set of formats an upload may have
#[derive(Debug, Clone)]
pub struct SignatureTable {
    signatures: Vec<FileSignature>,
}

impl Default for SignatureTable {
    fn default() -> Self {
        Self {
            signatures: DEFAULT_SIGNATURES.to_vec(),
        }
    }
}

impl SignatureTable {
    /// Restrict the default table to the named formats.
    ///
    /// Unknown names are an error so that a typo in configuration does not
    /// silently reject every upload.
    pub fn only<S: AsRef<str>>(names: &[S]) -> StorageResult<Self> {
        let mut signatures = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let sig = DEFAULT_SIGNATURES
                .iter()
                .find(|s| s.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| StorageError::InvalidConfig(format!("unknown file format {name:?}")))?;
            if !signatures.contains(sig) {
                signatures.push(*sig);
            }
        }
        if signatures.is_empty() {
            return Err(StorageError::InvalidConfig(
                "accepted format list is empty".into(),
            ));
        }
        Ok(Self { signatures })
    }

    /// Find the format whose magic number prefixes `leading`.
    ///
    /// Signatures longer than `leading` never match.
    pub fn detect(&self, leading: &[u8]) -> Option<&FileSignature> {
        self.signatures.iter().find(|s| s.matches(leading))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileSignature> {
        self.signatures.iter()
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

/// Per-upload validation state
pub(crate) struct SignatureGate<'t> {
    table: &'t SignatureTable,
    held: BytesMut,
    verdict: Option<FileSignature>,
}

impl<'t> SignatureGate<'t> {
    pub(crate) fn new(table: &'t SignatureTable) -> Self {
        Self {
            table,
            held: BytesMut::with_capacity(SNIFF_LEN),
            verdict: None,
        }
    }

    pub(crate) fn detected(&self) -> Option<&FileSignature> {
        self.verdict.as_ref()
    }

    /// Feed a chunk and get back the bytes cleared for the next stage.
    ///
    /// Returns an empty buffer while the header is still incomplete.
    pub(crate) fn push(&mut self, chunk: Bytes) -> StorageResult<Bytes> {
        if self.verdict.is_some() {
            return Ok(chunk);
        }

        let needed = SNIFF_LEN - self.held.len();
        if chunk.len() < needed {
            self.held.extend_from_slice(&chunk);
            return Ok(Bytes::new());
        }

        self.held.extend_from_slice(&chunk[..needed]);
        let sig = *self.table.detect(&self.held).ok_or_else(|| self.reject())?;
        self.verdict = Some(sig);

        let mut released = std::mem::take(&mut self.held);
        released.extend_from_slice(&chunk[needed..]);
        Ok(released.freeze())
    }

    /// Settle a stream that ended before [`SNIFF_LEN`] bytes arrived.
    ///
    /// An empty stream carries nothing to validate and is allowed through.
    pub(crate) fn finish(&mut self) -> StorageResult<Bytes> {
        if self.verdict.is_some() || self.held.is_empty() {
            return Ok(Bytes::new());
        }
        let sig = *self.table.detect(&self.held).ok_or_else(|| self.reject())?;
        self.verdict = Some(sig);
        Ok(std::mem::take(&mut self.held).freeze())
    }

    fn reject(&self) -> StorageError {
        StorageError::rejected(format!(
            "content signature mismatch (leading bytes {})",
            hex::encode(&self.held)
        ))
    }
}
