// Author: Lukas Bower
// Purpose: Define 9P2000 wire types and constants shared by the codec and the server.
#![allow(clippy::module_name_repetitions)]

//! 9P2000 data model definitions.

use core::ops::BitOr;

use alloc::string::String;
use alloc::vec::Vec;

/// Default maximum message size offered during version negotiation.
pub const MAX_MSIZE: u32 = 8192;

/// Smallest message size a server will agree to.
pub const MIN_MSIZE: u32 = 256;

/// Protocol version string.
pub const VERSION: &str = "9P2000";

/// Version string answered for dialects the server does not speak.
pub const VERSION_UNKNOWN: &str = "unknown";

/// Fid value meaning "no fid" (used for `afid` in `Tattach`).
pub const NOFID: u32 = u32::MAX;

/// Tag value reserved for `Tversion`.
pub const NOTAG: u16 = u16::MAX;

/// Bytes of header overhead in `Rread`/`Twrite` frames; `iounit = msize - IOHDRSZ`.
pub const IOHDRSZ: u32 = 24;

/// Maximum number of path elements in a single `Twalk`.
pub const MAX_WELEM: usize = 16;

/// Maximum byte length of a single path element.
pub const MAX_NAME_LEN: usize = 255;

/// Possible errors produced while encoding or decoding 9P messages.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// Input buffer was shorter than the declared frame length.
    #[error("truncated frame")]
    Truncated,
    /// Encountered an unknown message type.
    #[error("unsupported message type {0}")]
    Unsupported(u8),
    /// Encountered malformed UTF-8 data.
    #[error("invalid utf8 in string field")]
    InvalidUtf8,
    /// Declared message size does not match the actual payload length.
    #[error("length mismatch: declared {declared} actual {actual}")]
    LengthMismatch {
        /// Message length declared in the frame header.
        declared: u32,
        /// Actual byte length observed in the payload.
        actual: usize,
    },
    /// Detected an invalid path component or walk depth beyond the limit.
    #[error("invalid path component")]
    InvalidPath,
    /// Declared frame length exceeds the negotiated maximum.
    #[error("frame of {declared} bytes exceeds msize {max}")]
    FrameTooLarge {
        /// Frame length declared in the header.
        declared: u32,
        /// Maximum permitted frame length.
        max: u32,
    },
    /// A string field does not fit the 16-bit length prefix.
    #[error("string of {0} bytes exceeds protocol limit")]
    StringTooLong(usize),
}

/// Qid type bits defined by 9P2000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QidType(u8);

impl QidType {
    /// Directory bit.
    pub const DIRECTORY: Self = Self(0x80);
    /// Append-only bit.
    pub const APPEND_ONLY: Self = Self(0x40);
    /// Regular file.
    pub const FILE: Self = Self(0x00);

    fn as_u8(self) -> u8 {
        self.0
    }

    pub(crate) fn from_raw(value: u8) -> Self {
        Self(value)
    }

    /// Check whether the Qid represents a directory.
    #[must_use]
    pub fn is_directory(self) -> bool {
        self.0 & Self::DIRECTORY.0 != 0
    }
}

impl From<QidType> for u8 {
    fn from(value: QidType) -> Self {
        value.as_u8()
    }
}

/// 9P Qid descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Qid {
    ty: QidType,
    version: u32,
    path: u64,
}

impl Qid {
    /// Construct a new Qid.
    #[must_use]
    pub fn new(ty: QidType, version: u32, path: u64) -> Self {
        Self { ty, version, path }
    }

    /// Return the Qid type flags.
    #[must_use]
    pub fn ty(&self) -> QidType {
        self.ty
    }

    /// Return the Qid version field.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Return the Qid path field.
    #[must_use]
    pub fn path(&self) -> u64 {
        self.path
    }
}

/// Permission and type bits carried in `Tcreate.perm` and `Stat.mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileMode(u32);

impl FileMode {
    /// Directory.
    pub const DIR: Self = Self(0x8000_0000);
    /// Append-only file.
    pub const APPEND: Self = Self(0x4000_0000);
    /// Exclusive-use file.
    pub const EXCL: Self = Self(0x2000_0000);
    /// Authentication file.
    pub const AUTH: Self = Self(0x0800_0000);
    /// Temporary file.
    pub const TMP: Self = Self(0x0400_0000);
    /// Symbolic link (9P2000.u).
    pub const SYMLINK: Self = Self(0x0200_0000);
    /// Hard link (9P2000.u).
    pub const LINK: Self = Self(0x0100_0000);
    /// Device file (9P2000.u).
    pub const DEVICE: Self = Self(0x0080_0000);
    /// Named pipe (9P2000.u).
    pub const NAMED_PIPE: Self = Self(0x0020_0000);
    /// Socket (9P2000.u).
    pub const SOCKET: Self = Self(0x0010_0000);

    /// Construct from raw wire bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Return the raw wire bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check whether any of the bits in `other` are set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Check whether the directory bit is set.
    #[must_use]
    pub const fn is_directory(self) -> bool {
        self.intersects(Self::DIR)
    }
}

impl BitOr for FileMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Base open mode encoded in the low bits of the open mode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpenModeBase {
    /// Open for reading.
    ReadOnly = 0,
    /// Open for writing.
    WriteOnly = 1,
    /// Open for reading and writing.
    ReadWrite = 2,
    /// Execute traversal.
    Execute = 3,
}

/// 9P open mode flags as a structured representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    base: OpenModeBase,
    truncate: bool,
    remove_on_close: bool,
}

impl OpenMode {
    const TRUNC: u8 = 0x10;
    const RCLOSE: u8 = 0x40;

    /// Construct a read-only mode descriptor.
    #[must_use]
    pub fn read_only() -> Self {
        Self::with_base(OpenModeBase::ReadOnly)
    }

    /// Construct a write-only mode descriptor.
    #[must_use]
    pub fn write_only() -> Self {
        Self::with_base(OpenModeBase::WriteOnly)
    }

    /// Construct a read-write mode descriptor.
    #[must_use]
    pub fn read_write() -> Self {
        Self::with_base(OpenModeBase::ReadWrite)
    }

    /// Request truncation of the file on open.
    #[must_use]
    pub fn truncating(mut self) -> Self {
        self.truncate = true;
        self
    }

    fn with_base(base: OpenModeBase) -> Self {
        Self {
            base,
            truncate: false,
            remove_on_close: false,
        }
    }

    pub(crate) fn from_bits(value: u8) -> Self {
        let base = match value & 0x03 {
            0 => OpenModeBase::ReadOnly,
            1 => OpenModeBase::WriteOnly,
            2 => OpenModeBase::ReadWrite,
            _ => OpenModeBase::Execute,
        };
        Self {
            base,
            truncate: value & Self::TRUNC != 0,
            remove_on_close: value & Self::RCLOSE != 0,
        }
    }

    /// Return the base access mode.
    #[must_use]
    pub fn base(self) -> OpenModeBase {
        self.base
    }

    /// Determine if the mode permits reading.
    #[must_use]
    pub fn allows_read(self) -> bool {
        matches!(
            self.base,
            OpenModeBase::ReadOnly | OpenModeBase::ReadWrite | OpenModeBase::Execute
        )
    }

    /// Determine if the mode permits writing.
    #[must_use]
    pub fn allows_write(self) -> bool {
        matches!(self.base, OpenModeBase::WriteOnly | OpenModeBase::ReadWrite)
    }

    /// Check whether truncation was requested.
    #[must_use]
    pub fn is_truncate(self) -> bool {
        self.truncate
    }

    /// Check whether remove-on-close was requested.
    #[must_use]
    pub fn is_remove_on_close(self) -> bool {
        self.remove_on_close
    }

    /// Expose the raw flag representation used on the wire.
    #[must_use]
    pub fn raw(self) -> u8 {
        let mut bits = self.base as u8;
        if self.truncate {
            bits |= Self::TRUNC;
        }
        if self.remove_on_close {
            bits |= Self::RCLOSE;
        }
        bits
    }
}

impl From<OpenMode> for u8 {
    fn from(value: OpenMode) -> Self {
        value.raw()
    }
}

/// 9P2000 directory entry (`stat` record).
///
/// Integer fields set to all ones and empty strings mean "don't touch" when
/// the record is carried by `Twstat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// Server type (unused by nine-gate).
    pub ty: u16,
    /// Server subtype (unused by nine-gate).
    pub dev: u32,
    /// Unique identifier of the file.
    pub qid: Qid,
    /// Permission and type bits.
    pub mode: FileMode,
    /// Last access time, seconds since the epoch.
    pub atime: u32,
    /// Last modification time, seconds since the epoch.
    pub mtime: u32,
    /// File length in bytes.
    pub length: u64,
    /// Final path element.
    pub name: String,
    /// Owner name.
    pub uid: String,
    /// Group name.
    pub gid: String,
    /// Name of the last modifier.
    pub muid: String,
}

impl Stat {
    /// Construct a `Twstat` record that leaves every field untouched.
    #[must_use]
    pub fn dont_touch() -> Self {
        Self {
            ty: u16::MAX,
            dev: u32::MAX,
            qid: Qid::new(QidType::from_raw(u8::MAX), u32::MAX, u64::MAX),
            mode: FileMode::from_bits(u32::MAX),
            atime: u32::MAX,
            mtime: u32::MAX,
            length: u64::MAX,
            name: String::new(),
            uid: String::new(),
            gid: String::new(),
            muid: String::new(),
        }
    }

    /// Report whether any field other than `name` asks for a change.
    #[must_use]
    pub fn changes_besides_name(&self) -> bool {
        self.ty != u16::MAX
            || self.dev != u32::MAX
            || u8::from(self.qid.ty()) != u8::MAX
            || self.qid.version() != u32::MAX
            || self.qid.path() != u64::MAX
            || self.mode.bits() != u32::MAX
            || self.atime != u32::MAX
            || self.mtime != u32::MAX
            || self.length != u64::MAX
            || !self.uid.is_empty()
            || !self.gid.is_empty()
            || !self.muid.is_empty()
    }
}

/// Request envelope containing a tag and message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request identifier, echoed back by responses.
    pub tag: u16,
    /// The concrete request payload.
    pub body: RequestBody,
}

/// Response envelope containing a tag and message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response identifier (mirrors the request tag).
    pub tag: u16,
    /// The concrete response payload.
    pub body: ResponseBody,
}

/// Request variants understood by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// `Tversion` negotiates the message size and version string.
    Version {
        /// Requested maximum message size.
        msize: u32,
        /// Protocol version string supplied by the client.
        version: String,
    },
    /// `Tauth` requests an authentication fid.
    Auth {
        /// Proposed authentication fid.
        afid: u32,
        /// User name string provided by the client.
        uname: String,
        /// Attachment name supplied by the client.
        aname: String,
    },
    /// `Tattach` binds a fid to the file tree root.
    Attach {
        /// Fid identifier associated with the root.
        fid: u32,
        /// Authentication fid, `NOFID` when absent.
        afid: u32,
        /// User name string provided by the client.
        uname: String,
        /// Attachment name supplied by the client.
        aname: String,
    },
    /// `Tflush` aborts an outstanding request.
    Flush {
        /// Tag of the request to abort.
        oldtag: u16,
    },
    /// `Twalk` traverses the namespace to produce a new fid.
    Walk {
        /// Source fid for the walk operation.
        fid: u32,
        /// Destination fid receiving the walk result.
        newfid: u32,
        /// Path components supplied by the client.
        wnames: Vec<String>,
    },
    /// `Topen` opens a fid for subsequent I/O operations.
    Open {
        /// Fid to open.
        fid: u32,
        /// Requested open mode.
        mode: OpenMode,
    },
    /// `Tcreate` creates a file inside the directory named by `fid`.
    Create {
        /// Directory fid; rebound to the new file on success.
        fid: u32,
        /// Name of the new file.
        name: String,
        /// Permission and type bits of the new file.
        perm: FileMode,
        /// Open mode applied to the new file.
        mode: OpenMode,
    },
    /// `Tread` reads a range of bytes from a fid.
    Read {
        /// Fid to read from.
        fid: u32,
        /// Offset into the file.
        offset: u64,
        /// Number of bytes requested.
        count: u32,
    },
    /// `Twrite` writes bytes to a fid.
    Write {
        /// Fid to write to.
        fid: u32,
        /// Offset within the file.
        offset: u64,
        /// Payload bytes supplied by the client.
        data: Vec<u8>,
    },
    /// `Tclunk` releases a fid.
    Clunk {
        /// Fid identifier to release.
        fid: u32,
    },
    /// `Tremove` removes the file and releases the fid.
    Remove {
        /// Fid naming the file to remove.
        fid: u32,
    },
    /// `Tstat` queries file metadata.
    Stat {
        /// Fid to describe.
        fid: u32,
    },
    /// `Twstat` changes file metadata.
    Wstat {
        /// Fid to modify.
        fid: u32,
        /// Requested metadata; "don't touch" values are ignored.
        stat: Stat,
    },
}

/// Response variants surfaced to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Response to `Tversion` carrying the negotiated size and version.
    Version {
        /// Negotiated maximum message size.
        msize: u32,
        /// Protocol version string.
        version: String,
    },
    /// Response to `Tauth` carrying the authentication Qid.
    Auth {
        /// Qid of the authentication file.
        aqid: Qid,
    },
    /// Response to `Tattach` containing the root Qid.
    Attach {
        /// Qid associated with the root.
        qid: Qid,
    },
    /// Response to `Tflush`.
    Flush,
    /// Response to `Twalk` containing the traversed Qids.
    Walk {
        /// Qids encountered during the walk.
        qids: Vec<Qid>,
    },
    /// Response to `Topen` containing the opened Qid and I/O unit size.
    Open {
        /// Qid associated with the opened fid.
        qid: Qid,
        /// Maximum I/O payload size.
        iounit: u32,
    },
    /// Response to `Tcreate` containing the new file's Qid and I/O unit size.
    Create {
        /// Qid of the created file.
        qid: Qid,
        /// Maximum I/O payload size.
        iounit: u32,
    },
    /// Response to `Tread` containing the payload bytes.
    Read {
        /// Data payload read from the fid.
        data: Vec<u8>,
    },
    /// Response to `Twrite` containing the write count.
    Write {
        /// Number of bytes written.
        count: u32,
    },
    /// Response to `Tclunk` acknowledging the release.
    Clunk,
    /// Response to `Tremove`.
    Remove,
    /// Response to `Tstat` carrying the metadata record.
    Stat {
        /// Metadata describing the fid.
        stat: Stat,
    },
    /// Response to `Twstat`.
    Wstat,
    /// Error response.
    Error {
        /// Human-readable error string.
        ename: String,
    },
}
