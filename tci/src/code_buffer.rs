use crate::config::TargetLong;
use crate::error::{Result, TciError};

/// Default code buffer size: 16 MiB.
const DEFAULT_CODE_BUF_SIZE: usize = 16 * 1024 * 1024;

/// Magic at the start of every code buffer.
pub const CODE_MAGIC: &[u8; 3] = b"TCI";

/// Encoding version recorded in the header.
pub const CODE_VERSION: u8 = 1;

/// Size of the header; the first translation block starts here, so
/// offset 0 is never an instruction and a zero label is always invalid.
pub const CODE_HEADER_SIZE: usize = 8;

/// Bytecode buffer.
///
/// Holds the translation blocks of one interpreter configuration back
/// to back after an 8-byte header:
///
/// ```text
/// 0..3  "TCI"
/// 3     encoding version
/// 4     host word bits (32/64)
/// 5     guest address bits (32/64)
/// 6..8  reserved
/// ```
///
/// Writes past the capacity still land and set the overflow flag.
/// Callers check [`CodeBuffer::overflowed`] after finishing a block and
/// roll it back with [`CodeBuffer::truncate`].
pub struct CodeBuffer {
    data: Vec<u8>,
    size: usize,
    overflow: bool,
}

impl CodeBuffer {
    /// Create a buffer of at most `size` bytes for the given host word
    /// and guest address widths.
    pub fn new(size: usize, host_bits: u32, target_long: TargetLong) -> Self {
        assert!(host_bits == 32 || host_bits == 64, "bad host word {host_bits}");
        assert!(size >= CODE_HEADER_SIZE, "code buffer too small");
        let mut data = Vec::with_capacity(size.min(DEFAULT_CODE_BUF_SIZE));
        data.extend_from_slice(CODE_MAGIC);
        data.push(CODE_VERSION);
        data.push(host_bits as u8);
        data.push(target_long.bits() as u8);
        data.extend_from_slice(&[0, 0]);
        Self {
            data,
            size,
            overflow: false,
        }
    }

    /// Allocate with the default size (16 MiB).
    pub fn with_default_size(host_bits: u32, target_long: TargetLong) -> Self {
        Self::new(DEFAULT_CODE_BUF_SIZE, host_bits, target_long)
    }

    /// Adopt existing buffer contents, validating the header.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let hdr = data.get(..CODE_HEADER_SIZE).ok_or(TciError::BadMagic)?;
        if &hdr[..3] != CODE_MAGIC {
            return Err(TciError::BadMagic);
        }
        if hdr[3] != CODE_VERSION {
            return Err(TciError::UnsupportedVersion(hdr[3] as u16));
        }
        if hdr[4] != 32 && hdr[4] != 64 {
            return Err(TciError::InvalidImage(format!(
                "bad host word {}",
                hdr[4]
            )));
        }
        if TargetLong::from_bits(hdr[5] as u32).is_none() {
            return Err(TciError::InvalidImage(format!(
                "bad guest address width {}",
                hdr[5]
            )));
        }
        let size = data.len().max(DEFAULT_CODE_BUF_SIZE);
        Ok(Self {
            data,
            size,
            overflow: false,
        })
    }

    pub fn host_bits(&self) -> u32 {
        self.data[4] as u32
    }

    pub fn target_long(&self) -> TargetLong {
        match self.data[5] {
            32 => TargetLong::Bits32,
            _ => TargetLong::Bits64,
        }
    }

    /// Current write offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.data.len()
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Remaining writable bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.size.saturating_sub(self.data.len())
    }

    /// True once a write went past the capacity.
    #[inline]
    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    /// Discard everything after the header.
    pub fn reset(&mut self) {
        self.data.truncate(CODE_HEADER_SIZE);
        self.overflow = false;
    }

    /// Roll the write offset back to `offset`.
    pub fn truncate(&mut self, offset: usize) {
        assert!(offset >= CODE_HEADER_SIZE, "truncate into the header");
        self.data.truncate(offset);
        self.overflow = self.data.len() > self.size;
    }

    // -- Emit methods --

    #[inline]
    fn reserve(&mut self, n: usize) {
        if self.data.len() + n > self.size {
            self.overflow = true;
        }
    }

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        self.reserve(1);
        self.data.push(val);
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        self.emit_bytes(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        self.emit_bytes(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_bytes(&mut self, data: &[u8]) {
        self.reserve(data.len());
        self.data.extend_from_slice(data);
    }

    /// Patch a u8 at the given offset.
    #[inline]
    pub fn patch_u8(&mut self, offset: usize, val: u8) {
        self.data[offset] = val;
    }

    /// Patch a u32 at the given offset (for back-patching branches).
    #[inline]
    pub fn patch_u32(&mut self, offset: usize, val: u32) {
        self.data[offset..offset + 4].copy_from_slice(&val.to_le_bytes());
    }

    /// Patch a u64 at the given offset.
    #[inline]
    pub fn patch_u64(&mut self, offset: usize, val: u64) {
        self.data[offset..offset + 8].copy_from_slice(&val.to_le_bytes());
    }

    /// Read a u32 at the given offset.
    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.data[offset..offset + 4]);
        u32::from_le_bytes(b)
    }

    /// Point the `goto_tb` displacement field at `jmp_off` to `target`.
    pub fn patch_goto_tb(&mut self, jmp_off: usize, target: usize) {
        let disp = target as i64 - (jmp_off as i64 + 4);
        let disp = i32::try_from(disp).unwrap_or_else(|_| {
            panic!("goto_tb displacement {disp} out of range")
        });
        self.patch_u32(jmp_off, disp as u32);
    }

    /// The whole buffer, header included.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
