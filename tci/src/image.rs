//! Bytecode image files (`.tcib`).
//!
//! Format (little-endian):
//!   HEADER: magic[4] + version[2] + host_bits[1] + guest_bits[1]
//!           + nb_tbs[4] + code_len[4]
//!   Per TB: pc[8] + flags[4] + offset[4] + size[4]
//!   CODE:   code_len bytes, the code buffer including its own header

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::code_buffer::{CodeBuffer, CODE_HEADER_SIZE};
use crate::config::TargetLong;
use crate::error::{Result, TciError};
use crate::insn::DecodeConfig;

const MAGIC: &[u8; 4] = b"TCIB";
const VERSION: u16 = 1;

/// Largest code section accepted when reading an image.
const MAX_CODE_LEN: u32 = 1 << 30;

// -- Write helpers --

fn write_u8(w: &mut impl Write, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

fn write_u16(w: &mut impl Write, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

// -- Read helpers --

fn read_u8(r: &mut impl Read) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16(r: &mut impl Read) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn invalid(msg: impl Into<String>) -> TciError {
    TciError::InvalidImage(msg.into())
}

/// Entry of the TB table: where a guest block's bytecode lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTb {
    pub pc: u64,
    pub flags: u32,
    pub offset: u32,
    pub size: u32,
}

impl ImageTb {
    pub fn range(&self) -> (usize, usize) {
        let start = self.offset as usize;
        (start, start + self.size as usize)
    }
}

/// A code buffer together with its TB table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TbImage {
    pub host_bits: u32,
    pub target_long: TargetLong,
    pub tbs: Vec<ImageTb>,
    pub code: Vec<u8>,
}

impl TbImage {
    /// Snapshot the contents of `buf` with an empty TB table.
    pub fn from_buffer(buf: &CodeBuffer) -> Self {
        Self {
            host_bits: buf.host_bits(),
            target_long: buf.target_long(),
            tbs: Vec::new(),
            code: buf.as_slice().to_vec(),
        }
    }

    pub fn push_tb(&mut self, pc: u64, flags: u32, offset: usize, size: usize) {
        self.tbs.push(ImageTb {
            pc,
            flags,
            offset: offset as u32,
            size: size as u32,
        });
    }

    pub fn decode_config(&self) -> DecodeConfig {
        DecodeConfig::new(self.host_bits, self.target_long)
    }

    /// Find the TB for guest `pc`.
    pub fn lookup(&self, pc: u64) -> Option<&ImageTb> {
        self.tbs.iter().find(|tb| tb.pc == pc)
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(MAGIC)?;
        write_u16(w, VERSION)?;
        write_u8(w, self.host_bits as u8)?;
        write_u8(w, self.target_long.bits() as u8)?;
        write_u32(w, self.tbs.len() as u32)?;
        write_u32(w, self.code.len() as u32)?;
        for tb in &self.tbs {
            write_u64(w, tb.pc)?;
            write_u32(w, tb.flags)?;
            write_u32(w, tb.offset)?;
            write_u32(w, tb.size)?;
        }
        w.write_all(&self.code)?;
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(TciError::BadMagic);
        }
        let version = read_u16(r)?;
        if version != VERSION {
            return Err(TciError::UnsupportedVersion(version));
        }
        let host_bits = read_u8(r)? as u32;
        if host_bits != 32 && host_bits != 64 {
            return Err(invalid(format!("bad host word {host_bits}")));
        }
        let guest_bits = read_u8(r)? as u32;
        let target_long = TargetLong::from_bits(guest_bits)
            .ok_or_else(|| invalid(format!("bad guest address width {guest_bits}")))?;
        let nb_tbs = read_u32(r)?;
        let code_len = read_u32(r)?;
        if code_len > MAX_CODE_LEN {
            return Err(invalid(format!("code section of {code_len} bytes")));
        }

        let mut tbs = Vec::with_capacity(nb_tbs.min(1 << 16) as usize);
        for _ in 0..nb_tbs {
            let tb = ImageTb {
                pc: read_u64(r)?,
                flags: read_u32(r)?,
                offset: read_u32(r)?,
                size: read_u32(r)?,
            };
            let (start, end) = tb.range();
            if start < CODE_HEADER_SIZE || end > code_len as usize {
                return Err(invalid(format!(
                    "tb for pc {:#x} at {start:#x}..{end:#x} lies outside the code",
                    tb.pc
                )));
            }
            tbs.push(tb);
        }

        let mut code = vec![0u8; code_len as usize];
        r.read_exact(&mut code)?;
        let buf = CodeBuffer::from_bytes(code)?;
        if buf.host_bits() != host_bits || buf.target_long() != target_long {
            return Err(invalid("code header disagrees with image header"));
        }

        Ok(Self {
            host_bits,
            target_long,
            tbs,
            code: buf.into_bytes(),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut r = BufReader::new(File::open(path)?);
        Self::read_from(&mut r)
    }
}
