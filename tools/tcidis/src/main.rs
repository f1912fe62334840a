//! tcg-tcidis: bytecode image disassembler.
//!
//! Reads a `.tcib` image (or a bare code buffer with `--code`), prints
//! every translation block in human-readable form and optionally runs
//! the validating pass over the whole buffer.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tcg_tci::disas::disassemble;
use tcg_tci::verify::verify_blocks;
use tcg_tci::{CodeBuffer, DecodeConfig, ImageTb, TbImage};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tcg-tcidis", about = "Disassemble TCI bytecode images")]
struct Args {
    /// Image file to read
    input: PathBuf,

    /// Treat the input as a bare code buffer: one block from the end of
    /// the header to the end of the file
    #[arg(long)]
    code: bool,

    /// Only print the block for this guest pc (hex)
    #[arg(long, value_parser = parse_hex)]
    pc: Option<u64>,

    /// Print at most this many blocks
    #[arg(long)]
    count: Option<usize>,

    /// Validate every block before printing
    #[arg(long)]
    verify: bool,

    /// Write the listing here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn parse_hex(s: &str) -> Result<u64, String> {
    let digits = s.trim_start_matches("0x");
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hex address {s}: {e}"))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Load the input as an image, or wrap a bare code buffer in one.
fn load(args: &Args) -> Result<TbImage> {
    if !args.code {
        return TbImage::load(&args.input)
            .with_context(|| format!("cannot load image {}", args.input.display()));
    }
    let data = fs::read(&args.input)
        .with_context(|| format!("cannot read {}", args.input.display()))?;
    let buf = CodeBuffer::from_bytes(data).context("bad code buffer header")?;
    let mut image = TbImage::from_buffer(&buf);
    let start = tcg_tci::code_buffer::CODE_HEADER_SIZE;
    image.push_tb(0, 0, start, buf.offset() - start);
    Ok(image)
}

fn selected<'a>(image: &'a TbImage, args: &Args) -> Result<Vec<&'a ImageTb>> {
    let tbs: Vec<&ImageTb> = match args.pc {
        Some(pc) => match image.lookup(pc) {
            Some(tb) => vec![tb],
            None => bail!("no block for pc {pc:#x}"),
        },
        None => image.tbs.iter().collect(),
    };
    Ok(tbs
        .into_iter()
        .take(args.count.unwrap_or(usize::MAX))
        .collect())
}

fn dump_tb(
    w: &mut dyn Write,
    n: usize,
    tb: &ImageTb,
    code: &[u8],
    cfg: DecodeConfig,
) -> Result<()> {
    let (start, end) = tb.range();
    writeln!(
        w,
        "TB #{n} @ 0x{:x} flags=0x{:x} [0x{start:04x}..0x{end:04x}]",
        tb.pc, tb.flags
    )?;
    let text = disassemble(code, start, end, cfg)
        .with_context(|| format!("cannot decode block for pc {:#x}", tb.pc))?;
    w.write_all(text.as_bytes())?;
    writeln!(w)?;
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let image = load(&args)?;
    let cfg = image.decode_config();
    info!(
        host_bits = image.host_bits,
        guest_bits = image.target_long.bits(),
        tbs = image.tbs.len(),
        code = image.code.len(),
        "tcidis: loaded image"
    );

    if args.verify {
        let blocks: Vec<_> = image.tbs.iter().map(|tb| tb.range()).collect();
        verify_blocks(&image.code, &blocks, cfg).context("bytecode validation failed")?;
        info!(blocks = blocks.len(), "tcidis: verified");
    }

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => {
            let f = fs::File::create(path)
                .with_context(|| format!("cannot create {}", path.display()))?;
            Box::new(BufWriter::new(f))
        }
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let tbs = selected(&image, &args)?;
    for (n, tb) in tbs.iter().enumerate() {
        debug!(pc = tb.pc, offset = tb.offset, size = tb.size, "tcidis: block");
        dump_tb(&mut out, n, tb, &image.code, cfg)?;
    }
    out.flush()?;
    Ok(())
}
