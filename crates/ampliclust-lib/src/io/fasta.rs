use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::warn;

use crate::amplicon::InputRecord;

/// Options applied while reading amplicons.
#[derive(Clone, Debug)]
pub struct InputOptions {
    /// Separator between identifier and abundance in the header
    /// (e.g. `_` for `id_123`, `;size=` for usearch-style headers).
    pub abundance_separator: String,
    /// Drop records shorter than this (0 = no limit).
    pub min_length: usize,
    /// Drop records longer than this (0 = no limit).
    pub max_length: usize,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            abundance_separator: "_".to_string(),
            min_length: 0,
            max_length: 0,
        }
    }
}

// Enum to hold either a plain file reader, gzipped reader, or stdin reader
pub enum FileReader {
    Plain(BufReader<std::fs::File>),
    Gzipped(BufReader<GzDecoder<BufReader<std::fs::File>>>),
    Stdin(BufReader<std::io::Stdin>),
    StdinGzipped(BufReader<GzDecoder<BufReader<std::io::Stdin>>>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            FileReader::Plain(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
            FileReader::Stdin(r) => r.read(buf),
            FileReader::StdinGzipped(r) => r.read(buf),
        }
    }
}

impl BufRead for FileReader {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        match self {
            FileReader::Plain(r) => r.fill_buf(),
            FileReader::Gzipped(r) => r.fill_buf(),
            FileReader::Stdin(r) => r.fill_buf(),
            FileReader::StdinGzipped(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            FileReader::Plain(r) => r.consume(amt),
            FileReader::Gzipped(r) => r.consume(amt),
            FileReader::Stdin(r) => r.consume(amt),
            FileReader::StdinGzipped(r) => r.consume(amt),
        }
    }
}

pub fn is_stdio_path(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Buffered FASTA reader with byte-oriented records and multi-line
/// sequence support.
pub struct FastaReader<R: BufRead> {
    reader: R,
    buffer: Vec<u8>,
    pending_header: Option<Vec<u8>>,
}

impl FastaReader<FileReader> {
    /// Open a FASTA file (auto-detects gzip), or read from stdin if path is `-`.
    pub fn from_path_or_stdin(path: impl AsRef<Path>) -> Result<Self> {
        if is_stdio_path(path.as_ref()) {
            return Self::from_stdin();
        }
        Self::from_path(path)
    }

    /// Open a FASTA file (auto-detects gzip).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())
            .with_context(|| format!("failed to open file: {:?}", path.as_ref()))?;

        // Check if file is gzipped by reading magic bytes
        let mut buffered = BufReader::with_capacity(4 * 1024 * 1024, file);
        let is_gzipped = {
            let peek = buffered.fill_buf()?;
            peek.len() >= 2 && peek[0] == 0x1f && peek[1] == 0x8b
        };

        let reader = if is_gzipped {
            FileReader::Gzipped(BufReader::new(GzDecoder::new(buffered)))
        } else {
            FileReader::Plain(buffered)
        };

        Ok(Self::new(reader))
    }

    /// Read FASTA from stdin (auto-detects gzip).
    pub fn from_stdin() -> Result<Self> {
        let mut buffered = BufReader::with_capacity(4 * 1024 * 1024, std::io::stdin());
        let is_gzipped = {
            let peek = buffered.fill_buf()?;
            peek.len() >= 2 && peek[0] == 0x1f && peek[1] == 0x8b
        };

        let reader = if is_gzipped {
            FileReader::StdinGzipped(BufReader::new(GzDecoder::new(buffered)))
        } else {
            FileReader::Stdin(buffered)
        };

        Ok(Self::new(reader))
    }
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(1024),
            pending_header: None,
        }
    }

    fn read_line(&mut self) -> Result<Option<&[u8]>> {
        self.buffer.clear();
        let n = self.reader.read_until(b'\n', &mut self.buffer)?;
        if n == 0 {
            return Ok(None);
        }
        while matches!(self.buffer.last(), Some(b'\n') | Some(b'\r')) {
            self.buffer.pop();
        }
        Ok(Some(&self.buffer))
    }

    /// Next (header, sequence) pair, or `None` at end of input.
    pub fn next_record(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => loop {
                match self.read_line()? {
                    None => return Ok(None),
                    Some(line) if line.is_empty() => continue,
                    Some(line) if line[0] == b'>' => break line[1..].to_vec(),
                    Some(line) => {
                        bail!(
                            "malformed FASTA: expected a header line, got {:?}",
                            String::from_utf8_lossy(line)
                        )
                    }
                }
            },
        };

        let mut sequence = Vec::new();
        loop {
            match self.read_line()? {
                None => break,
                Some(line) if line.is_empty() => continue,
                Some(line) if line[0] == b'>' => {
                    let pending = line[1..].to_vec();
                    self.pending_header = Some(pending);
                    break;
                }
                Some(line) => sequence.extend_from_slice(line),
            }
        }

        Ok(Some((header, sequence)))
    }
}

/// Split a header into identifier and abundance.
///
/// The identifier is the header up to the first whitespace; the abundance
/// is the integer after the last occurrence of `separator` inside the
/// identifier. A missing or malformed abundance falls back to 1.
fn parse_header(header: &[u8], separator: &str) -> (Vec<u8>, u64) {
    let id_end = header
        .iter()
        .position(|b| b.is_ascii_whitespace())
        .unwrap_or(header.len());
    let ident = &header[..id_end];

    let sep = separator.as_bytes();
    if !sep.is_empty() && ident.len() > sep.len() {
        if let Some(pos) = ident
            .windows(sep.len())
            .rposition(|window| window == sep)
        {
            let tail = &ident[pos + sep.len()..];
            if !tail.is_empty() && tail.iter().all(u8::is_ascii_digit) {
                if let Ok(abundance) = std::str::from_utf8(tail)
                    .unwrap_or("")
                    .parse::<u64>()
                {
                    if abundance > 0 {
                        return (ident.to_vec(), abundance);
                    }
                }
            }
        }
    }
    (ident.to_vec(), 1)
}

fn is_valid_sequence(seq: &[u8]) -> bool {
    seq.iter()
        .all(|b| matches!(b.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T' | b'U'))
}

/// Read and preprocess all amplicons from a FASTA file.
///
/// Records with empty or non-ACGTU sequences, or falling outside the
/// length limits, are dropped with a warning.
pub fn read_amplicons(path: impl AsRef<Path>, opts: &InputOptions) -> Result<Vec<InputRecord>> {
    let mut reader = FastaReader::from_path_or_stdin(path.as_ref())?;
    let mut records = Vec::new();
    let mut dropped = 0usize;

    while let Some((header, seq)) = reader.next_record()? {
        let (ident, abundance) = parse_header(&header, &opts.abundance_separator);
        if seq.is_empty()
            || !is_valid_sequence(&seq)
            || (opts.min_length > 0 && seq.len() < opts.min_length)
            || (opts.max_length > 0 && seq.len() > opts.max_length)
        {
            warn!(
                id = %String::from_utf8_lossy(&ident),
                length = seq.len(),
                "dropping amplicon (alphabet or length filter)"
            );
            dropped += 1;
            continue;
        }
        records.push(InputRecord::new(ident, seq, abundance));
    }

    if records.is_empty() {
        bail!("no usable amplicons in {:?}", path.as_ref());
    }
    if dropped > 0 {
        warn!(dropped, kept = records.len(), "input filtering finished");
    }
    Ok(records)
}
