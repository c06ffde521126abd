//! Insert-only Bloom filter over SHA-256 digests, with a versioned on-disk blob.
//!
//! Blob layout (LE):
//!   magic[4]   = "KSBF"
//!   version[2] = 1
//!   scheme[2]  = HashScheme (0=windowed, 1=double-hash)
//!   k[4]       = positions per item
//!   size[8]    = number of bits
//!   bits[ceil(size/8)]   bit p lives in byte p/8, mask 1 << (p%8)
//!   crc32[4]   = crc32 of every preceding byte
//!
//! Save goes through a temp file in the destination directory and an atomic rename.

use crate::consts::{HashScheme, CRC_SIZE, DIGEST_BYTES, HDR_SIZE, MAGIC_FILTER, VERSION, WINDOW_BYTES, WINDOW_SPAN};
use crate::errors::{Result, SieveError};
use crate::utils::{crc32, fsync_dir, read_u16, read_u32, read_u64, write_u16, write_u32, write_u64};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

type Digest32 = [u8; DIGEST_BYTES];

#[inline]
fn digest(item: &[u8]) -> Digest32 {
    Sha256::digest(item).into()
}

#[inline]
fn le_u64(dig: &Digest32, at: usize) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(&dig[at..at + 8]);
    u64::from_le_bytes(w)
}

fn byte_len(size: u64) -> Option<usize> {
    usize::try_from(size.div_ceil(8)).ok()
}

/// Bloom filter with a fixed bit count `size` and `k` derived positions per item.
///
/// Not internally synchronized: `add` needs `&mut self`, so sharing a filter
/// between writers means wrapping it in a lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BloomFilter {
    size: u64,
    k: u32,
    scheme: HashScheme,
    bits: Vec<u8>,
}

impl BloomFilter {
    /// Zero-filled filter using the windowed scheme.
    pub fn new(size: u64, k: u32) -> Result<Self> {
        Self::with_scheme(size, k, HashScheme::Windowed)
    }

    pub fn with_scheme(size: u64, k: u32, scheme: HashScheme) -> Result<Self> {
        if size == 0 {
            return Err(SieveError::InvalidParams("size must be > 0".into()));
        }
        if k == 0 {
            return Err(SieveError::InvalidParams("k must be > 0".into()));
        }
        let bytes = byte_len(size)
            .ok_or_else(|| SieveError::InvalidParams(format!("size {size} does not fit in memory")))?;
        let mut bits = Vec::new();
        bits.try_reserve_exact(bytes)
            .map_err(|_| SieveError::InvalidParams(format!("size {size} does not fit in memory")))?;
        bits.resize(bytes, 0);
        Ok(Self { size, k, scheme, bits })
    }

    pub fn size(&self) -> u64 { self.size }
    pub fn k(&self) -> u32 { self.k }
    pub fn scheme(&self) -> HashScheme { self.scheme }

    /// Packed bit storage, `ceil(size/8)` bytes.
    pub fn as_bytes(&self) -> &[u8] { &self.bits }

    pub fn count_ones(&self) -> u64 {
        self.bits.iter().map(|b| u64::from(b.count_ones())).sum()
    }

    pub fn fill_ratio(&self) -> f64 {
        self.count_ones() as f64 / self.size as f64
    }

    /// i-th bit position for an already computed digest.
    #[inline]
    fn position_at(&self, dig: &Digest32, i: u32) -> u64 {
        match self.scheme {
            HashScheme::Windowed => {
                // Only the first 28 bytes are windowed, so positions repeat every 7 indexes.
                let start = ((u64::from(i) * WINDOW_BYTES as u64) % WINDOW_SPAN as u64) as usize;
                let val = u32::from_be_bytes([dig[start], dig[start + 1], dig[start + 2], dig[start + 3]]);
                u64::from(val) % self.size
            }
            HashScheme::DoubleHash => {
                let h1 = le_u64(dig, 0);
                let h2 = le_u64(dig, 8);
                h1.wrapping_add(u64::from(i).wrapping_mul(h2)) % self.size
            }
        }
    }

    #[inline]
    fn indexes<'a>(&'a self, item: &[u8]) -> impl Iterator<Item = u64> + 'a {
        let dig = digest(item);
        (0..self.k).map(move |i| self.position_at(&dig, i))
    }

    /// All `k` positions the item maps to, in index order.
    pub fn positions(&self, item: impl AsRef<[u8]>) -> Vec<u64> {
        self.indexes(item.as_ref()).collect()
    }

    #[inline]
    fn bit(&self, pos: u64) -> bool {
        let idx = (pos / 8) as usize; let off = (pos & 7) as u8;
        (self.bits[idx] & (1u8 << off)) != 0
    }

    pub fn add(&mut self, item: impl AsRef<[u8]>) {
        let dig = digest(item.as_ref());
        for i in 0..self.k {
            let pos = self.position_at(&dig, i);
            let idx = (pos / 8) as usize; let off = (pos & 7) as u8;
            self.bits[idx] |= 1u8 << off;
        }
    }

    /// `false` means definitely absent; `true` means possibly present.
    pub fn contains(&self, item: impl AsRef<[u8]>) -> bool {
        self.indexes(item.as_ref()).all(|pos| self.bit(pos))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HDR_SIZE + self.bits.len() + CRC_SIZE);
        buf.extend_from_slice(MAGIC_FILTER);
        // Writes into a Vec cannot fail.
        let _ = write_u16(&mut buf, VERSION);
        let _ = write_u16(&mut buf, self.scheme as u16);
        let _ = write_u32(&mut buf, self.k);
        let _ = write_u64(&mut buf, self.size);
        buf.extend_from_slice(&self.bits);
        let crc = crc32(&buf);
        let _ = write_u32(&mut buf, crc);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MAGIC_FILTER.len() { return Err(SieveError::Corrupt); }
        if &data[0..4] != MAGIC_FILTER { return Err(SieveError::BadHeader); }
        if data.len() < HDR_SIZE + CRC_SIZE { return Err(SieveError::Corrupt); }

        let mut cur = Cursor::new(&data[4..HDR_SIZE]);
        let version = read_u16(&mut cur)?;
        if version != VERSION { return Err(SieveError::BadHeader); }
        let scheme = HashScheme::from_tag(read_u16(&mut cur)?).ok_or(SieveError::Unsupported)?;
        let k = read_u32(&mut cur)?;
        let size = read_u64(&mut cur)?;
        if k == 0 || size == 0 { return Err(SieveError::Corrupt); }

        let nbytes = byte_len(size).ok_or(SieveError::Corrupt)?;
        let body_end = HDR_SIZE.checked_add(nbytes).ok_or(SieveError::Corrupt)?;
        if body_end.checked_add(CRC_SIZE) != Some(data.len()) { return Err(SieveError::Corrupt); }

        let want = read_u32(&mut Cursor::new(&data[body_end..]))?;
        if crc32(&data[..body_end]) != want { return Err(SieveError::Corrupt); }

        let bits = data[HDR_SIZE..body_end].to_vec();
        let rem = (size % 8) as u32;
        if rem != 0 {
            if let Some(last) = bits.last() {
                if last & (0xFFu8 << rem) != 0 { return Err(SieveError::Corrupt); }
            }
        }
        Ok(Self { size, k, scheme, bits })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.to_bytes())?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut buf = Vec::new();
        r.read_to_end(&mut buf)?;
        Self::from_bytes(&buf)
    }

    /// Atomically replace `path` with the current state.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::Builder::new().prefix(".keysieve_").tempfile_in(dir)?;
        self.write_to(tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)?;
        let _ = fsync_dir(path);
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut f = File::open(path)?;
        Self::read_from(&mut f)
    }
}

/// Sizing helper for an expected item count and target false-positive rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterParams {
    pub size: u64,
    pub k: u32,
}

impl FilterParams {
    /// `size = ceil(-n ln p / ln2^2)`, `k = round(size/n * ln2)`.
    pub fn for_capacity(n: u64, p: f64) -> Result<Self> {
        if n == 0 {
            return Err(SieveError::InvalidParams("capacity must be > 0".into()));
        }
        if !(p > 0.0 && p < 1.0) {
            return Err(SieveError::InvalidParams(format!("false-positive rate {p} not in (0, 1)")));
        }
        let ln2 = std::f64::consts::LN_2;
        let n_f = n as f64;
        let size = (-n_f * p.ln() / (ln2 * ln2)).ceil().max(1.0) as u64;
        let k = ((size as f64 / n_f) * ln2).round().max(1.0) as u32;
        Ok(Self { size, k })
    }

    /// Theoretical false-positive rate after `n` insertions: `(1 - e^{-kn/m})^k`.
    pub fn expected_fp_rate(&self, n: u64) -> f64 {
        let k = f64::from(self.k);
        (1.0 - (-k * n as f64 / self.size as f64).exp()).powf(k)
    }

    pub fn build(&self) -> Result<BloomFilter> {
        BloomFilter::new(self.size, self.k)
    }
}
