// crates/keysieve_core/src/consts.rs

pub const MAGIC_FILTER: &[u8; 4] = b"KSBF";
pub const VERSION: u16 = 1;

/// magic(4) + version(2) + scheme(2) + k(4) + size(8)
pub const HDR_SIZE: usize = 20;
pub const CRC_SIZE: usize = 4;

pub const DIGEST_BYTES: usize = 32;
/// Windows start at `(i * 4) % WINDOW_SPAN`, so only the first 28 digest bytes are used.
pub const WINDOW_SPAN: usize = 28;
pub const WINDOW_BYTES: usize = 4;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashScheme {
    /// Sliding 4-byte big-endian windows over one SHA-256 digest (period 7).
    #[default]
    Windowed = 0,
    /// `h1 + i*h2` over two little-endian u64 halves of the digest.
    DoubleHash = 1,
}

impl HashScheme {
    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            0 => Some(Self::Windowed),
            1 => Some(Self::DoubleHash),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windowed => "windowed",
            Self::DoubleHash => "double-hash",
        }
    }
}

const _: () = { assert!(WINDOW_SPAN + WINDOW_BYTES <= DIGEST_BYTES); };
