/// Nucleotide encoding used for k-mer packing: A=0, C=1, G=2, T=3.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
pub enum Base {
    A = 0,
    C = 1,
    G = 2,
    T = 3,
}

impl Base {
    #[inline]
    pub fn from_ascii(b: u8) -> Option<Base> {
        match MAPPED_BASE[b as usize] {
            0 => Some(Base::A),
            1 => Some(Base::C),
            2 => Some(Base::G),
            3 => Some(Base::T),
            _ => None,
        }
    }

    /// Map an ASCII byte to a Base, treating non-ACGT as A (caller's responsibility
    /// to check is_placeholder first).
    #[inline]
    pub fn map_base(b: u8) -> Base {
        Base::from_ascii(b).unwrap_or(Base::A)
    }

    #[inline]
    pub fn code(self) -> u64 {
        self as u64
    }
}

/// Outcome of normalizing one input symbol.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Symbol {
    /// Keep this (upper-cased) byte in the normalized sequence.
    Keep(u8),
    /// Alignment gap, dropped from the normalized sequence.
    Gap,
    /// Not part of the nucleotide alphabet.
    Invalid,
}

/// Normalize a raw input byte: upper-case, U→T, IUPAC ambiguity codes → N.
#[inline]
pub fn normalize(b: u8) -> Symbol {
    match NORMALIZED[b as usize] {
        INVALID => Symbol::Invalid,
        GAP => Symbol::Gap,
        c => Symbol::Keep(c),
    }
}

/// Returns true for anything not in ACGTacgt.
#[inline]
pub fn is_placeholder(b: u8) -> bool {
    MAPPED_BASE[b as usize] > 3
}

// 4 = placeholder.
const MAPPED_BASE: [u8; 256] = {
    let mut table = [4u8; 256];
    table[b'A' as usize] = 0;
    table[b'a' as usize] = 0;
    table[b'C' as usize] = 1;
    table[b'c' as usize] = 1;
    table[b'G' as usize] = 2;
    table[b'g' as usize] = 2;
    table[b'T' as usize] = 3;
    table[b't' as usize] = 3;
    table
};

const INVALID: u8 = 0;
const GAP: u8 = 1;

const NORMALIZED: [u8; 256] = {
    let mut table = [INVALID; 256];
    let bases = b"ACGT";
    let mut i = 0;
    while i < bases.len() {
        table[bases[i] as usize] = bases[i];
        table[bases[i].to_ascii_lowercase() as usize] = bases[i];
        i += 1;
    }
    table[b'U' as usize] = b'T';
    table[b'u' as usize] = b'T';
    let ambiguous = b"RYSWKMBDHVN";
    let mut i = 0;
    while i < ambiguous.len() {
        table[ambiguous[i] as usize] = b'N';
        table[ambiguous[i].to_ascii_lowercase() as usize] = b'N';
        i += 1;
    }
    table[b'-' as usize] = GAP;
    table[b'.' as usize] = GAP;
    table
};
