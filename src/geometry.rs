//! Environment-level sizing and flags: geometry sextuple, open flags, and
//! tree flags, whose numeric values must match the reference format
//! bit-for-bit so a file written by one reader is legible to another.

/// Size of a fixed page, in bytes. Every page in a given file shares this
/// size; it is recorded in the meta page's geometry and never changes for
/// the lifetime of the file.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// The six knobs that describe how a database file may grow and shrink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub page_size: usize,
    /// Minimum mapped size, in bytes.
    pub lower: u64,
    /// Current mapped size, in bytes.
    pub now: u64,
    /// Maximum mapped size the file may grow to, in bytes.
    pub upper: u64,
    /// Amount the file grows by when more pages are needed.
    pub growth_step: u64,
    /// Amount the file may shrink by (not required to ever be exercised).
    pub shrink_step: u64,
}

impl Geometry {
    pub fn new(
        page_size: usize,
        lower: u64,
        now: u64,
        upper: u64,
        growth_step: u64,
        shrink_step: u64,
    ) -> Self {
        Geometry { page_size, lower, now, upper, growth_step, shrink_step }
    }

    pub fn page_count(&self) -> u64 {
        self.now / self.page_size as u64
    }

    pub fn upper_page_count(&self) -> u64 {
        self.upper / self.page_size as u64
    }
}

impl Default for Geometry {
    fn default() -> Self {
        let page_size = page_size::get().max(DEFAULT_PAGE_SIZE);
        let lower = (page_size * 16) as u64;
        let now = (page_size * 256) as u64;
        let upper = 1024u64 * 1024 * 1024; // 1 GiB default cap
        let growth_step = (page_size * 256) as u64;
        let shrink_step = 0;
        Geometry::new(page_size, lower, now, upper, growth_step, shrink_step)
    }
}

/// Minimal hand-rolled bitflags macro: a `#[repr(transparent)]` newtype
/// over an integer, matching the on-disk-flag style used throughout this
/// codebase rather than pulling in the `bitflags` crate for a handful of
/// constants whose numeric values must match fixed reference-format values
/// anyway.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
        pub struct $name(pub $repr);

        impl $name {
            $(pub const $variant: $name = $name($value);)*
            pub const NONE: $name = $name(0);

            pub fn contains(&self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: $name) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: $name) {
                self.0 &= !other.0;
            }

            pub fn bits(&self) -> $repr {
                self.0
            }

            pub fn from_bits_truncate(bits: $repr) -> Self {
                $name(bits)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }
    };
}

bitflags_like! {
    /// Environment open flags.
    pub struct OpenFlags: u32 {
        const NO_SUBDIR    = 0x01;
        const READ_ONLY    = 0x02;
        const NO_META_SYNC = 0x04;
        const NO_SYNC      = 0x08;
        const WRITE_MAP    = 0x10;
        const MAP_ASYNC    = 0x20;
        const NO_READAHEAD = 0x40;
    }
}

bitflags_like! {
    /// Per-tree (DBI) flags. Only the numeric values need to match the
    /// reference format.
    pub struct TreeFlags: u16 {
        const DUP_SORT    = 0x01;
        const INTEGER_KEY = 0x02;
        const DUP_FIXED   = 0x04;
        const INTEGER_DUP = 0x08;
        const REVERSE_DUP = 0x10;
        const CREATE      = 0x20;
    }
}
