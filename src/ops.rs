//! Operation-flag semantics for `put`.

macro_rules! bitflags_put {
    (pub struct $name:ident: $repr:ty { $(const $variant:ident = $value:expr;)* }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub $repr);
        impl $name {
            $(pub const $variant: $name = $name($value);)*
            pub const NONE: $name = $name(0);
            pub fn contains(&self, other: $name) -> bool { self.0 & other.0 == other.0 }
            pub fn bits(&self) -> $repr { self.0 }
        }
        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name { $name(self.0 | rhs.0) }
        }
    };
}

bitflags_put! {
    pub struct PutFlags: u32 {
        const NO_OVERWRITE = 0x01;
        const NO_DUP_DATA  = 0x02;
        const CURRENT      = 0x04;
        const RESERVE      = 0x08;
        const APPEND       = 0x10;
        const APPEND_DUP   = 0x20;
        const MULTIPLE     = 0x40;
    }
}

impl PutFlags {
    /// The default operation: create or replace.
    pub fn upsert() -> Self {
        PutFlags::NONE
    }
}
