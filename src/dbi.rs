//! Named-tree handles, one per open database within an environment.
//!
//! The unnamed/default database (`name: None`) is the environment's main
//! tree directly. A named dbi is an entry in the main tree, keyed by its
//! name bytes, whose value is a serialized `TreeRecord` — a
//! directory-of-trees design that makes opening a named database an
//! ordinary lookup in the tree every transaction already has a handle to.

use crate::geometry::TreeFlags;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dbi {
    pub(crate) name: Option<String>,
    pub flags: TreeFlags,
}

impl Dbi {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unnamed_dbi_has_no_name() {
        let dbi = Dbi { name: None, flags: TreeFlags::NONE };
        assert_eq!(dbi.name(), None);
    }

    #[test]
    fn named_dbi_exposes_its_name() {
        let dbi = Dbi { name: Some("widgets".to_string()), flags: TreeFlags::CREATE };
        assert_eq!(dbi.name(), Some("widgets"));
    }
}
