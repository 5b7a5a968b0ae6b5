//! Key ordering: lexicographic byte comparison, or fixed-width big-endian
//! integer comparison for `integer_key`/`integer_dup` trees.

use crate::geometry::TreeFlags;
use std::cmp::Ordering;
use std::convert::TryInto;

pub fn compare_keys(flags: TreeFlags, a: &[u8], b: &[u8]) -> Ordering {
    if flags.contains(TreeFlags::INTEGER_KEY) && a.len() == 8 && b.len() == 8 {
        let ai = u64::from_be_bytes(a.try_into().unwrap());
        let bi = u64::from_be_bytes(b.try_into().unwrap());
        ai.cmp(&bi)
    } else {
        a.cmp(b)
    }
}

pub fn compare_dup_values(flags: TreeFlags, a: &[u8], b: &[u8]) -> Ordering {
    if flags.contains(TreeFlags::INTEGER_DUP) && a.len() == 8 && b.len() == 8 {
        let ai = u64::from_be_bytes(a.try_into().unwrap());
        let bi = u64::from_be_bytes(b.try_into().unwrap());
        let ord = ai.cmp(&bi);
        if flags.contains(TreeFlags::REVERSE_DUP) { ord.reverse() } else { ord }
    } else {
        let ord = a.cmp(b);
        if flags.contains(TreeFlags::REVERSE_DUP) { ord.reverse() } else { ord }
    }
}
