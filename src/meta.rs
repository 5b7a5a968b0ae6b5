//! Meta page codec.
//!
//! Two meta pages live at fixed page ids 0 and 1. Each carries the page
//! header (kind = Meta) followed by magic/version/geometry/tree-records/
//! last-committed-txn-id/checksum. The reader selects whichever of the two
//! has the higher txn id *and* a checksum that validates.

use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::page::{self, Header, PageKind, HEADER_SIZE};
use crate::tree_record::{TreeRecord, TREE_RECORD_SIZE};
use std::convert::TryInto;

pub const MAGIC: u32 = 0x5041_4745; // "PAGE"
pub const FORMAT_VERSION: u32 = 1;
pub const GEOMETRY_SIZE: usize = 4 + 8 * 5; // page_size:u32 + 5 u64 sizes
pub const META_BODY_SIZE: usize = 4 + 4 + GEOMETRY_SIZE + TREE_RECORD_SIZE * 2 + 8 + 4;

pub const META_PAGE_IDS: [u64; 2] = [0, 1];

#[derive(Debug, Clone, Copy)]
pub struct Meta {
    pub geometry: Geometry,
    pub main_tree: TreeRecord,
    pub gc_tree: TreeRecord,
    pub last_txn_id: u64,
}

fn write_geometry(bytes: &mut [u8], g: &Geometry) {
    bytes[0..4].copy_from_slice(&(g.page_size as u32).to_le_bytes());
    bytes[4..12].copy_from_slice(&g.lower.to_le_bytes());
    bytes[12..20].copy_from_slice(&g.now.to_le_bytes());
    bytes[20..28].copy_from_slice(&g.upper.to_le_bytes());
    bytes[28..36].copy_from_slice(&g.growth_step.to_le_bytes());
    bytes[36..44].copy_from_slice(&g.shrink_step.to_le_bytes());
}

fn read_geometry(bytes: &[u8]) -> Geometry {
    Geometry {
        page_size: u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize,
        lower: u64::from_le_bytes(bytes[4..12].try_into().unwrap()),
        now: u64::from_le_bytes(bytes[12..20].try_into().unwrap()),
        upper: u64::from_le_bytes(bytes[20..28].try_into().unwrap()),
        growth_step: u64::from_le_bytes(bytes[28..36].try_into().unwrap()),
        shrink_step: u64::from_le_bytes(bytes[36..44].try_into().unwrap()),
    }
}

/// Writes a full meta page (header + body + checksum) at page id `slot`.
pub fn write_meta(page_bytes: &mut [u8], slot: u64, meta: &Meta) {
    page::write_header(
        page_bytes,
        &Header { page_id: slot, kind: PageKind::Meta, lower: HEADER_SIZE as u16, upper: page_bytes.len() as u16, txn_id: meta.last_txn_id },
    );

    let body = &mut page_bytes[HEADER_SIZE..HEADER_SIZE + META_BODY_SIZE];
    body[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    body[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    write_geometry(&mut body[8..8 + GEOMETRY_SIZE], &meta.geometry);
    let mut off = 8 + GEOMETRY_SIZE;
    meta.main_tree.write(&mut body[off..off + TREE_RECORD_SIZE]);
    off += TREE_RECORD_SIZE;
    meta.gc_tree.write(&mut body[off..off + TREE_RECORD_SIZE]);
    off += TREE_RECORD_SIZE;
    body[off..off + 8].copy_from_slice(&meta.last_txn_id.to_le_bytes());
    off += 8;

    // checksum covers header + body up to (but not including) the checksum field
    let checksum_range_end = HEADER_SIZE + off;
    let checksum = crc32fast::hash(&page_bytes[0..checksum_range_end]);
    page_bytes[checksum_range_end..checksum_range_end + 4].copy_from_slice(&checksum.to_le_bytes());
}

/// Parses and validates one meta page. Fails with `Corrupt` on a bad magic,
/// an unsupported version, a failed checksum, or a header the page codec
/// itself rejects.
pub fn read_meta(page_bytes: &[u8]) -> Result<Meta> {
    let header = page::read_header(page_bytes)?;
    if header.kind != PageKind::Meta {
        return Err(Error::Corrupt("expected meta page kind".into()));
    }

    let body = &page_bytes[HEADER_SIZE..HEADER_SIZE + META_BODY_SIZE];
    let magic = u32::from_le_bytes(body[0..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(Error::Corrupt(format!("bad magic {magic:#x}")));
    }
    let version = u32::from_le_bytes(body[4..8].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(Error::VersionMismatch { found: version, expected: FORMAT_VERSION });
    }

    let geometry = read_geometry(&body[8..8 + GEOMETRY_SIZE]);
    let mut off = 8 + GEOMETRY_SIZE;
    let main_tree = TreeRecord::read(&body[off..off + TREE_RECORD_SIZE]);
    off += TREE_RECORD_SIZE;
    let gc_tree = TreeRecord::read(&body[off..off + TREE_RECORD_SIZE]);
    off += TREE_RECORD_SIZE;
    let last_txn_id = u64::from_le_bytes(body[off..off + 8].try_into().unwrap());
    off += 8;

    let checksum_range_end = HEADER_SIZE + off;
    let stored = u32::from_le_bytes(page_bytes[checksum_range_end..checksum_range_end + 4].try_into().unwrap());
    let computed = crc32fast::hash(&page_bytes[0..checksum_range_end]);
    if stored != computed {
        return Err(Error::Corrupt("meta checksum mismatch".into()));
    }

    Ok(Meta { geometry, main_tree, gc_tree, last_txn_id })
}

/// Picks the active meta among both slots: the higher txn id that passes
/// validation. If both fail, the file is corrupt.
pub fn select_active(slot0: &[u8], slot1: &[u8]) -> Result<(u64, Meta)> {
    let a = read_meta(slot0);
    let b = read_meta(slot1);
    match (a, b) {
        (Ok(ma), Ok(mb)) => {
            if ma.last_txn_id >= mb.last_txn_id {
                Ok((0, ma))
            } else {
                Ok((1, mb))
            }
        }
        (Ok(ma), Err(_)) => Ok((0, ma)),
        (Err(_), Ok(mb)) => Ok((1, mb)),
        (Err(e), Err(_)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TreeFlags;

    #[test]
    fn round_trip_and_checksum() {
        let mut buf = vec![0u8; 4096];
        let meta = Meta {
            geometry: Geometry::default(),
            main_tree: TreeRecord::empty(TreeFlags::NONE, 2),
            gc_tree: TreeRecord::empty(TreeFlags::NONE, 3),
            last_txn_id: 9,
        };
        write_meta(&mut buf, 0, &meta);
        let back = read_meta(&buf).unwrap();
        assert_eq!(back.last_txn_id, 9);
        assert_eq!(back.main_tree.root_page_id, 2);
        assert_eq!(back.gc_tree.root_page_id, 3);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut buf = vec![0u8; 4096];
        let meta = Meta {
            geometry: Geometry::default(),
            main_tree: TreeRecord::empty(TreeFlags::NONE, 2),
            gc_tree: TreeRecord::empty(TreeFlags::NONE, 3),
            last_txn_id: 1,
        };
        write_meta(&mut buf, 0, &meta);
        buf[HEADER_SIZE] ^= 0xff;
        assert!(read_meta(&buf).is_err());
    }

    #[test]
    fn select_active_prefers_higher_txn_id() {
        let mut slot0 = vec![0u8; 4096];
        let mut slot1 = vec![0u8; 4096];
        let base = Meta {
            geometry: Geometry::default(),
            main_tree: TreeRecord::empty(TreeFlags::NONE, 2),
            gc_tree: TreeRecord::empty(TreeFlags::NONE, 3),
            last_txn_id: 5,
        };
        write_meta(&mut slot0, 0, &base);
        let mut newer = base;
        newer.last_txn_id = 6;
        write_meta(&mut slot1, 1, &newer);

        let (slot, meta) = select_active(&slot0, &slot1).unwrap();
        assert_eq!(slot, 1);
        assert_eq!(meta.last_txn_id, 6);
    }
}
