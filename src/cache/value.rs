//! Cached value types and their approximate memory weight

use std::mem::size_of;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::model::EntryKind;

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirChild {
    pub name: String,
    pub path: PathBuf,
    pub kind: EntryKind,
    pub is_symlink: bool,
}

/// Directory children sorted by path
pub type Listing = Arc<[DirChild]>;

/// Approximate heap + inline size of a cached value, in bytes
pub trait Weigh {
    fn weigh(&self) -> u64;
}

impl Weigh for usize {
    fn weigh(&self) -> u64 {
        size_of::<usize>() as u64
    }
}

impl Weigh for Arc<str> {
    fn weigh(&self) -> u64 {
        (self.len() + size_of::<Arc<str>>()) as u64
    }
}

impl Weigh for Listing {
    fn weigh(&self) -> u64 {
        self.iter()
            .map(|child| {
                (child.name.len() + child.path.as_os_str().len() + size_of::<DirChild>()) as u64
            })
            .sum::<u64>()
            + size_of::<Listing>() as u64
    }
}
