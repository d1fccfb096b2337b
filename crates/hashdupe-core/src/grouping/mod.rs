pub mod dirs;
pub mod files;

pub use dirs::{
    build_signatures, DirectoryDuplicateGroup, DirectoryEntry, DirectoryGroups, NestedPolicy,
    Scope, SignatureMode, SignatureOptions,
};
pub use files::{group_files, DuplicateGroup, IntegrityWarning};
