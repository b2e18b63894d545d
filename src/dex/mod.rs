// DEX output: partitioning of classes into virtual files and the writer
// driver. The binary codec itself is an external collaborator behind
// `DexCodec`; this layer decides what goes into which file and in what
// order, and assembles the auxiliary outputs (rename map, main dex list).

pub mod distributor;
pub mod writer;

pub use distributor::{
    ClassReferences, DistributionMode, PackageDistribution, VirtualFile, MAX_ENTRIES,
};
pub use writer::{ApplicationWriter, DexCodec, DirectorySink, OutputSink};

/// First API level with native multidex support.
pub const ANDROID_L_API: u32 = 21;
/// API level introducing dex format 037.
pub const ANDROID_N_API: u32 = 24;
/// API level introducing dex format 038.
pub const ANDROID_O_API: u32 = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DexVersion {
    V35,
    V37,
    V38,
}

impl DexVersion {
    pub fn for_api(min_api: u32) -> DexVersion {
        if min_api >= ANDROID_O_API {
            DexVersion::V38
        } else if min_api >= ANDROID_N_API {
            DexVersion::V37
        } else {
            DexVersion::V35
        }
    }

    /// The three version bytes of the dex file magic.
    pub fn magic_bytes(self) -> &'static [u8; 3] {
        match self {
            DexVersion::V35 => b"035",
            DexVersion::V37 => b"037",
            DexVersion::V38 => b"038",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_selection_by_api() {
        assert_eq!(DexVersion::for_api(1), DexVersion::V35);
        assert_eq!(DexVersion::for_api(23), DexVersion::V35);
        assert_eq!(DexVersion::for_api(24), DexVersion::V37);
        assert_eq!(DexVersion::for_api(26), DexVersion::V38);
        assert_eq!(DexVersion::for_api(30), DexVersion::V38);
    }
}
