//! Option flags for fulltext indexes.

use bitflags::bitflags;

bitflags! {
    /// What a fulltext index stores per posting.
    ///
    /// The flag set is fixed at index creation and travels with every
    /// segment of the index; readers use it to decide which posting
    /// sections exist on disk.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct OptionFlags: u32 {
        /// Store document frequency only (always present).
        const DOC_ID = 1 << 0;
        /// Store per-document term frequency.
        const TERM_FREQUENCY = 1 << 1;
        /// Store per-block max term frequency for top-k skipping.
        const BLOCK_MAX = 1 << 2;
    }
}

impl Default for OptionFlags {
    fn default() -> Self {
        Self::DOC_ID | Self::TERM_FREQUENCY | Self::BLOCK_MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enables_block_max() {
        let flags = OptionFlags::default();
        assert!(flags.contains(OptionFlags::BLOCK_MAX));
        assert!(flags.contains(OptionFlags::TERM_FREQUENCY));
    }

    #[test]
    fn bits_round_trip() {
        let flags = OptionFlags::DOC_ID | OptionFlags::BLOCK_MAX;
        let restored = OptionFlags::from_bits(flags.bits()).expect("known bits");
        assert_eq!(flags, restored);
        assert!(OptionFlags::from_bits(1 << 31).is_none());
    }
}
