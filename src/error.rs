use thiserror::Error;

/// Errors returned by map construction and by operations that may resize.
///
/// Misses are not errors, lookups and swaps report them as `None`.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// The allocator could not provide storage for a generation.
    #[error("failed to allocate {bytes} bytes for a table generation")]
    Alloc {
        /// Size of the rejected allocation.
        bytes: usize,
    },

    /// The requested initial scale is larger than the map supports.
    #[error("initial scale {scale} exceeds the maximum of {max}")]
    ScaleTooLarge {
        /// The requested scale.
        scale: u32,
        /// The largest supported scale.
        max: u32,
    },

    /// A resize would grow the table beyond the largest supported scale.
    #[error("table capacity overflow")]
    CapacityOverflow,
}
