use super::slot::Slot;
use std::mem;

/// The size of a cache line, the unit of a bucket.
pub const CACHE_LINE: usize = 64;

/// The number of slots in a cache-aligned bucket.
pub const BUCKET_SLOTS: usize = CACHE_LINE / mem::size_of::<Slot>();

// The maximum number of buckets scanned by a single lookup.
//
// Grows with the table, but never covers more than a quarter of the buckets
// of a large table. Going over the limit forces a resize instead of a long scan.
pub fn limit(scale: u32) -> usize {
    let limit = (scale as usize * 3) / 2 + 2;
    let quarter = (1usize << (scale - 2)) / BUCKET_SLOTS;

    if limit > quarter && quarter > 4 {
        return quarter;
    }

    limit
}

// A bucket-wise probe sequence.
//
// Scans the slots of a bucket starting at the home slot, wrapping within the
// cache line, before striding to the next bucket. The stride is taken from the
// high bits of the hash so that keys which collide on the home bucket usually
// diverge afterwards. It is an odd number of buckets, so a long enough sequence
// visits every bucket of the table.
pub struct Probe {
    // The current slot index, the first slot scanned in the current bucket.
    pub i: usize,
    // The number of buckets visited.
    pub len: usize,
    // Mask for the length of the table.
    mask: usize,
    // The bucket stride.
    stride: usize,
}

impl Probe {
    // Initialize the probe sequence for a table of `2^scale` slots.
    #[inline]
    pub fn start(hash: u64, scale: u32) -> Probe {
        let mask = (1usize << scale) - 1;

        let stride = ((hash >> (u64::BITS - scale)) as usize | 1) * BUCKET_SLOTS;

        Probe {
            i: hash as usize & mask,
            len: 0,
            mask,
            stride,
        }
    }

    // Returns the slot index of the `j`th slot scanned in the current bucket.
    #[inline]
    pub fn slot(&self, j: usize) -> usize {
        let bucket = self.i & !(BUCKET_SLOTS - 1);
        bucket + ((self.i + j) & (BUCKET_SLOTS - 1))
    }

    // Advance to the next bucket.
    #[inline]
    pub fn next(&mut self) {
        self.len += 1;
        self.i = (self.i + self.stride) & self.mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_fits_cache_line() {
        assert_eq!(BUCKET_SLOTS * mem::size_of::<Slot>(), CACHE_LINE);
    }

    #[test]
    fn limits() {
        // Small tables keep the logarithmic limit.
        assert_eq!(limit(4), 8);
        assert_eq!(limit(8), 14);

        // Large tables never scan more than a quarter of their buckets.
        for scale in 4..40 {
            let buckets = (1usize << scale) / BUCKET_SLOTS;
            let quarter = buckets / 4;
            let limit = limit(scale);
            assert!(limit <= (scale as usize * 3) / 2 + 2);
            assert!(quarter <= 4 || limit <= quarter);
        }
    }

    #[test]
    fn probe_stays_in_bucket() {
        let probe = Probe::start(0xdead_beef, 10);
        let bucket = probe.i / BUCKET_SLOTS;

        let mut seen = Vec::new();
        for j in 0..BUCKET_SLOTS {
            let i = probe.slot(j);
            assert_eq!(i / BUCKET_SLOTS, bucket);
            seen.push(i);
        }

        // The home slot comes first and every slot of the bucket is visited once.
        assert_eq!(seen[0], probe.i);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), BUCKET_SLOTS);
    }

    #[test]
    fn stride_from_high_bits() {
        let scale = 8;

        // Same home slot, different high bits.
        let a = Probe::start(0x0000_0000_0000_0011, scale);
        let b = Probe::start(0xf000_0000_0000_0011, scale);
        assert_eq!(a.i, b.i);

        let (mut a, mut b) = (a, b);
        a.next();
        b.next();
        assert_ne!(a.i, b.i);
        assert!(a.i < (1 << scale) && b.i < (1 << scale));

        // The offset within a bucket is preserved.
        assert_eq!(a.i % BUCKET_SLOTS, 0x11 % BUCKET_SLOTS);
    }

    #[test]
    fn visits_every_bucket() {
        let scale = 6;
        let buckets = (1 << scale) / BUCKET_SLOTS;

        for hash in [0, 0x11, u64::MAX, 0xdead_beef_0000_0000] {
            let mut probe = Probe::start(hash, scale);
            let mut seen = vec![false; buckets];

            for _ in 0..buckets {
                seen[probe.i / BUCKET_SLOTS] = true;
                probe.next();
            }

            assert!(seen.iter().all(|&seen| seen));
        }
    }
}
