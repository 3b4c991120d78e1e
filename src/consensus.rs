//! Read-with-consensus
//!
//! Some status registers can return a wrong value on a single read. A
//! [`Consensus`] samples a register several times, and prefers the most recent
//! sample that agrees with the sample before it.

/// A retry policy for unreliable reads
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub struct Consensus {
    reads: usize,
}

impl Consensus {
    /// Sample `reads` times. Fewer than one read behaves like one read.
    pub const fn new(reads: usize) -> Self {
        Consensus { reads }
    }

    pub const fn reads(&self) -> usize {
        self.reads
    }

    /// Sample with `read`
    ///
    /// Returns the most recent sample that equals its predecessor. If no two
    /// consecutive samples agree, returns the last sample.
    pub fn read<T: PartialEq + Copy>(&self, mut read: impl FnMut() -> T) -> T {
        let mut previous = read();
        let mut agreed = None;
        for _ in 1..self.reads.max(1) {
            let current = read();
            if current == previous {
                agreed = Some(current);
            }
            previous = current;
        }
        agreed.unwrap_or(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::Consensus;

    fn samples(values: &[u32]) -> impl FnMut() -> u32 + '_ {
        let mut iter = values.iter().copied();
        move || iter.next().unwrap_or(u32::MAX)
    }

    #[test]
    fn agreement() {
        let consensus = Consensus::new(3);
        assert_eq!(consensus.read(samples(&[1, 1, 0])), 1);
        assert_eq!(consensus.read(samples(&[0, 1, 1])), 1);
    }

    #[test]
    fn no_agreement() {
        let consensus = Consensus::new(3);
        assert_eq!(consensus.read(samples(&[0, 1, 2])), 2);
    }

    #[test]
    fn single_read() {
        assert_eq!(Consensus::new(1).read(samples(&[7, 8])), 7);
        assert_eq!(Consensus::new(0).read(samples(&[7, 8])), 7);
    }
}
