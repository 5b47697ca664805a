/// Binary descriptor compared with the Hamming metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub data: Vec<u8>,
}

impl Descriptor {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn hamming_distance(&self, other: &Descriptor) -> u32 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Descriptors indexed in lockstep with the [`crate::KeyPoints`] they describe.
#[derive(Debug, Clone, Default)]
pub struct Descriptors {
    pub descriptors: Vec<Descriptor>,
}

impl Descriptors {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            descriptors: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, desc: Descriptor) {
        self.descriptors.push(desc);
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&Descriptor> {
        self.descriptors.get(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_identical_is_zero() {
        let d = Descriptor::new(vec![0b10101010u8, 0b11110000, 0b00001111]);
        assert_eq!(d.hamming_distance(&d), 0);
    }

    #[test]
    fn hamming_all_different_is_max() {
        let a = Descriptor::new(vec![0xFFu8; 4]);
        let b = Descriptor::new(vec![0x00u8; 4]);
        assert_eq!(a.hamming_distance(&b), 32);
    }

    #[test]
    fn hamming_partial_overlap() {
        let a = Descriptor::new(vec![0b11110000u8]);
        let b = Descriptor::new(vec![0b11001111u8]);
        assert_eq!(a.hamming_distance(&b), 6);
    }

    #[test]
    fn descriptors_push_and_get() {
        let mut ds = Descriptors::with_capacity(2);
        assert!(ds.is_empty());
        ds.push(Descriptor::new(vec![0u8; 32]));
        ds.push(Descriptor::new(vec![1u8; 32]));
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(1).map(Descriptor::size), Some(32));
        assert!(ds.get(2).is_none());
    }
}
