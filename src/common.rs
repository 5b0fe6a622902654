//! Structures common to all layers of the hypertree
use crate::errors::Error;
use blake2::digest::Digest;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(feature = "serde_enabled")]
use {
    serde::{Deserialize, Serialize},
    serde_with::{serde_as, Bytes},
};

/// A node of a Merkle tree, which is the output of the tree hash function.
pub type Node = Vec<u8>;

/// Domain tag of the key material half of a seed derivation.
const MATERIAL_TAG: u8 = 1;
/// Domain tag of the successor half of a seed derivation.
const SUCCESSOR_TAG: u8 = 2;
/// Domain tag used to split the master seed into one chain per layer.
const LAYER_TAG: u8 = 3;

/// Seed of a hash chain. Every use of a seed derives key material and the successor
/// seed, and the seed itself is overwritten by its successor, so that past seeds cannot be
/// recovered from the current state.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
#[cfg_attr(feature = "serde_enabled", serde_as)]
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
pub struct Seed(#[cfg_attr(feature = "serde_enabled", serde_as(as = "Bytes"))] pub(crate) Vec<u8>);

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed({} bytes)", self.0.len())
    }
}

impl AsRef<[u8]> for Seed {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Seed {
    /// Creates a `Seed` from a slice.
    ///
    /// # Errors
    /// The function fails if `bytes` is empty.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.is_empty() {
            return Err(Error::InvalidSeedSize(0));
        }
        Ok(Seed(bytes.to_vec()))
    }

    /// Byte length of the seed.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the seed holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Derive the key material and the successor of `self`, without consuming `self`.
    /// The material is `H(0x01 || seed)` and the successor is `H(0x02 || seed)`.
    pub(crate) fn derive<D: Digest>(&self) -> (Seed, Seed) {
        let mut material = D::new();
        material.update([MATERIAL_TAG]);
        material.update(&self.0);

        let mut successor = D::new();
        successor.update([SUCCESSOR_TAG]);
        successor.update(&self.0);

        (
            Seed(material.finalize().to_vec()),
            Seed(successor.finalize().to_vec()),
        )
    }

    /// Returns the key material of `self` and overwrites `self` with its successor.
    pub(crate) fn next_seed<D: Digest>(&mut self) -> Seed {
        let (material, successor) = self.derive::<D>();
        self.0.zeroize();
        self.0 = successor.0.clone();
        material
    }

    /// Returns the key material of `self`, leaving `self` untouched.
    pub(crate) fn material<D: Digest>(&self) -> Seed {
        self.derive::<D>().0
    }

    /// Returns the successor of `self`, leaving `self` untouched.
    pub(crate) fn successor<D: Digest>(&self) -> Seed {
        self.derive::<D>().1
    }

    /// Split the master seed into the starting seed of each layer chain.
    pub(crate) fn split_layers<D: Digest>(&self, layers: usize) -> Vec<Seed> {
        (0..layers)
            .map(|layer| {
                let mut h = D::new();
                h.update([LAYER_TAG]);
                h.update((layer as u32).to_le_bytes());
                h.update(&self.0);
                Seed(h.finalize().to_vec())
            })
            .collect()
    }
}

/// Hash a byte string.
pub(crate) fn hash<D: Digest>(data: &[u8]) -> Node {
    D::digest(data).to_vec()
}

/// Hash two nodes, left one first.
pub(crate) fn hash_pair<D: Digest>(left: &[u8], right: &[u8]) -> Node {
    let mut h = D::new();
    h.update(left);
    h.update(right);
    h.finalize().to_vec()
}

/// Number of calls needed to spend `total` units with `calls` invocations, rounded up.
pub(crate) fn ceil_div(total: u64, calls: u64) -> u64 {
    if calls == 0 {
        return total;
    }
    (total + calls - 1) / calls
}

#[cfg(test)]
mod test {
    use super::*;
    use blake2::Blake2s;

    #[test]
    fn next_seed_overwrites_and_is_deterministic() {
        let mut a = Seed::from_slice(&[7u8; 32]).unwrap();
        let mut b = a.clone();

        let ma = a.next_seed::<Blake2s>();
        let mb = b.next_seed::<Blake2s>();
        assert_eq!(ma, mb);
        assert_eq!(a, b);
        assert_ne!(a.as_ref(), &[7u8; 32][..]);
        assert_ne!(ma, a);
    }

    #[test]
    fn successor_matches_next_seed() {
        let start = Seed::from_slice(b"a seed of arbitrary length").unwrap();
        let mut chain = start.clone();
        chain.next_seed::<Blake2s>();
        assert_eq!(chain, start.successor::<Blake2s>());
        assert_eq!(start.clone().next_seed::<Blake2s>(), start.material::<Blake2s>());
        assert_eq!(chain.len(), 32);
    }

    #[test]
    fn layer_seeds_differ() {
        let master = Seed::from_slice(&[0u8; 32]).unwrap();
        let layers = master.split_layers::<Blake2s>(3);
        assert_eq!(layers.len(), 3);
        assert_ne!(layers[0], layers[1]);
        assert_ne!(layers[1], layers[2]);
    }

    #[test]
    fn empty_seed_is_rejected() {
        assert_eq!(Seed::from_slice(&[]), Err(Error::InvalidSeedSize(0)));
    }

    #[test]
    fn ceil_div_rounds_up() {
        assert_eq!(ceil_div(10, 3), 4);
        assert_eq!(ceil_div(9, 3), 3);
        assert_eq!(ceil_div(1, 1 << 40), 1);
        assert_eq!(ceil_div(0, 5), 0);
    }
}
