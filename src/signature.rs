//! Hypertree signatures and their byte encoding.
//!
//! A signature holds one part per layer, bottom layer first. Each part is encoded as the
//! 4-byte little-endian leaf index, followed by the one-time signature and by the
//! authentication path, bottom node first:
//!
//! ```text
//! | index (4) | ots (keysize * n) | auth path (height * n) | ... next layer up ...
//! ```
use crate::common::Node;
use crate::errors::Error;
use crate::params::Parameters;
use crate::winternitz::Winternitz;
use blake2::digest::Digest;

#[cfg(feature = "serde_enabled")]
use {
    serde::{Deserialize, Serialize},
    serde_with::{serde_as, Bytes},
};

/// Signature part produced by one layer.
#[cfg_attr(feature = "serde_enabled", serde_as)]
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSignature {
    /// Index of the signing leaf within its subtree.
    pub index: u32,
    /// One-time signature of the message, or of the root of the subtree below.
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Bytes"))]
    pub ots: Vec<u8>,
    /// Authentication path of the signing leaf, bottom node first.
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Vec<Bytes>"))]
    pub auth_path: Vec<Node>,
}

/// A hypertree signature.
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    layers: Vec<LayerSignature>,
}

impl Signature {
    pub(crate) fn new(layers: Vec<LayerSignature>) -> Self {
        Signature { layers }
    }

    /// The per-layer parts, bottom layer first.
    pub fn layers(&self) -> &[LayerSignature] {
        &self.layers
    }

    /// Byte size of a signature for `params` and the digest `D`.
    pub fn size<D: Digest>(params: &Parameters) -> usize {
        let n = D::output_size();
        params
            .layers()
            .iter()
            .map(|layer| {
                4 + Winternitz::new(layer.winternitz, n).signature_size()
                    + layer.height as usize * n
            })
            .sum()
    }

    /// Byte representation of the signature.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for layer in &self.layers {
            out.extend_from_slice(&layer.index.to_le_bytes());
            out.extend_from_slice(&layer.ots);
            for node in &layer.auth_path {
                out.extend_from_slice(node);
            }
        }
        out
    }

    /// Convert a byte array into a signature.
    ///
    /// # Errors
    /// The function returns `Error::InvalidSignatureSize` if the size of `bytes` does not
    /// match `params` and `D`.
    pub fn from_bytes<D: Digest>(params: &Parameters, bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != Self::size::<D>(params) {
            return Err(Error::InvalidSignatureSize(bytes.len()));
        }
        let n = D::output_size();
        let mut layers = Vec::with_capacity(params.num_layers());
        let mut rest = bytes;
        for layer in params.layers().iter().rev() {
            let ots_size = Winternitz::new(layer.winternitz, n).signature_size();

            let mut index = [0u8; 4];
            index.copy_from_slice(&rest[..4]);
            let (ots, tail) = rest[4..].split_at(ots_size);
            let (auth_path, tail) = tail.split_at(layer.height as usize * n);
            rest = tail;

            layers.push(LayerSignature {
                index: u32::from_le_bytes(index),
                ots: ots.to_vec(),
                auth_path: auth_path.chunks(n).map(|node| node.to_vec()).collect(),
            });
        }
        Ok(Signature { layers })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use blake2::Blake2s;

    fn params() -> Parameters {
        Parameters::new(&[4, 6], &[4, 2], &[2, 2]).unwrap()
    }

    fn dummy(params: &Parameters) -> Signature {
        let layers = params
            .layers()
            .iter()
            .rev()
            .enumerate()
            .map(|(i, layer)| LayerSignature {
                index: i as u32 + 7,
                ots: vec![i as u8; Winternitz::new(layer.winternitz, 32).signature_size()],
                auth_path: (0..layer.height).map(|j| vec![j as u8; 32]).collect(),
            })
            .collect();
        Signature::new(layers)
    }

    #[test]
    fn size_of_two_layers() {
        // Bottom: w = 2, 133 chains, height 6. Top: w = 4, 67 chains, height 4.
        let expected = (4 + 133 * 32 + 6 * 32) + (4 + 67 * 32 + 4 * 32);
        assert_eq!(Signature::size::<Blake2s>(&params()), expected);
    }

    #[test]
    fn bytes_layout() {
        let params = params();
        let sig = dummy(&params);
        let bytes = sig.to_bytes();
        assert_eq!(bytes.len(), Signature::size::<Blake2s>(&params));
        assert_eq!(&bytes[..4], &[7, 0, 0, 0]);
        assert_eq!(Signature::from_bytes::<Blake2s>(&params, &bytes).unwrap(), sig);
    }

    #[test]
    fn wrong_size_is_rejected() {
        let params = params();
        let bytes = dummy(&params).to_bytes();
        assert_eq!(
            Signature::from_bytes::<Blake2s>(&params, &bytes[1..]),
            Err(Error::InvalidSignatureSize(bytes.len() - 1))
        );
    }
}
