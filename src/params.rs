//! Parameters of a hypertree key: one `(height, winternitz, k)` triple per layer.
use crate::errors::Error;

#[cfg(feature = "serde_enabled")]
use {
    serde::{Deserialize, Serialize},
    std::convert::TryFrom,
};

/// Smallest accepted tree height.
pub const MIN_HEIGHT: u32 = 4;
/// Largest accepted tree height. Leaf indices are encoded on 4 bytes.
pub const MAX_HEIGHT: u32 = 32;
/// Smallest accepted Winternitz parameter.
pub const MIN_WINTERNITZ: u32 = 2;
/// Largest accepted Winternitz parameter.
pub const MAX_WINTERNITZ: u32 = 16;
/// Upper bound on the sum of all heights, so that the capacity fits a `u64`.
pub const MAX_TOTAL_HEIGHT: u32 = 63;

/// Parameters of a single layer of the hypertree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
pub struct LayerParams {
    /// Height of every subtree of the layer.
    pub height: u32,
    /// Winternitz parameter `w`: each one-time signature chain encodes `w` bits.
    pub winternitz: u32,
    /// Retain parameter: the top `k - 1` heights below the root are served from
    /// retain stacks instead of treehash instances.
    pub k: u32,
}

impl LayerParams {
    fn validate(&self, layer: usize) -> Result<(), Error> {
        let fail = |reason: String| Err(Error::InvalidParameters(format!("layer {}: {}", layer, reason)));
        if self.height < MIN_HEIGHT || self.height > MAX_HEIGHT {
            return fail(format!(
                "height {} outside {}..={}",
                self.height, MIN_HEIGHT, MAX_HEIGHT
            ));
        }
        if self.winternitz < MIN_WINTERNITZ || self.winternitz > MAX_WINTERNITZ {
            return fail(format!(
                "winternitz parameter {} outside {}..={}",
                self.winternitz, MIN_WINTERNITZ, MAX_WINTERNITZ
            ));
        }
        if self.k < 2 {
            return fail(format!("retain parameter {} is smaller than 2", self.k));
        }
        if self.k > self.height {
            return fail(format!(
                "retain parameter {} exceeds height {}",
                self.k, self.height
            ));
        }
        if (self.height - self.k) % 2 != 0 {
            return fail(format!(
                "height {} minus retain parameter {} is odd",
                self.height, self.k
            ));
        }
        Ok(())
    }

    /// Number of leaves of a subtree of this layer.
    pub fn leaves(&self) -> u64 {
        1u64 << self.height
    }

    /// Number of treehash instances, one per height `0..h-k`.
    pub(crate) fn treehash_count(&self) -> usize {
        (self.height - self.k) as usize
    }

    /// Number of retain stacks, one per height `h-k..=h-2`.
    pub(crate) fn retain_count(&self) -> usize {
        (self.k - 1) as usize
    }

    /// Treehash updates spent per authentication path round.
    pub(crate) fn updates_per_round(&self) -> u32 {
        (self.height - self.k) / 2
    }
}

/// Parameters of a hypertree key. Layer 0 is the top layer, whose root is the public key;
/// the last layer is the bottom layer, whose leaves sign messages.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde_enabled", serde(try_from = "UncheckedParameters"))]
pub struct Parameters {
    layers: Vec<LayerParams>,
}

/// Deserialized form of [`Parameters`], checked by [`Parameters::new`] before use.
#[cfg(feature = "serde_enabled")]
#[derive(Deserialize)]
struct UncheckedParameters {
    layers: Vec<LayerParams>,
}

#[cfg(feature = "serde_enabled")]
impl TryFrom<UncheckedParameters> for Parameters {
    type Error = Error;

    fn try_from(unchecked: UncheckedParameters) -> Result<Self, Error> {
        let layers = unchecked.layers;
        let heights: Vec<u32> = layers.iter().map(|l| l.height).collect();
        let winternitz: Vec<u32> = layers.iter().map(|l| l.winternitz).collect();
        let k: Vec<u32> = layers.iter().map(|l| l.k).collect();
        Parameters::new(&heights, &winternitz, &k)
    }
}

impl Parameters {
    /// Build and validate a parameter set.
    ///
    /// # Errors
    /// The function returns `Error::InvalidParameters` if
    /// * the slices are empty or of different lengths
    /// * some layer has `k < 2`, `k > h`, an odd `h - k`, `h` outside `4..=32`
    ///   or `w` outside `2..=16`
    /// * the heights add up to more than 63
    pub fn new(heights: &[u32], winternitz: &[u32], k: &[u32]) -> Result<Self, Error> {
        if heights.is_empty() {
            return Err(Error::InvalidParameters("no layer".to_string()));
        }
        if heights.len() != winternitz.len() || heights.len() != k.len() {
            return Err(Error::InvalidParameters(format!(
                "mismatched lengths: {} heights, {} winternitz parameters, {} retain parameters",
                heights.len(),
                winternitz.len(),
                k.len()
            )));
        }

        let layers: Vec<LayerParams> = heights
            .iter()
            .zip(winternitz)
            .zip(k)
            .map(|((&height, &winternitz), &k)| LayerParams {
                height,
                winternitz,
                k,
            })
            .collect();

        for (i, layer) in layers.iter().enumerate() {
            layer.validate(i)?;
        }

        let total: u32 = layers.iter().map(|l| l.height).sum();
        if total > MAX_TOTAL_HEIGHT {
            return Err(Error::InvalidParameters(format!(
                "total height {} exceeds {}",
                total, MAX_TOTAL_HEIGHT
            )));
        }

        Ok(Parameters { layers })
    }

    /// Default parameter sets for a given number of signatures, expressed as a power of two:
    /// * up to 2^10: one layer of height 10
    /// * up to 2^20: two layers of height 10
    /// * up to 2^40: four layers of height 10
    pub fn preset(capacity_log2: u32) -> Result<Self, Error> {
        match capacity_log2 {
            0..=10 => Self::new(&[10], &[3], &[2]),
            11..=20 => Self::new(&[10, 10], &[5, 4], &[2, 2]),
            21..=40 => Self::new(&[10, 10, 10, 10], &[9, 9, 9, 3], &[2, 2, 2, 2]),
            _ => Err(Error::InvalidParameters(format!(
                "no preset for 2^{} signatures",
                capacity_log2
            ))),
        }
    }

    /// Number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Parameters of all layers, top first.
    pub fn layers(&self) -> &[LayerParams] {
        &self.layers
    }

    /// Parameters of layer `layer`.
    pub fn layer(&self, layer: usize) -> &LayerParams {
        &self.layers[layer]
    }

    /// Index of the bottom layer.
    pub fn bottom(&self) -> usize {
        self.layers.len() - 1
    }

    /// Total number of signatures a key can produce.
    pub fn capacity(&self) -> u64 {
        let total: u32 = self.layers.iter().map(|l| l.height).sum();
        1u64 << total
    }

    /// Number of signatures served by one subtree of `layer`.
    pub(crate) fn signatures_per_tree(&self, layer: usize) -> u64 {
        let total: u32 = self.layers[layer..].iter().map(|l| l.height).sum();
        1u64 << total
    }

    /// Number of signatures during which one leaf of `layer` stays active.
    pub(crate) fn signatures_per_leaf(&self, layer: usize) -> u64 {
        self.signatures_per_tree(layer) >> self.layers[layer].height
    }
}
