//! Winternitz one-time signatures, and the resumable computations built on them.
//!
//! A one-time key consists of `keysize` hash chains of length `2^w - 1`, whose secret
//! starting values are derived one after the other from a single seed. The message is
//! hashed and split into `w`-bit digits, followed by the digits of a checksum. The
//! signature reveals, for every chain, the value reached after `digit` hash steps. The
//! public key is the hash of the concatenated chain ends.
//!
//! Key generation and signing are expressed as a [`ChainCalc`] which can be advanced by
//! an arbitrary budget of elementary operations, so that the hypertree can spread the
//! cost of one-time keys and signatures of upper layers over many signing calls.
use crate::common::{ceil_div, hash, Node, Seed};
use crate::errors::Error;
use blake2::digest::Digest;
use zeroize::Zeroize;

#[cfg(feature = "serde_enabled")]
use {
    serde::{Deserialize, Serialize},
    serde_with::{serde_as, Bytes},
};

/// Sizes of a Winternitz one-time signature, for a Winternitz parameter `w` and a
/// digest length of `n` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
pub struct Winternitz {
    /// Bits encoded per chain.
    pub w: u32,
    /// Digest length in bytes.
    pub n: usize,
    /// Number of chains encoding the message digest.
    pub message_chains: usize,
    /// Number of chains encoding the checksum.
    pub checksum_chains: usize,
}

impl Winternitz {
    /// Compute the sizes for parameter `w` and digest length `n`.
    pub fn new(w: u32, n: usize) -> Self {
        let message_chains = (8 * n + w as usize - 1) / w as usize;
        let max_checksum = message_chains as u64 * ((1u64 << w) - 1);
        let checksum_bits = 64 - max_checksum.leading_zeros();
        let checksum_chains = ((checksum_bits + w - 1) / w) as usize;
        Winternitz {
            w,
            n,
            message_chains,
            checksum_chains,
        }
    }

    /// Sizes for parameter `w` and the output length of `D`.
    pub fn for_digest<D: Digest>(w: u32) -> Self {
        Self::new(w, D::output_size())
    }

    /// Total number of chains.
    pub fn keysize(&self) -> usize {
        self.message_chains + self.checksum_chains
    }

    /// Byte size of a one-time signature.
    pub fn signature_size(&self) -> usize {
        self.keysize() * self.n
    }

    /// Largest digit, which is also the number of hash steps from a chain start to its end.
    pub(crate) fn chain_top(&self) -> u32 {
        ((1u64 << self.w) - 1) as u32
    }

    /// Elementary operations needed to compute a one-time public key: one seed derivation
    /// and `2^w - 1` hashes per chain, and the final hash of the chain ends.
    pub(crate) fn leaf_cost(&self) -> u64 {
        self.keysize() as u64 * (1u64 << self.w) + 1
    }

    /// Digits signed for `message`: the `w`-bit digits of `H(message)` followed by the
    /// digits of the checksum `sum(2^w - 1 - d_i)`, most significant first.
    pub(crate) fn digits<D: Digest>(&self, message: &[u8]) -> Vec<u32> {
        let digest = hash::<D>(message);
        let mut digits = base_w(&digest, self.w, self.message_chains);

        let top = self.chain_top() as u64;
        let checksum: u64 = digits.iter().map(|&d| top - d as u64).sum();
        let mask = top;
        for j in (0..self.checksum_chains).rev() {
            digits.push(((checksum >> (j as u32 * self.w)) & mask) as u32);
        }
        digits
    }
}

/// Split `bytes` into `out_len` digits of `w` bits, most significant bit first. Missing
/// trailing bits are read as zero.
fn base_w(bytes: &[u8], w: u32, out_len: usize) -> Vec<u32> {
    let mask = (1u64 << w) - 1;
    let mut out = Vec::with_capacity(out_len);
    let mut acc: u64 = 0;
    let mut bits: u32 = 0;
    let mut input = bytes.iter();

    for _ in 0..out_len {
        while bits < w {
            acc = (acc << 8) | *input.next().unwrap_or(&0) as u64;
            bits += 8;
        }
        bits -= w;
        out.push(((acc >> bits) & mask) as u32);
        acc &= (1u64 << bits) - 1;
    }
    out
}

/// Resumable walk along the chains of a one-time key: chain `i` is started from the next
/// secret derived from the seed, and hashed until it reaches `targets[i]`, where the value
/// is appended to the output.
#[cfg_attr(feature = "serde_enabled", serde_as)]
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "sk_clone_enabled", derive(Clone))]
pub(crate) struct ChainCalc {
    seed: Seed,
    targets: Vec<u32>,
    chain: usize,
    position: u32,
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Option<Bytes>"))]
    current: Option<Node>,
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Bytes"))]
    output: Vec<u8>,
}

impl Drop for ChainCalc {
    fn drop(&mut self) {
        if let Some(current) = self.current.as_mut() {
            current.zeroize();
        }
    }
}

impl ChainCalc {
    fn new(ots_seed: Seed, targets: Vec<u32>, n: usize) -> Self {
        let capacity = targets.len() * n;
        ChainCalc {
            seed: ots_seed,
            targets,
            chain: 0,
            position: 0,
            current: None,
            output: Vec::with_capacity(capacity),
        }
    }

    fn is_finished(&self) -> bool {
        self.chain == self.targets.len()
    }

    /// Spend at most `budget` operations. Returns the unused part of the budget.
    fn advance<D: Digest>(&mut self, mut budget: u64) -> u64 {
        while budget > 0 && !self.is_finished() {
            budget -= 1;
            match self.current.take() {
                None => {
                    self.current = Some(self.seed.next_seed::<D>().0.clone());
                    self.position = 0;
                }
                Some(mut value) => {
                    self.current = Some(hash::<D>(&value));
                    value.zeroize();
                    self.position += 1;
                }
            }

            if self.position == self.targets[self.chain] {
                if let Some(mut value) = self.current.take() {
                    self.output.extend_from_slice(&value);
                    value.zeroize();
                }
                self.chain += 1;
            }
        }
        budget
    }
}

/// Resumable computation of a one-time public key, i.e. of a Merkle tree leaf.
#[cfg_attr(feature = "serde_enabled", serde_as)]
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "sk_clone_enabled", derive(Clone))]
pub(crate) struct LeafCalc {
    walk: ChainCalc,
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Option<Bytes>"))]
    leaf: Option<Node>,
}

impl LeafCalc {
    /// Start computing the public key of the one-time key derived from `ots_seed`.
    pub(crate) fn new(wots: &Winternitz, ots_seed: Seed) -> Self {
        let targets = vec![wots.chain_top(); wots.keysize()];
        LeafCalc {
            walk: ChainCalc::new(ots_seed, targets, wots.n),
            leaf: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.leaf.is_some()
    }

    /// Spend at most `budget` operations. Returns the unused part of the budget.
    pub(crate) fn advance<D: Digest>(&mut self, budget: u64) -> u64 {
        let mut budget = self.walk.advance::<D>(budget);
        if budget > 0 && self.walk.is_finished() && self.leaf.is_none() {
            budget -= 1;
            self.leaf = Some(hash::<D>(&self.walk.output));
        }
        budget
    }

    /// Take the computed leaf, if finished.
    pub(crate) fn take_leaf(&mut self) -> Option<Node> {
        self.leaf.take()
    }
}

/// Resumable computation of a one-time signature, used to sign the root of the next
/// subtree of a layer with a leaf of the layer above, while the current subtree is in use.
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "sk_clone_enabled", derive(Clone))]
pub(crate) struct RootSigCalc {
    walk: ChainCalc,
    steps: u64,
}

impl RootSigCalc {
    /// Start signing `message` with the one-time key derived from `ots_seed`. The work is
    /// split so that `calls` invocations of `advance_scheduled` finish the signature.
    pub(crate) fn new<D: Digest>(
        wots: &Winternitz,
        ots_seed: Seed,
        message: &[u8],
        calls: u64,
    ) -> Self {
        let targets = wots.digits::<D>(message);
        let total = targets.len() as u64 + targets.iter().map(|&d| d as u64).sum::<u64>();
        RootSigCalc {
            walk: ChainCalc::new(ots_seed, targets, wots.n),
            steps: ceil_div(total, calls),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.walk.is_finished()
    }

    /// Spend the budget fixed at construction.
    pub(crate) fn advance_scheduled<D: Digest>(&mut self) {
        self.walk.advance::<D>(self.steps);
    }

    /// Take the finished signature.
    ///
    /// # Errors
    /// Fails with `SchedulingInvariantViolation` if the signature is not finished.
    pub(crate) fn take_signature(&mut self) -> Result<Vec<u8>, Error> {
        if !self.is_finished() {
            return Err(Error::SchedulingInvariantViolation("root signature"));
        }
        Ok(std::mem::take(&mut self.walk.output))
    }
}

/// Compute the public key of the one-time key derived from `ots_seed`.
pub(crate) fn public_key<D: Digest>(wots: &Winternitz, ots_seed: Seed) -> Node {
    let mut calc = LeafCalc::new(wots, ots_seed);
    calc.advance::<D>(u64::MAX);
    calc.leaf.take().unwrap_or_default()
}

/// Sign `message` with the one-time key derived from `ots_seed`.
pub(crate) fn sign<D: Digest>(wots: &Winternitz, ots_seed: Seed, message: &[u8]) -> Vec<u8> {
    let mut walk = ChainCalc::new(ots_seed, wots.digits::<D>(message), wots.n);
    walk.advance::<D>(u64::MAX);
    std::mem::take(&mut walk.output)
}

/// Recover the one-time public key from a signature over `message`, by completing every
/// chain up to its end. Returns `None` if the signature does not have the expected size.
/// The caller compares the recovered key with the expected one.
pub fn recover_public_key<D: Digest>(
    wots: &Winternitz,
    message: &[u8],
    signature: &[u8],
) -> Option<Node> {
    if signature.len() != wots.signature_size() {
        return None;
    }
    let top = wots.chain_top();
    let mut ends = Vec::with_capacity(signature.len());
    for (value, digit) in signature
        .chunks(wots.n)
        .zip(wots.digits::<D>(message).into_iter())
    {
        let mut end = value.to_vec();
        for _ in digit..top {
            end = hash::<D>(&end);
        }
        ends.extend_from_slice(&end);
    }
    Some(hash::<D>(&ends))
}

#[cfg(test)]
mod test {
    use super::*;
    use blake2::Blake2s;
    use sha2::Sha256;

    fn seed(byte: u8) -> Seed {
        Seed::from_slice(&[byte; 32]).unwrap()
    }

    #[test]
    fn sizes() {
        // 32 bytes with w = 4: 64 message digits, checksum at most 960 (10 bits).
        let wots = Winternitz::new(4, 32);
        assert_eq!(wots.message_chains, 64);
        assert_eq!(wots.checksum_chains, 3);
        assert_eq!(wots.keysize(), 67);
        assert_eq!(wots.signature_size(), 67 * 32);

        // 32 bytes with w = 3: 86 digits (last one padded), checksum at most 602 (10 bits).
        let wots = Winternitz::new(3, 32);
        assert_eq!(wots.message_chains, 86);
        assert_eq!(wots.checksum_chains, 4);

        let wots = Winternitz::new(16, 32);
        assert_eq!(wots.message_chains, 16);
        assert_eq!(wots.checksum_chains, 2);
    }

    #[test]
    fn base_w_splits_msb_first() {
        assert_eq!(base_w(&[0xab, 0xcd], 4, 4), vec![0xa, 0xb, 0xc, 0xd]);
        assert_eq!(base_w(&[0xff], 3, 3), vec![7, 7, 6]);
        assert_eq!(base_w(&[0x12, 0x34], 16, 1), vec![0x1234]);
    }

    #[test]
    fn checksum_balances_digits() {
        let wots = Winternitz::for_digest::<Blake2s>(4);
        let digits = wots.digits::<Blake2s>(b"message");
        assert_eq!(digits.len(), wots.keysize());
        let message_sum: u64 = digits[..wots.message_chains]
            .iter()
            .map(|&d| 15 - d as u64)
            .sum();
        let checksum = digits[wots.message_chains..]
            .iter()
            .fold(0u64, |acc, &d| (acc << 4) | d as u64);
        assert_eq!(message_sum, checksum);
    }

    #[test]
    fn signature_recovers_public_key() {
        let wots = Winternitz::for_digest::<Blake2s>(4);
        let pk = public_key::<Blake2s>(&wots, seed(1));
        let sig = sign::<Blake2s>(&wots, seed(1), b"tilin");

        assert_eq!(sig.len(), wots.signature_size());
        assert_eq!(recover_public_key::<Blake2s>(&wots, b"tilin", &sig), Some(pk.clone()));
        assert_ne!(recover_public_key::<Blake2s>(&wots, b"tolon", &sig), Some(pk));
    }

    #[test]
    fn malformed_signature_recovers_nothing() {
        let wots = Winternitz::for_digest::<Blake2s>(2);
        let sig = sign::<Blake2s>(&wots, seed(2), b"tilin");
        assert_eq!(recover_public_key::<Blake2s>(&wots, b"tilin", &sig[1..]), None);
    }

    #[test]
    fn other_digest() {
        let wots = Winternitz::for_digest::<Sha256>(5);
        let pk = public_key::<Sha256>(&wots, seed(3));
        let sig = sign::<Sha256>(&wots, seed(3), b"tilin");
        assert_eq!(recover_public_key::<Sha256>(&wots, b"tilin", &sig), Some(pk));
    }

    #[test]
    fn leaf_calc_in_small_steps() {
        let wots = Winternitz::for_digest::<Blake2s>(3);
        let expected = public_key::<Blake2s>(&wots, seed(4));

        let mut calc = LeafCalc::new(&wots, seed(4));
        let mut calls = 0u64;
        while !calc.is_finished() {
            assert_eq!(calc.advance::<Blake2s>(7), 0);
            calls += 1;
        }
        assert_eq!(calls, ceil_div(wots.leaf_cost(), 7));
        assert_eq!(calc.take_leaf(), Some(expected));
    }

    #[test]
    fn leaf_calc_returns_unused_budget() {
        let wots = Winternitz::for_digest::<Blake2s>(2);
        let mut calc = LeafCalc::new(&wots, seed(5));
        assert_eq!(calc.advance::<Blake2s>(wots.leaf_cost() + 10), 10);
        assert!(calc.is_finished());
    }

    #[test]
    fn root_sig_calc_finishes_within_calls() {
        let wots = Winternitz::for_digest::<Blake2s>(4);
        let message = [9u8; 32];
        let expected = sign::<Blake2s>(&wots, seed(6), &message);

        let calls = 13;
        let mut calc = RootSigCalc::new::<Blake2s>(&wots, seed(6), &message, calls);
        assert!(calc.take_signature().is_err());
        for _ in 0..calls {
            calc.advance_scheduled::<Blake2s>();
        }
        assert!(calc.is_finished());
        assert_eq!(calc.take_signature().unwrap(), expected);
    }

    #[quickcheck]
    fn recover_matches_keygen(seed_bytes: Vec<u8>, message: Vec<u8>, w: u8) -> bool {
        if seed_bytes.is_empty() {
            return true;
        }
        let wots = Winternitz::for_digest::<Blake2s>(2 + (w % 3) as u32);
        let seed = Seed::from_slice(&seed_bytes).unwrap();
        let pk = public_key::<Blake2s>(&wots, seed.clone());
        let sig = sign::<Blake2s>(&wots, seed, &message);
        recover_public_key::<Blake2s>(&wots, &message, &sig) == Some(pk)
    }
}
