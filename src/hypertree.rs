//! Hypertree key pairs: key generation, signing and verification.
use crate::common::{hash_pair, Node, Seed};
use crate::errors::Error;
use crate::params::Parameters;
use crate::signature::Signature;
use crate::state::HyperTreeState;
use crate::winternitz::{recover_public_key, Winternitz};
use blake2::digest::Digest;
use blake2::Blake2s;
use rand_core::{CryptoRng, RngCore};
use std::fmt;
use std::marker::PhantomData;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

#[cfg(feature = "serde_enabled")]
use {
    serde::{Deserialize, Serialize},
    serde_with::{serde_as, Bytes},
};

/// Size of the master seed drawn by [`generate`].
pub const SEED_SIZE: usize = 32;

/// Private key of a hypertree signature scheme over the digest `D`. The key is stateful:
/// every signature consumes one leaf of the bottom layer, and past leaves cannot be
/// recovered from the current state.
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde_enabled", serde(bound = ""))]
pub struct PrivateKey<D = Blake2s> {
    state: HyperTreeState,
    #[cfg_attr(feature = "serde_enabled", serde(skip))]
    _digest: PhantomData<D>,
}

/// Public key of a hypertree signature scheme: the root of the top layer, together with
/// the parameters needed to parse signatures.
#[cfg_attr(feature = "serde_enabled", serde_as)]
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde_enabled", serde(bound = ""))]
pub struct PublicKey<D = Blake2s> {
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Bytes"))]
    root: Node,
    params: Parameters,
    #[cfg_attr(feature = "serde_enabled", serde(skip))]
    _digest: PhantomData<D>,
}

impl<D: Digest> PrivateKey<D> {
    /// Deterministic key generation from a master seed. Every subtree used at the start
    /// is built here, so the cost is that of two subtrees per layer.
    ///
    /// # Errors
    /// Fails with `SchedulingInvariantViolation` only if a subtree could not be completed,
    /// which does not happen for validated parameters.
    pub fn keygen(params: &Parameters, seed: &Seed) -> Result<(Self, PublicKey<D>), Error> {
        let state = HyperTreeState::keygen::<D>(params, seed)?;
        let pk = PublicKey::new(state.public_root().clone(), params.clone());
        Ok((
            PrivateKey {
                state,
                _digest: PhantomData,
            },
            pk,
        ))
    }

    /// Key generation from a fresh master seed drawn from `rng`.
    pub fn generate<R>(rng: &mut R, params: &Parameters) -> Result<(Self, PublicKey<D>), Error>
    where
        R: RngCore + CryptoRng,
    {
        let mut bytes = [0u8; SEED_SIZE];
        rng.fill_bytes(&mut bytes);
        let seed = Seed::from_slice(&bytes);
        bytes.zeroize();
        Self::keygen(params, &seed?)
    }

    /// Sign `m` with the current leaf, then move to the next one.
    ///
    /// # Errors
    /// `KeyExhausted` if every leaf was consumed, `PrivateKeyAlreadyUsed` if the current
    /// leaf already signed through [`PrivateKey::sign_current`].
    pub fn sign(&mut self, m: &[u8]) -> Result<Signature, Error> {
        let signature = self.sign_current(m)?;
        self.update()?;
        Ok(signature)
    }

    /// Sign `m` with the current leaf, without moving to the next one. The leaf is then
    /// marked as used, and signing again requires a call to [`PrivateKey::update`].
    ///
    /// # Errors
    /// `KeyExhausted` if every leaf was consumed, `PrivateKeyAlreadyUsed` if the current
    /// leaf already signed.
    pub fn sign_current(&mut self, m: &[u8]) -> Result<Signature, Error> {
        self.state.sign::<D>(m)
    }

    /// Move to the next leaf, whether the current one signed or not.
    ///
    /// # Errors
    /// `KeyExhausted` if every leaf was already consumed. A `SchedulingInvariantViolation`
    /// means the key is corrupted and must be discarded.
    pub fn update(&mut self) -> Result<(), Error> {
        self.state.update::<D>()
    }

    /// Number of leaves consumed so far, which is also the index of the next signature.
    pub fn index(&self) -> u64 {
        self.state.counter()
    }

    /// Number of signatures the key can still produce.
    pub fn remaining(&self) -> u64 {
        self.state.params().capacity() - self.state.counter()
    }

    /// Whether every leaf was consumed.
    pub fn is_exhausted(&self) -> bool {
        self.state.is_exhausted()
    }

    /// Parameters of the key.
    pub fn params(&self) -> &Parameters {
        self.state.params()
    }

    /// The public key matching this private key.
    pub fn public_key(&self) -> PublicKey<D> {
        PublicKey::new(self.state.public_root().clone(), self.state.params().clone())
    }
}

#[cfg(feature = "sk_clone_enabled")]
impl<D> Clone for PrivateKey<D> {
    fn clone(&self) -> Self {
        PrivateKey {
            state: self.state.clone(),
            _digest: PhantomData,
        }
    }
}

impl<D: Digest> fmt::Debug for PrivateKey<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("params", self.state.params())
            .field("index", &self.state.counter())
            .field("exhausted", &self.state.is_exhausted())
            .finish()
    }
}

impl<D: Digest> PublicKey<D> {
    fn new(root: Node, params: Parameters) -> Self {
        PublicKey {
            root,
            params,
            _digest: PhantomData,
        }
    }

    /// Root of the top layer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.root
    }

    /// Convert a root into a public key for `params`.
    ///
    /// # Errors
    /// The function returns `Error::InvalidPublicKeySize` if `bytes` is not a digest of `D`.
    pub fn from_bytes(params: &Parameters, bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != D::output_size() {
            return Err(Error::InvalidPublicKeySize(bytes.len()));
        }
        Ok(Self::new(bytes.to_vec(), params.clone()))
    }

    /// Parameters of the key.
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Verify `signature` over `m`.
    pub fn verify(&self, m: &[u8], signature: &Signature) -> bool {
        match recompute_root::<D>(&self.params, m, signature) {
            Some(root) => root.as_slice().ct_eq(self.root.as_slice()).into(),
            None => false,
        }
    }

    /// Verify a signature in its byte encoding. Malformed encodings do not verify.
    pub fn verify_bytes(&self, m: &[u8], signature: &[u8]) -> bool {
        match Signature::from_bytes::<D>(&self.params, signature) {
            Ok(signature) => self.verify(m, &signature),
            Err(_) => false,
        }
    }

    /// Verify `signature` over `m`, reporting failure as an error.
    ///
    /// # Errors
    /// `VerificationFailed` whatever the reason of the failure.
    pub fn verify_strict(&self, m: &[u8], signature: &Signature) -> Result<(), Error> {
        if self.verify(m, signature) {
            return Ok(());
        }
        Err(Error::VerificationFailed)
    }
}

impl<D> Clone for PublicKey<D> {
    fn clone(&self) -> Self {
        PublicKey {
            root: self.root.clone(),
            params: self.params.clone(),
            _digest: PhantomData,
        }
    }
}

impl<D> PartialEq for PublicKey<D> {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.params == other.params
    }
}

impl<D> Eq for PublicKey<D> {}

impl<D> fmt::Debug for PublicKey<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("root", &self.root)
            .field("params", &self.params)
            .finish()
    }
}

/// Recompute the top root from a signature, bottom layer first. Returns `None` if the
/// signature does not have the shape `params` describes.
fn recompute_root<D: Digest>(params: &Parameters, m: &[u8], signature: &Signature) -> Option<Node> {
    let n = D::output_size();
    if signature.layers().len() != params.num_layers() {
        return None;
    }

    let mut message = m.to_vec();
    for (part, layer) in signature.layers().iter().zip(params.layers().iter().rev()) {
        if part.index as u64 >= layer.leaves()
            || part.auth_path.len() != layer.height as usize
            || part.auth_path.iter().any(|node| node.len() != n)
        {
            return None;
        }

        let wots = Winternitz::new(layer.winternitz, n);
        let mut node = recover_public_key::<D>(&wots, &message, &part.ots)?;
        for (height, sibling) in part.auth_path.iter().enumerate() {
            node = if (part.index >> height) & 1 == 0 {
                hash_pair::<D>(&node, sibling)
            } else {
                hash_pair::<D>(sibling, &node)
            };
        }
        message = node;
    }
    Some(message)
}

/// Deterministic key generation from a master seed. See [`PrivateKey::keygen`].
pub fn keygen<D: Digest>(
    params: &Parameters,
    seed: &Seed,
) -> Result<(PrivateKey<D>, PublicKey<D>), Error> {
    PrivateKey::keygen(params, seed)
}

/// Key generation from a fresh master seed drawn from `rng`.
pub fn generate<D: Digest, R: RngCore + CryptoRng>(
    rng: &mut R,
    params: &Parameters,
) -> Result<(PrivateKey<D>, PublicKey<D>), Error> {
    PrivateKey::generate(rng, params)
}

/// Verify `signature` over `m` under `pk`.
pub fn verify<D: Digest>(pk: &PublicKey<D>, m: &[u8], signature: &Signature) -> bool {
    pk.verify(m, signature)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::signature::LayerSignature;

    fn key(heights: &[u32]) -> (PrivateKey, PublicKey) {
        let n = heights.len();
        let params = Parameters::new(heights, &vec![4; n], &vec![2; n]).unwrap();
        let seed = Seed::from_slice(&[7; 32]).unwrap();
        PrivateKey::keygen(&params, &seed).unwrap()
    }

    #[test]
    fn exhaustive_signing() {
        let (mut sk, pk) = key(&[4]);
        assert_eq!(sk.public_key(), pk);
        for i in 0..16u64 {
            assert_eq!(sk.index(), i);
            assert_eq!(sk.remaining(), 16 - i);
            let m = format!("m{}", i);
            let sig = sk.sign(m.as_bytes()).unwrap();
            assert!(pk.verify(m.as_bytes(), &sig));
            assert!(!pk.verify(b"tolon", &sig));
        }
        assert!(sk.is_exhausted());
        assert_eq!(sk.remaining(), 0);
        assert_eq!(sk.sign(b"m16"), Err(Error::KeyExhausted));
    }

    #[test]
    fn root_comparison_rejects_other_roots() {
        let (mut sk, pk) = key(&[4]);
        let sig = sk.sign(b"tilin").unwrap();
        let root = pk.as_bytes().to_vec();

        let truncated = PublicKey::<Blake2s>::new(root[..root.len() - 1].to_vec(), pk.params().clone());
        assert!(!truncated.verify(b"tilin", &sig));

        let mut last = root.clone();
        *last.last_mut().unwrap() ^= 0x80;
        let last = PublicKey::<Blake2s>::new(last, pk.params().clone());
        assert!(!last.verify(b"tilin", &sig));

        let same = PublicKey::<Blake2s>::new(root, pk.params().clone());
        assert!(same.verify(b"tilin", &sig));
    }

    #[test]
    fn sign_current_twice() {
        let (mut sk, pk) = key(&[4]);
        let sig = sk.sign_current(b"tilin").unwrap();
        assert_eq!(sk.sign_current(b"tilin"), Err(Error::PrivateKeyAlreadyUsed));
        assert_eq!(sk.sign(b"tilin"), Err(Error::PrivateKeyAlreadyUsed));
        assert!(pk.verify(b"tilin", &sig));

        sk.update().unwrap();
        let sig = sk.sign_current(b"tilin").unwrap();
        assert_eq!(sig.layers()[0].index, 1);
        assert!(pk.verify(b"tilin", &sig));
    }

    #[test]
    fn skipped_leaves_still_verify() {
        let (mut sk, pk) = key(&[4, 4]);
        for _ in 0..21 {
            sk.update().unwrap();
        }
        let sig = sk.sign(b"tilin").unwrap();
        assert_eq!(sig.layers()[0].index, 5);
        assert_eq!(sig.layers()[1].index, 1);
        assert!(verify(&pk, b"tilin", &sig));
    }

    #[test]
    fn malformed_signatures() {
        let (mut sk, pk) = key(&[4]);
        let sig = sk.sign(b"tilin").unwrap();

        let mut wrong_index = sig.layers().to_vec();
        wrong_index[0].index = 16;
        assert!(!pk.verify(b"tilin", &Signature::new(wrong_index)));

        let mut short_path = sig.layers().to_vec();
        short_path[0].auth_path.pop();
        assert!(!pk.verify(b"tilin", &Signature::new(short_path)));

        let extra_layer = LayerSignature {
            index: 0,
            ots: Vec::new(),
            auth_path: Vec::new(),
        };
        let mut layers = sig.layers().to_vec();
        layers.push(extra_layer);
        assert!(!pk.verify(b"tilin", &Signature::new(layers)));

        assert!(!pk.verify_bytes(b"tilin", &sig.to_bytes()[1..]));
        assert!(pk.verify_bytes(b"tilin", &sig.to_bytes()));
        assert_eq!(
            pk.verify_strict(b"tolon", &sig),
            Err(Error::VerificationFailed)
        );
    }

    #[test]
    fn public_key_bytes() {
        let (_, pk) = key(&[4]);
        let params = pk.params().clone();
        assert_eq!(pk.as_bytes().len(), 32);
        assert_eq!(PublicKey::<Blake2s>::from_bytes(&params, pk.as_bytes()).unwrap(), pk);
        assert_eq!(
            PublicKey::<Blake2s>::from_bytes(&params, &[0u8; 31]),
            Err(Error::InvalidPublicKeySize(31))
        );
    }

    #[test]
    fn generate_with_rng() {
        let params = Parameters::new(&[4], &[2], &[2]).unwrap();
        let (mut sk, pk) = generate::<Blake2s, _>(&mut rand::rngs::OsRng, &params).unwrap();
        let (_, other) = generate::<Blake2s, _>(&mut rand::rngs::OsRng, &params).unwrap();
        assert_ne!(pk, other);
        let sig = sk.sign(b"tilin").unwrap();
        assert!(pk.verify(b"tilin", &sig));
    }
}
