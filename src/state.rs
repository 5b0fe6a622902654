//! Secret state of a hypertree key, and the schedule that moves it from one signature to
//! the next.
//!
//! Every layer holds the active subtree with its traversal state (authentication path,
//! keep nodes, treehash instances and retain stacks). Layers below the top also hold the
//! next subtree, fully built, together with two jobs running over the lifetime of the
//! active subtree: the construction of the subtree after next, and the one-time signature
//! of the next root by the upcoming leaf of the parent layer.
//!
//! The work of every layer is spread evenly over signing calls: a layer `L` leaf stays
//! active for `signatures_per_leaf(L)` calls, and a subtree for `signatures_per_tree(L)`
//! calls. The budget of every job is fixed when it starts, so that it is finished exactly
//! when its result is needed.
use crate::common::{ceil_div, hash_pair, Node, Seed};
use crate::errors::Error;
use crate::params::{LayerParams, Parameters};
use crate::root_calc::{Subtree, SubtreeBuilder};
use crate::signature::{LayerSignature, Signature};
use crate::treehash::{Treehash, TreehashJob};
use crate::winternitz::{self, LeafCalc, RootSigCalc, Winternitz};
use blake2::digest::Digest;
use log::{debug, trace};

#[cfg(feature = "serde_enabled")]
use {
    serde::{Deserialize, Serialize},
    serde_with::{serde_as, Bytes},
};

/// Next subtree of a layer below the top, and the jobs preparing the one after it.
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "sk_clone_enabled", derive(Clone))]
pub(crate) struct NextSubtree {
    subtree: Subtree,
    builder: SubtreeBuilder,
    root_signature: RootSigCalc,
}

/// State of one layer.
#[cfg_attr(feature = "serde_enabled", serde_as)]
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "sk_clone_enabled", derive(Clone))]
pub(crate) struct LayerState {
    params: LayerParams,
    wots: Winternitz,
    /// Active leaf within the active subtree; `2^h` once the subtree is used up.
    index: u64,
    /// Chain seed of the active leaf.
    seed_active: Seed,
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Bytes"))]
    root: Node,
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Vec<Bytes>"))]
    auth_path: Vec<Node>,
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Vec<Option<Bytes>>"))]
    keep: Vec<Option<Node>>,
    treehash: Vec<Treehash>,
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Vec<Vec<Bytes>>"))]
    retain: Vec<Vec<Node>>,
    /// One-time signature of `root` by the parent layer. Empty for the top layer.
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Bytes"))]
    root_signature: Vec<u8>,
    leaf: Option<LeafCalc>,
    leaf_steps: u64,
    treehash_job: TreehashJob,
    next: Option<NextSubtree>,
}

impl LayerState {
    fn new<D: Digest>(
        params: LayerParams,
        wots: Winternitz,
        subtree: Subtree,
        root_signature: Vec<u8>,
        next: Option<NextSubtree>,
        calls_per_leaf: u64,
    ) -> Self {
        let leaf_cost = wots.leaf_cost();
        let updates = params.updates_per_round();
        let treehash_steps = ceil_div(updates as u64 * (leaf_cost + 1), calls_per_leaf);

        let mut state = LayerState {
            params,
            wots,
            index: 0,
            seed_active: subtree.first_seed.clone(),
            root: Vec::new(),
            auth_path: Vec::new(),
            keep: Vec::new(),
            treehash: Vec::new(),
            retain: Vec::new(),
            root_signature: Vec::new(),
            leaf: None,
            leaf_steps: ceil_div(leaf_cost, calls_per_leaf),
            treehash_job: TreehashJob::new(updates, treehash_steps),
            next,
        };
        state.install::<D>(subtree, root_signature);
        state
    }

    /// Make `subtree` the active subtree, starting at leaf 0.
    fn install<D: Digest>(&mut self, subtree: Subtree, root_signature: Vec<u8>) {
        self.index = 0;
        self.seed_active = subtree.first_seed.clone();
        self.root = subtree.root;
        self.auth_path = subtree.auth_path;
        self.keep = vec![None; self.params.height as usize - 1];
        self.treehash = subtree.treehash;
        self.retain = subtree.retain;
        self.root_signature = root_signature;
        self.start_round::<D>();
    }

    /// Set up the jobs of the interval during which the active leaf is in use.
    fn start_round<D: Digest>(&mut self) {
        self.leaf = if self.index % 2 == 0 && self.index + 1 < self.params.leaves() {
            Some(LeafCalc::new(&self.wots, self.seed_active.material::<D>()))
        } else {
            None
        };
        self.treehash_job.reset();
    }

    fn run_jobs<D: Digest>(&mut self) {
        if let Some(leaf) = self.leaf.as_mut() {
            leaf.advance::<D>(self.leaf_steps);
        }
        self.treehash_job
            .advance::<D>(&mut self.treehash, &self.wots);
        if let Some(next) = self.next.as_mut() {
            next.builder.advance_scheduled::<D>();
            next.root_signature.advance_scheduled::<D>();
        }
    }

    /// Replace the authentication path of leaf `s` by the one of leaf `s + 1`, and move
    /// to leaf `s + 1`.
    fn compute_auth_paths<D: Digest>(&mut self) -> Result<(), Error> {
        let s = self.index;
        let height = self.params.height as usize;
        let treehash_count = self.params.treehash_count();
        // Height of the first left node on the path from leaf s to the root.
        let tau = (s + 1).trailing_zeros() as usize;
        trace!("round {} of height {} subtree, tau {}", s, height, tau);

        if tau + 1 < height && (s >> (tau + 1)) & 1 == 0 {
            self.keep[tau] = Some(self.auth_path[tau].clone());
        }

        for th in self.treehash.iter_mut() {
            th.advance_seed_next::<D>();
        }

        if tau == 0 {
            self.auth_path[0] = self
                .leaf
                .take()
                .and_then(|mut leaf| leaf.take_leaf())
                .ok_or(Error::SchedulingInvariantViolation("leaf"))?;
        } else {
            let keep = self.keep[tau - 1]
                .take()
                .ok_or(Error::SchedulingInvariantViolation("keep node"))?;
            self.auth_path[tau] = hash_pair::<D>(&self.auth_path[tau - 1], &keep);

            for h in 0..tau {
                self.auth_path[h] = if h < treehash_count {
                    self.treehash[h].pop()?
                } else {
                    self.retain[h - treehash_count]
                        .pop()
                        .ok_or(Error::SchedulingInvariantViolation("retain node"))?
                };
            }

            for h in 0..tau.min(treehash_count) {
                if s + 1 + (3 << h) < self.params.leaves() {
                    self.treehash[h].initialize();
                }
            }
        }

        self.index += 1;
        self.seed_active.next_seed::<D>();
        self.start_round::<D>();
        Ok(())
    }

    /// Promote the next subtree, and start preparing the one after it. The root of the new
    /// next subtree is signed with the one-time key `parent_material` of `parent_wots`.
    fn next_tree<D: Digest>(
        &mut self,
        parent_wots: &Winternitz,
        parent_material: Seed,
        calls: u64,
    ) -> Result<(), Error> {
        let NextSubtree {
            subtree,
            builder,
            mut root_signature,
        } = self
            .next
            .take()
            .ok_or(Error::SchedulingInvariantViolation("next subtree"))?;

        let signature = root_signature.take_signature()?;
        let upcoming = builder.finish()?;

        let builder = SubtreeBuilder::new(self.params, self.wots, upcoming.end_seed.clone(), calls);
        let root_signature =
            RootSigCalc::new::<D>(parent_wots, parent_material, &upcoming.root, calls);

        self.install::<D>(subtree, signature);
        self.next = Some(NextSubtree {
            subtree: upcoming,
            builder,
            root_signature,
        });
        Ok(())
    }
}

/// Secret state of a hypertree key.
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "sk_clone_enabled", derive(Clone))]
pub(crate) struct HyperTreeState {
    params: Parameters,
    layers: Vec<LayerState>,
    /// Number of leaves of the bottom layer already consumed.
    counter: u64,
    exhausted: bool,
    used: bool,
}

impl HyperTreeState {
    /// Build the initial state from the master `seed`.
    pub(crate) fn keygen<D: Digest>(params: &Parameters, seed: &Seed) -> Result<Self, Error> {
        let seeds = seed.split_layers::<D>(params.num_layers());
        let mut layers = Vec::with_capacity(params.num_layers());

        for (layer, layer_seed) in seeds.iter().enumerate() {
            let layer_params = *params.layer(layer);
            let wots = Winternitz::for_digest::<D>(layer_params.winternitz);
            let subtree = SubtreeBuilder::build::<D>(layer_params, wots, layer_seed.clone())?;

            let (root_signature, next) = if layer == 0 {
                (Vec::new(), None)
            } else {
                let parent_wots = Winternitz::for_digest::<D>(params.layer(layer - 1).winternitz);
                let parent_seed = &seeds[layer - 1];
                let calls = params.signatures_per_tree(layer);

                let next = SubtreeBuilder::build::<D>(layer_params, wots, subtree.end_seed.clone())?;
                let builder =
                    SubtreeBuilder::new(layer_params, wots, next.end_seed.clone(), calls);
                let next_signature = RootSigCalc::new::<D>(
                    &parent_wots,
                    parent_seed.successor::<D>().material::<D>(),
                    &next.root,
                    calls,
                );
                let signature =
                    winternitz::sign::<D>(&parent_wots, parent_seed.material::<D>(), &subtree.root);

                let next = NextSubtree {
                    subtree: next,
                    builder,
                    root_signature: next_signature,
                };
                (signature, Some(next))
            };

            layers.push(LayerState::new::<D>(
                layer_params,
                wots,
                subtree,
                root_signature,
                next,
                params.signatures_per_leaf(layer),
            ));
        }

        debug!(
            "generated hypertree key: {} layers, {} signatures",
            params.num_layers(),
            params.capacity()
        );

        Ok(HyperTreeState {
            params: params.clone(),
            layers,
            counter: 0,
            exhausted: false,
            used: false,
        })
    }

    pub(crate) fn params(&self) -> &Parameters {
        &self.params
    }

    /// Root of the top layer.
    pub(crate) fn public_root(&self) -> &Node {
        &self.layers[0].root
    }

    pub(crate) fn counter(&self) -> u64 {
        self.counter
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Sign `message` with the active bottom leaf, without moving the state forward.
    ///
    /// # Errors
    /// `KeyExhausted` once every leaf is consumed, and `PrivateKeyAlreadyUsed` if the active
    /// leaf already signed.
    pub(crate) fn sign<D: Digest>(&mut self, message: &[u8]) -> Result<Signature, Error> {
        if self.exhausted {
            return Err(Error::KeyExhausted);
        }
        if self.used {
            return Err(Error::PrivateKeyAlreadyUsed);
        }

        let bottom = self.params.bottom();
        let mut parts = Vec::with_capacity(self.layers.len());
        for layer in (0..self.layers.len()).rev() {
            let state = &self.layers[layer];
            let ots = if layer == bottom {
                winternitz::sign::<D>(&state.wots, state.seed_active.material::<D>(), message)
            } else {
                self.layers[layer + 1].root_signature.clone()
            };
            parts.push(LayerSignature {
                index: state.index as u32,
                ots,
                auth_path: state.auth_path.clone(),
            });
        }

        self.used = true;
        Ok(Signature::new(parts))
    }

    /// Move to the next bottom leaf: run one call worth of every job, then advance the
    /// bottom layer, carrying into the layers above when subtrees are used up.
    ///
    /// # Errors
    /// `KeyExhausted` if every leaf is already consumed, and `SchedulingInvariantViolation`
    /// if a precomputed value was not ready when needed.
    pub(crate) fn update<D: Digest>(&mut self) -> Result<(), Error> {
        if self.exhausted {
            return Err(Error::KeyExhausted);
        }

        for layer in self.layers.iter_mut() {
            layer.run_jobs::<D>();
        }

        let mut switched = Vec::new();
        let mut layer = self.params.bottom();
        loop {
            let state = &mut self.layers[layer];
            if state.index + 1 < state.params.leaves() {
                state.compute_auth_paths::<D>()?;
                break;
            }
            state.index = state.params.leaves();
            switched.push(layer);
            if layer == 0 {
                self.exhausted = true;
                debug!("hypertree key exhausted after {} signatures", self.counter + 1);
                break;
            }
            layer -= 1;
        }

        if !self.exhausted {
            for &layer in switched.iter().rev() {
                let parent = &self.layers[layer - 1];
                let parent_wots = parent.wots;
                let parent_material = parent.seed_active.successor::<D>().material::<D>();
                let calls = self.params.signatures_per_tree(layer);
                self.layers[layer].next_tree::<D>(&parent_wots, parent_material, calls)?;
                debug!("layer {} moved to its next subtree", layer);
            }
        }

        self.counter += 1;
        self.used = false;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::hash;
    use blake2::Blake2s;

    fn seed() -> Seed {
        Seed::from_slice(&[42; 32]).unwrap()
    }

    /// All leaves of the subtrees `0..trees` of a layer chain starting at `seed`.
    fn leaves(params: &LayerParams, seed: &Seed, trees: u64) -> Vec<Node> {
        let wots = Winternitz::for_digest::<Blake2s>(params.winternitz);
        let mut chain = seed.clone();
        (0..trees * params.leaves())
            .map(|_| winternitz::public_key::<Blake2s>(&wots, chain.next_seed::<Blake2s>()))
            .collect()
    }

    /// Authentication path of `leaf` in the tree made of `leaves`.
    fn auth_path(leaves: &[Node], leaf: usize) -> Vec<Node> {
        let mut level = leaves.to_vec();
        let mut index = leaf;
        let mut path = Vec::new();
        while level.len() > 1 {
            path.push(level[index ^ 1].clone());
            level = level
                .chunks(2)
                .map(|pair| hash_pair::<Blake2s>(&pair[0], &pair[1]))
                .collect();
            index /= 2;
        }
        path
    }

    fn exhaustive_auth_paths(height: u32, k: u32) {
        let params = Parameters::new(&[height], &[2], &[k]).unwrap();
        let mut state = HyperTreeState::keygen::<Blake2s>(&params, &seed()).unwrap();
        let layer_seed = seed().split_layers::<Blake2s>(1).remove(0);
        let leaves = leaves(params.layer(0), &layer_seed, 1);

        for leaf in 0..leaves.len() {
            assert_eq!(state.layers[0].index, leaf as u64);
            assert_eq!(state.layers[0].auth_path, auth_path(&leaves, leaf));
            state.update::<Blake2s>().unwrap();
        }
        assert!(state.is_exhausted());
    }

    #[test]
    fn auth_paths_with_retain() {
        exhaustive_auth_paths(6, 4);
    }

    #[test]
    fn auth_paths_with_treehash_only() {
        exhaustive_auth_paths(6, 2);
    }

    #[test]
    fn auth_paths_when_k_is_h() {
        exhaustive_auth_paths(4, 4);
    }

    #[test]
    fn lower_layer_moves_through_subtrees() {
        let params = Parameters::new(&[4, 4], &[2, 2], &[2, 2]).unwrap();
        let mut state = HyperTreeState::keygen::<Blake2s>(&params, &seed()).unwrap();
        let seeds = seed().split_layers::<Blake2s>(2);
        let bottom = leaves(params.layer(1), &seeds[1], 4);

        for tree in 0..4 {
            let tree_leaves = &bottom[tree * 16..(tree + 1) * 16];
            for leaf in 0..16 {
                assert_eq!(state.layers[0].index, tree as u64);
                assert_eq!(state.layers[1].index, leaf as u64);
                assert_eq!(state.layers[1].auth_path, auth_path(tree_leaves, leaf));
                state.update::<Blake2s>().unwrap();
            }
        }
        assert_eq!(state.counter(), 64);
    }

    #[test]
    fn root_signatures_follow_the_parent_leaf() {
        let params = Parameters::new(&[4, 4], &[2, 2], &[2, 2]).unwrap();
        let mut state = HyperTreeState::keygen::<Blake2s>(&params, &seed()).unwrap();
        let seeds = seed().split_layers::<Blake2s>(2);
        let top = leaves(params.layer(0), &seeds[0], 1);
        let top_wots = Winternitz::for_digest::<Blake2s>(2);

        for tree in 0..3 {
            let layer = &state.layers[1];
            let recovered =
                winternitz::recover_public_key::<Blake2s>(&top_wots, &layer.root, &layer.root_signature);
            assert_eq!(recovered.as_ref(), Some(&top[tree]));
            for _ in 0..16 {
                state.update::<Blake2s>().unwrap();
            }
        }
    }

    #[test]
    fn sign_then_update() {
        let params = Parameters::new(&[4], &[2], &[2]).unwrap();
        let mut state = HyperTreeState::keygen::<Blake2s>(&params, &seed()).unwrap();

        let sig = state.sign::<Blake2s>(b"tilin").unwrap();
        assert_eq!(sig.layers().len(), 1);
        assert_eq!(sig.layers()[0].index, 0);
        assert_eq!(
            state.sign::<Blake2s>(b"tilin"),
            Err(Error::PrivateKeyAlreadyUsed)
        );

        for _ in 0..16 {
            state.update::<Blake2s>().unwrap();
        }
        assert!(state.is_exhausted());
        assert_eq!(state.update::<Blake2s>(), Err(Error::KeyExhausted));
        assert_eq!(state.sign::<Blake2s>(b"tilin"), Err(Error::KeyExhausted));
    }

    #[test]
    fn public_root_is_top_root() {
        let params = Parameters::new(&[4], &[2], &[2]).unwrap();
        let state = HyperTreeState::keygen::<Blake2s>(&params, &seed()).unwrap();
        let layer_seed = seed().split_layers::<Blake2s>(1).remove(0);
        let mut level = leaves(params.layer(0), &layer_seed, 1);
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| hash_pair::<Blake2s>(&pair[0], &pair[1]))
                .collect();
        }
        assert_eq!(state.public_root(), &level[0]);
        assert_ne!(state.public_root(), &hash::<Blake2s>(&[]));
    }
}
