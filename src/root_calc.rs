//! Construction of a whole subtree, either at once during key generation or spread over
//! the lifetime of the subtree two positions before it.
//!
//! Besides the root, the builder keeps every node the traversal of the subtree starts
//! from: the first authentication path, the first node of every treehash instance and the
//! retain stacks of the top heights.
use crate::common::{ceil_div, hash_pair, Node, Seed};
use crate::errors::Error;
use crate::params::LayerParams;
use crate::treehash::Treehash;
use crate::winternitz::{LeafCalc, Winternitz};
use blake2::digest::Digest;

#[cfg(feature = "serde_enabled")]
use {
    serde::{Deserialize, Serialize},
    serde_with::{serde_as, Bytes},
};

/// A fully computed subtree, ready to become the active subtree of its layer.
#[cfg_attr(feature = "serde_enabled", serde_as)]
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "sk_clone_enabled", derive(Clone))]
pub(crate) struct Subtree {
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Bytes"))]
    pub(crate) root: Node,
    /// Authentication path of leaf 0, bottom first.
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Vec<Bytes>"))]
    pub(crate) auth_path: Vec<Node>,
    pub(crate) treehash: Vec<Treehash>,
    /// One stack per height `h-k..=h-2`, popping the nodes of index 3, 5, 7, ...
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Vec<Vec<Bytes>>"))]
    pub(crate) retain: Vec<Vec<Node>>,
    /// Chain seed of leaf 0.
    pub(crate) first_seed: Seed,
    /// Chain seed of leaf 0 of the following subtree.
    pub(crate) end_seed: Seed,
}

/// Resumable construction of a subtree, leaf by leaf.
#[cfg_attr(feature = "serde_enabled", serde_as)]
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "sk_clone_enabled", derive(Clone))]
pub(crate) struct SubtreeBuilder {
    layer: LayerParams,
    wots: Winternitz,
    first_seed: Seed,
    chain_seed: Seed,
    next_leaf: u64,
    current: Option<LeafCalc>,
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Vec<(_, _, Bytes)>"))]
    stack: Vec<(u32, u64, Node)>,
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Option<Bytes>"))]
    root: Option<Node>,
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Vec<Option<Bytes>>"))]
    auth_path: Vec<Option<Node>>,
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Vec<Option<Bytes>>"))]
    treehash_nodes: Vec<Option<Node>>,
    treehash_seeds: Vec<Option<Seed>>,
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Vec<Vec<Bytes>>"))]
    retain: Vec<Vec<Node>>,
    steps: u64,
}

impl SubtreeBuilder {
    /// Start building the subtree whose leaf 0 has chain seed `seed`. The work is split
    /// so that `calls` invocations of `advance_scheduled` complete the subtree.
    pub(crate) fn new(layer: LayerParams, wots: Winternitz, seed: Seed, calls: u64) -> Self {
        let total = layer.leaves() * (wots.leaf_cost() + 1);
        SubtreeBuilder {
            layer,
            wots,
            first_seed: seed.clone(),
            chain_seed: seed,
            next_leaf: 0,
            current: None,
            stack: Vec::with_capacity(layer.height as usize + 1),
            root: None,
            auth_path: vec![None; layer.height as usize],
            treehash_nodes: vec![None; layer.treehash_count()],
            treehash_seeds: vec![None; layer.treehash_count()],
            retain: vec![Vec::new(); layer.retain_count()],
            steps: ceil_div(total, calls),
        }
    }

    /// Build the subtree at once.
    pub(crate) fn build<D: Digest>(
        layer: LayerParams,
        wots: Winternitz,
        seed: Seed,
    ) -> Result<Subtree, Error> {
        let mut builder = Self::new(layer, wots, seed, 1);
        builder.advance::<D>(u64::MAX);
        builder.finish()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.root.is_some()
    }

    /// Spend the budget fixed at construction.
    pub(crate) fn advance_scheduled<D: Digest>(&mut self) {
        self.advance::<D>(self.steps);
    }

    /// Spend at most `budget` operations: one per chain step, and the cost of the
    /// one-time public key for every leaf. Returns the unused part of the budget.
    pub(crate) fn advance<D: Digest>(&mut self, mut budget: u64) -> u64 {
        while budget > 0 && !self.is_finished() {
            match self.current.take() {
                None => {
                    let leaf = self.next_leaf;
                    for (height, seed) in self.treehash_seeds.iter_mut().enumerate() {
                        if leaf == 3 << height {
                            *seed = Some(self.chain_seed.clone());
                        }
                    }
                    let material = self.chain_seed.next_seed::<D>();
                    self.current = Some(LeafCalc::new(&self.wots, material));
                    budget -= 1;
                }
                Some(mut calc) => {
                    budget = calc.advance::<D>(budget);
                    match calc.take_leaf() {
                        Some(leaf) => self.push_leaf::<D>(leaf),
                        None => self.current = Some(calc),
                    }
                }
            }
        }
        budget
    }

    fn push_leaf<D: Digest>(&mut self, leaf: Node) {
        let mut node = (0, self.next_leaf, leaf);
        self.next_leaf += 1;
        self.keep(&node);
        while let Some((top_height, _, _)) = self.stack.last() {
            if *top_height != node.0 {
                break;
            }
            if let Some((height, index, left)) = self.stack.pop() {
                node = (height + 1, index / 2, hash_pair::<D>(&left, &node.2));
                self.keep(&node);
            }
        }
        if node.0 == self.layer.height {
            self.root = Some(node.2);
        } else {
            self.stack.push(node);
        }
    }

    /// Record `node` if the traversal of the subtree starts from it.
    fn keep(&mut self, &(height, index, ref node): &(u32, u64, Node)) {
        let lowest_retain = self.layer.height - self.layer.k;
        if height == self.layer.height {
            return;
        }
        if index == 1 {
            self.auth_path[height as usize] = Some(node.clone());
        }
        if index == 3 && height < lowest_retain {
            self.treehash_nodes[height as usize] = Some(node.clone());
        }
        if height >= lowest_retain && height + 1 < self.layer.height && index >= 3 && index % 2 == 1
        {
            self.retain[(height - lowest_retain) as usize].push(node.clone());
        }
    }

    /// Take the finished subtree.
    ///
    /// # Errors
    /// Fails with `SchedulingInvariantViolation` if the subtree is not complete.
    pub(crate) fn finish(self) -> Result<Subtree, Error> {
        let fail = Error::SchedulingInvariantViolation("subtree");
        let root = self.root.ok_or_else(|| fail.clone())?;
        let auth_path = self
            .auth_path
            .into_iter()
            .collect::<Option<Vec<Node>>>()
            .ok_or_else(|| fail.clone())?;

        let mut treehash = Vec::with_capacity(self.treehash_nodes.len());
        for (height, (node, seed)) in self
            .treehash_nodes
            .into_iter()
            .zip(self.treehash_seeds.into_iter())
            .enumerate()
        {
            match (node, seed) {
                (Some(node), Some(seed)) => {
                    treehash.push(Treehash::finished(height as u32, node, seed))
                }
                _ => return Err(fail),
            }
        }

        let retain = self
            .retain
            .into_iter()
            .map(|mut stack| {
                stack.reverse();
                stack
            })
            .collect();

        Ok(Subtree {
            root,
            auth_path,
            treehash,
            retain,
            first_seed: self.first_seed,
            end_seed: self.chain_seed,
        })
    }
}
