//! Treehash instances, which compute the right authentication nodes of the lower heights
//! of a subtree ahead of time, one leaf at a time.
use crate::common::{hash_pair, Node, Seed};
use crate::errors::Error;
use crate::winternitz::{LeafCalc, Winternitz};
use blake2::digest::Digest;

#[cfg(feature = "serde_enabled")]
use {
    serde::{Deserialize, Serialize},
    serde_with::{serde_as, Bytes},
};

/// A treehash instance of target height `height`. Once initialized with the chain seed
/// of the first leaf below its node, it consumes leaves left to right and merges them on
/// its tail stack until the node is complete.
#[cfg_attr(feature = "serde_enabled", serde_as)]
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "sk_clone_enabled", derive(Clone))]
pub(crate) struct Treehash {
    height: u32,
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Vec<(_, Bytes)>"))]
    tail: Vec<(u32, Node)>,
    #[cfg_attr(feature = "serde_enabled", serde_as(as = "Option<Bytes>"))]
    node: Option<Node>,
    initialized: bool,
    seed_active: Seed,
    seed_next: Seed,
}

impl Treehash {
    /// A finished instance holding `node`. `seed_next` is the chain seed of the leaf
    /// `3 * 2^height`, from which the instance is initialized later on.
    pub(crate) fn finished(height: u32, node: Node, seed_next: Seed) -> Self {
        Treehash {
            height,
            tail: Vec::new(),
            node: Some(node),
            initialized: false,
            seed_active: seed_next.clone(),
            seed_next,
        }
    }

    /// Height of the lowest node on the tail, the target height if the tail is empty, or
    /// `None` if the instance is not computing anything.
    pub(crate) fn lowest_height(&self) -> Option<u32> {
        if !self.initialized {
            return None;
        }
        Some(self.tail.last().map_or(self.height, |&(height, _)| height))
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.node.is_some()
    }

    /// Move `seed_next` one leaf forward along the layer chain.
    pub(crate) fn advance_seed_next<D: Digest>(&mut self) {
        self.seed_next.next_seed::<D>();
    }

    /// Start computing the node whose first leaf has chain seed `seed_next`.
    pub(crate) fn initialize(&mut self) {
        self.tail.clear();
        self.node = None;
        self.seed_active = self.seed_next.clone();
        self.initialized = true;
    }

    /// Key material of the next leaf to compute. The active seed moves one leaf forward.
    pub(crate) fn take_leaf_material<D: Digest>(&mut self) -> Seed {
        self.seed_active.next_seed::<D>()
    }

    /// Merge the next leaf into the tail.
    pub(crate) fn update<D: Digest>(&mut self, leaf: Node) {
        if !self.initialized {
            return;
        }
        let mut node = leaf;
        let mut height = 0;
        while let Some((top_height, _)) = self.tail.last() {
            if *top_height != height {
                break;
            }
            if let Some((_, left)) = self.tail.pop() {
                node = hash_pair::<D>(&left, &node);
                height += 1;
            }
        }
        if height == self.height {
            self.node = Some(node);
            self.initialized = false;
        } else {
            self.tail.push((height, node));
        }
    }

    /// Take the completed node.
    ///
    /// # Errors
    /// Fails with `SchedulingInvariantViolation` if the node is not complete.
    pub(crate) fn pop(&mut self) -> Result<Node, Error> {
        self.node
            .take()
            .ok_or(Error::SchedulingInvariantViolation("treehash node"))
    }
}

/// Index of the instance to update next: the one with the lowest tail height, the lowest
/// index among ties.
pub(crate) fn select(treehash: &[Treehash]) -> Option<usize> {
    treehash
        .iter()
        .enumerate()
        .filter_map(|(i, th)| th.lowest_height().map(|height| (height, i)))
        .min()
        .map(|(_, i)| i)
}

/// Resumable treehash updates of one authentication path round: `updates` leaves, each
/// one given to the instance returned by [`select`] at the time the leaf is started.
#[cfg_attr(feature = "serde_enabled", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "sk_clone_enabled", derive(Clone))]
pub(crate) struct TreehashJob {
    updates: u32,
    remaining: u32,
    steps: u64,
    current: Option<(usize, LeafCalc)>,
}

impl TreehashJob {
    /// A job performing `updates` leaves per round, spending `steps` operations per call.
    pub(crate) fn new(updates: u32, steps: u64) -> Self {
        TreehashJob {
            updates,
            remaining: 0,
            steps,
            current: None,
        }
    }

    /// Start a new round.
    pub(crate) fn reset(&mut self) {
        self.remaining = self.updates;
        self.current = None;
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.remaining == 0
    }

    /// Spend the budget of one call on the instances of `treehash`. The round ends early
    /// when no instance needs a leaf.
    pub(crate) fn advance<D: Digest>(&mut self, treehash: &mut [Treehash], wots: &Winternitz) {
        let mut budget = self.steps;
        while budget > 0 && self.remaining > 0 {
            match self.current.take() {
                None => {
                    let index = match select(treehash) {
                        Some(index) => index,
                        None => {
                            self.remaining = 0;
                            break;
                        }
                    };
                    let material = treehash[index].take_leaf_material::<D>();
                    self.current = Some((index, LeafCalc::new(wots, material)));
                    budget -= 1;
                }
                Some((index, mut calc)) => {
                    budget = calc.advance::<D>(budget);
                    match calc.take_leaf() {
                        Some(leaf) => {
                            treehash[index].update::<D>(leaf);
                            self.remaining -= 1;
                        }
                        None => self.current = Some((index, calc)),
                    }
                }
            }
        }
    }
}
