//! A stateful hash-based signature scheme built as a hypertree of Merkle trees.
//!
//! "Merkle Signatures with Virtually Unlimited Signature Capacity"
//! By Johannes Buchmann, Erik Dahmen, Elena Klintsevich, Katsuyuki Okeya and Camille Vuillaume
//! <https://eprint.iacr.org/2007/106>
//!
//! "Merkle Tree Traversal Revisited"
//! By Johannes Buchmann, Erik Dahmen and Michael Schneider
//! <https://doi.org/10.1007/978-3-540-88403-3_5>
//!
//! Leaves of the bottom layer sign messages with Winternitz one-time signatures; leaves of
//! every other layer sign the roots of the subtrees below. The authentication paths of all
//! layers are maintained with the BDS traversal algorithm, and the construction of future
//! subtrees is spread over the signing calls, so that the cost of every signature is
//! bounded.
//!
//! # Example
//! ```
//! use gmss_hypertree::{keygen, Parameters, PrivateKey, PublicKey, Seed};
//!
//! let params = Parameters::new(&[4], &[4], &[2]).unwrap();
//! let seed = Seed::from_slice(&[0u8; 32]).unwrap();
//! let (mut skey, pkey): (PrivateKey, PublicKey) = keygen(&params, &seed).unwrap();
//!
//! let dummy_message = b"tilin";
//! let sigma = skey.sign(dummy_message).unwrap();
//! assert!(pkey.verify(dummy_message, &sigma));
//!
//! // The key signs 16 messages in total
//! for _ in 0..15 {
//!     assert!(skey.update().is_ok());
//! }
//! assert!(skey.is_exhausted());
//! ```
#![warn(missing_docs, rust_2018_idioms)]

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

mod common;
pub mod errors;
pub mod hypertree;
pub mod params;
mod root_calc;
pub mod signature;
mod state;
mod treehash;
pub mod winternitz;

pub use common::{Node, Seed};
pub use errors::Error;
pub use hypertree::{generate, keygen, verify, PrivateKey, PublicKey};
pub use params::{LayerParams, Parameters};
pub use signature::{LayerSignature, Signature};
