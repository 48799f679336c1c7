//! The encoder seam: how sensory samples become fixed-dimension vectors.
//!
//! The engine never looks inside a sample. A stream only requires that some
//! collaborator turn each sample into a `Vec<f32>` of the same length for the
//! whole run: an autoencoder, a hash, a fixed transform, or precomputed
//! encodings passed straight through with [`IdentityEncoder`].
//!
//! # Implementing for a new front end
//!
//! ```rust
//! use cdz_core::encoding::Encoder;
//!
//! /// Encodes a digit label as a one-hot vector.
//! struct OneHot;
//!
//! impl Encoder for OneHot {
//!     type Sample = u8;
//!     fn dimension(&self) -> usize { 10 }
//!     fn encode(&self, digit: &u8) -> Vec<f32> {
//!         let mut v = vec![0.0; 10];
//!         v[(*digit as usize) % 10] = 1.0;
//!         v
//!     }
//! }
//! ```

/// Produces fixed-dimension vectors from samples of one modality.
pub trait Encoder {
    /// The raw sample type consumed by this encoder.
    type Sample: ?Sized;

    /// Length of every vector returned by [`Encoder::encode`].
    fn dimension(&self) -> usize;

    /// Encode a sample. The returned vector must have length [`Encoder::dimension`].
    fn encode(&self, sample: &Self::Sample) -> Vec<f32>;
}

/// Pass-through encoder for precomputed encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentityEncoder {
    dimension: usize,
}

impl IdentityEncoder {
    /// Create a pass-through encoder for vectors of `dimension` elements.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Encoder for IdentityEncoder {
    type Sample = [f32];

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, sample: &[f32]) -> Vec<f32> {
        sample.to_vec()
    }
}

/// Euclidean distance between two equal-length vectors.
///
/// Extra trailing elements of the longer slice are ignored; callers check
/// dimensions before reaching the hot path.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}
