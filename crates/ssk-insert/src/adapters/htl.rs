//! Probabilistic hops-to-live decrement policy.

use rand::Rng;

use crate::domain::PeerId;
use crate::ports::outbound::HtlPolicy;

/// HTL policy that sometimes declines to decrement at the boundaries.
///
/// A request sitting at maximum HTL betrays that this node originated it, so
/// the first decrement only happens with probability `decrement_at_max`.
/// Symmetrically, a request at HTL 1 drops to 0 with probability
/// `decrement_at_min`, blurring how far from the end of its life it is.
/// Everywhere between the boundaries the decrement is unconditional. Inputs
/// above `max_htl` clamp down to it; the result never exceeds the input.
#[derive(Clone, Debug)]
pub struct ProbabilisticHtlPolicy {
    max_htl: u8,
    decrement_at_max: f64,
    decrement_at_min: f64,
}

impl ProbabilisticHtlPolicy {
    pub fn new(max_htl: u8, decrement_at_max: f64, decrement_at_min: f64) -> Self {
        Self {
            max_htl,
            decrement_at_max,
            decrement_at_min,
        }
    }
}

impl Default for ProbabilisticHtlPolicy {
    fn default() -> Self {
        Self::new(18, 0.5, 0.25)
    }
}

impl HtlPolicy for ProbabilisticHtlPolicy {
    fn max_htl(&self) -> u8 {
        self.max_htl
    }

    fn decrement(&self, _requestor: Option<PeerId>, htl: u8) -> u8 {
        let htl = htl.min(self.max_htl);
        let mut rng = rand::thread_rng();
        match htl {
            0 => 0,
            1 => {
                if rng.gen_bool(self.decrement_at_min) {
                    0
                } else {
                    1
                }
            }
            h if h == self.max_htl => {
                if rng.gen_bool(self.decrement_at_max) {
                    h - 1
                } else {
                    h
                }
            }
            h => h - 1,
        }
    }
}
