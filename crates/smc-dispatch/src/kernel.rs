//! # Monte-Carlo Work Unit
//!
//! Point-in-circle sampling: draw `elements` points in the unit square,
//! store them in the two input regions, and add the number that fall inside
//! the quarter circle to `out[index]`.

use smc_core::{Error, Result};
use smc_queue::{ArgKind, KernelArgs, WorkUnit};

/// Name the work unit is registered under
pub const KERNEL_NAME: &str = "krnl_simple_monte_carlo";

/// Seed used for every launch unless configured otherwise
pub const DEFAULT_SEED: u64 = 42;

// =============================================================================
// GENERATOR
// =============================================================================

/// 64-bit linear congruential generator
#[derive(Debug, Clone)]
struct Lcg {
    state: u64,
}

impl Lcg {
    const MULTIPLIER: u64 = 6_364_136_223_846_793_005;
    const INCREMENT: u64 = 1_442_695_040_888_963_407;

    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(Self::MULTIPLIER)
            .wrapping_add(Self::INCREMENT);
        self.state
    }

    /// Uniform in `[0, 1)` from the top 53 bits
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

#[inline]
fn inside(x: f64, y: f64) -> bool {
    x * x + y * y <= 1.0
}

/// Number of points `(x[i], y[i])` inside the quarter circle
pub fn count_hits(x: &[f64], y: &[f64]) -> i32 {
    x.iter().zip(y).filter(|&(&x, &y)| inside(x, y)).count() as i32
}

// =============================================================================
// WORK UNIT
// =============================================================================

/// The Monte-Carlo sampling work unit
///
/// Signature: `(x: region<f64>, y: region<f64>, out: region<i32>,
/// elements: i32, index: i32)`.
#[derive(Debug, Clone)]
pub struct MonteCarloKernel {
    seed: u64,
}

impl MonteCarloKernel {
    /// Parameter signature
    pub const SIGNATURE: [ArgKind; 5] = [
        ArgKind::Region,
        ArgKind::Region,
        ArgKind::Region,
        ArgKind::I32,
        ArgKind::I32,
    ];

    /// Argument index of the first input region
    pub const ARG_X: u32 = 0;
    /// Argument index of the second input region
    pub const ARG_Y: u32 = 1;
    /// Argument index of the output region
    pub const ARG_OUT: u32 = 2;
    /// Argument index of the element count
    pub const ARG_ELEMENTS: u32 = 3;
    /// Argument index of the output slot
    pub const ARG_INDEX: u32 = 4;

    /// Create with the default seed
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Create with a fixed seed
    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    /// Get seed
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Default for MonteCarloKernel {
    fn default() -> Self {
        Self::new()
    }
}

fn index_arg(args: &KernelArgs, index: u32) -> Result<usize> {
    usize::try_from(args.i32(index)?).map_err(|_| Error::InvalidArgValue(index))
}

impl WorkUnit for MonteCarloKernel {
    fn name(&self) -> &str {
        KERNEL_NAME
    }

    fn signature(&self) -> &[ArgKind] {
        &Self::SIGNATURE
    }

    fn execute(&self, args: &KernelArgs) -> Result<()> {
        let x = args.region(Self::ARG_X)?;
        let y = args.region(Self::ARG_Y)?;
        let out = args.region(Self::ARG_OUT)?;
        let elements = index_arg(args, Self::ARG_ELEMENTS)?;
        let index = index_arg(args, Self::ARG_INDEX)?;

        // Mapping one region twice would block on its lock.
        if x.same_region(y) {
            return Err(Error::InvalidArgValue(Self::ARG_Y));
        }
        if elements > x.len() || elements > y.len() || index >= out.len() {
            return Err(Error::InvalidRegion);
        }

        let mut rng = Lcg::new(self.seed);
        let mut xs = x.map_mut::<f64>(0..elements)?;
        let mut ys = y.map_mut::<f64>(0..elements)?;

        let mut hits: i32 = 0;
        for (xi, yi) in xs.iter_mut().zip(ys.iter_mut()) {
            *xi = rng.next_f64();
            *yi = rng.next_f64();
            if inside(*xi, *yi) {
                hits += 1;
            }
        }

        let mut cell = out.map_mut::<i32>(index..index + 1)?;
        cell[0] = cell[0].wrapping_add(hits);

        log::trace!("{}: {} of {} samples inside", KERNEL_NAME, hits, elements);
        Ok(())
    }
}
