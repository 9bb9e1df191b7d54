//! Software emulation of the Monte Carlo European card.
//!
//! [`HostEmulator`] implements [`AcceleratorBinding`] entirely in host
//! memory so the engine can run without hardware. Device buffers are byte
//! arrays, launches are queued, and [`synchronize`](AcceleratorBinding::synchronize)
//! executes every queued kernel in parallel on the rayon pool.
//!
//! # Kernel model
//!
//! Each launch simulates log-space GBM paths
//!
//! ```text
//! ln S(t+dt) = ln S(t) + (r - q - σ²/2) dt + σ √dt Z,   Z ~ N(0, 1)
//! ```
//!
//! with `time_steps` steps to maturity and returns the discounted mean
//! payoff. Fixed-sample launches simulate exactly the requested number of
//! paths. Tolerance launches simulate blocks of [`BLOCK_PATHS`] until the
//! standard error of the estimate falls to the tolerance, or
//! [`MAX_TOLERANCE_PATHS`] have been drawn.

use std::collections::HashMap;
use std::mem;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use tracing::debug;

use crate::binding::{
    AcceleratorBinding, BufferHandle, Handle, KernelArgs, KernelHandle, MemoryBank, ProgramHandle,
};
use crate::error::BindingStatus;
use crate::types::{ConvergenceCriterion, OptionSpec, OptionType};

/// Paths simulated between convergence checks in tolerance mode.
pub const BLOCK_PATHS: u32 = 1024;

/// Upper bound on paths simulated in tolerance mode.
pub const MAX_TOLERANCE_PATHS: u64 = 1 << 24;

struct EmuBuffer {
    bank: MemoryBank,
    bytes: Vec<u8>,
}

struct PendingLaunch {
    kernel: KernelHandle,
    args: KernelArgs,
}

/// In-memory accelerator binding.
#[derive(Default)]
pub struct HostEmulator {
    next_id: u64,
    programs: HashMap<u64, String>,
    kernels: HashMap<u64, String>,
    buffers: HashMap<u64, EmuBuffer>,
    queue: Vec<PendingLaunch>,
    launches: u64,
}

impl HostEmulator {
    /// Creates an emulator with no loaded program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live programs, kernels and buffers.
    pub fn live_objects(&self) -> usize {
        self.programs.len() + self.kernels.len() + self.buffers.len()
    }

    /// Total kernel launches accepted.
    pub fn launches(&self) -> u64 {
        self.launches
    }

    /// Memory bank a live buffer was allocated in.
    pub fn buffer_bank(&self, buffer: BufferHandle) -> Option<MemoryBank> {
        self.buffers.get(&buffer.0).map(|b| b.bank)
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&EmuBuffer, BindingStatus> {
        self.buffers
            .get(&handle.0)
            .ok_or(BindingStatus::INVALID_HANDLE)
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> Result<&mut EmuBuffer, BindingStatus> {
        self.buffers
            .get_mut(&handle.0)
            .ok_or(BindingStatus::INVALID_HANDLE)
    }

    fn read_seed(&self, buffer: BufferHandle, offset: usize) -> Result<u32, BindingStatus> {
        let bytes = word_range(&self.buffer(buffer)?.bytes, offset, 1, mem::size_of::<u32>())?;
        let mut word = [0u8; 4];
        word.copy_from_slice(bytes);
        Ok(u32::from_ne_bytes(word))
    }
}

fn word_range(
    bytes: &[u8],
    offset: usize,
    words: usize,
    word_size: usize,
) -> Result<&[u8], BindingStatus> {
    let start = offset * word_size;
    let end = start + words * word_size;
    bytes.get(start..end).ok_or(BindingStatus::OUT_OF_RANGE)
}

fn word_range_mut(
    bytes: &mut [u8],
    offset: usize,
    words: usize,
    word_size: usize,
) -> Result<&mut [u8], BindingStatus> {
    let start = offset * word_size;
    let end = start + words * word_size;
    bytes.get_mut(start..end).ok_or(BindingStatus::OUT_OF_RANGE)
}

impl AcceleratorBinding for HostEmulator {
    fn load_image(&mut self, name: &str) -> Result<ProgramHandle, BindingStatus> {
        if name.is_empty() {
            return Err(BindingStatus::IMAGE_NOT_FOUND);
        }
        let id = self.allocate_id();
        self.programs.insert(id, name.to_string());
        Ok(ProgramHandle(id))
    }

    fn create_kernel(
        &mut self,
        program: ProgramHandle,
        name: &str,
    ) -> Result<KernelHandle, BindingStatus> {
        if !self.programs.contains_key(&program.0) {
            return Err(BindingStatus::INVALID_HANDLE);
        }
        let id = self.allocate_id();
        self.kernels.insert(id, name.to_string());
        Ok(KernelHandle(id))
    }

    fn create_buffer(
        &mut self,
        program: ProgramHandle,
        size_bytes: usize,
        bank: MemoryBank,
    ) -> Result<BufferHandle, BindingStatus> {
        if !self.programs.contains_key(&program.0) {
            return Err(BindingStatus::INVALID_HANDLE);
        }
        let id = self.allocate_id();
        self.buffers.insert(
            id,
            EmuBuffer {
                bank,
                bytes: vec![0; size_bytes],
            },
        );
        Ok(BufferHandle(id))
    }

    fn write(
        &mut self,
        buffer: BufferHandle,
        offset: usize,
        data: &[u32],
    ) -> Result<(), BindingStatus> {
        let target = word_range_mut(
            &mut self.buffer_mut(buffer)?.bytes,
            offset,
            data.len(),
            mem::size_of::<u32>(),
        )?;
        for (chunk, word) in target.chunks_exact_mut(4).zip(data) {
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
        Ok(())
    }

    fn read(
        &mut self,
        buffer: BufferHandle,
        offset: usize,
        out: &mut [f64],
    ) -> Result<(), BindingStatus> {
        let source = word_range(
            &self.buffer(buffer)?.bytes,
            offset,
            out.len(),
            mem::size_of::<f64>(),
        )?;
        for (value, chunk) in out.iter_mut().zip(source.chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            *value = f64::from_ne_bytes(word);
        }
        Ok(())
    }

    fn launch(&mut self, kernel: KernelHandle, args: &KernelArgs) -> Result<(), BindingStatus> {
        if !self.kernels.contains_key(&kernel.0) {
            return Err(BindingStatus::INVALID_HANDLE);
        }
        word_range(
            &self.buffer(args.output_buffer)?.bytes,
            args.output_offset,
            1,
            mem::size_of::<f64>(),
        )?;
        self.buffer(args.seed_buffer)?;

        self.launches += 1;
        self.queue.push(PendingLaunch {
            kernel,
            args: *args,
        });
        Ok(())
    }

    fn synchronize(&mut self) -> Result<(), BindingStatus> {
        let pending = mem::take(&mut self.queue);
        if pending.is_empty() {
            return Ok(());
        }

        // Seeds are read when the kernel starts, not when it was enqueued
        let jobs = pending
            .iter()
            .map(|p| {
                self.read_seed(p.args.seed_buffer, p.args.seed_offset)
                    .map(|seed| (p.args, seed))
            })
            .collect::<Result<Vec<_>, BindingStatus>>()?;

        let prices: Vec<f64> = jobs
            .par_iter()
            .map(|(args, seed)| {
                simulate_european(&args.option, args.criterion, args.time_steps, *seed)
            })
            .collect();

        for (launch, price) in pending.iter().zip(prices) {
            debug!(kernel = ?launch.kernel, price, "emulated kernel finished");
            let target = word_range_mut(
                &mut self.buffer_mut(launch.args.output_buffer)?.bytes,
                launch.args.output_offset,
                1,
                mem::size_of::<f64>(),
            )?;
            target.copy_from_slice(&price.to_ne_bytes());
        }
        Ok(())
    }

    fn release(&mut self, handle: Handle) -> Result<(), BindingStatus> {
        let removed = match handle {
            Handle::Program(h) => self.programs.remove(&h.0).is_some(),
            Handle::Kernel(h) => self.kernels.remove(&h.0).is_some(),
            Handle::Buffer(h) => self.buffers.remove(&h.0).is_some(),
        };
        if removed {
            Ok(())
        } else {
            Err(BindingStatus::INVALID_HANDLE)
        }
    }
}

/// Running sums of discounted payoffs.
#[derive(Default)]
struct Accumulator {
    sum: f64,
    sum_sq: f64,
    count: u64,
}

impl Accumulator {
    fn push(&mut self, x: f64) {
        self.sum += x;
        self.sum_sq += x * x;
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    fn std_error(&self) -> f64 {
        if self.count < 2 {
            return f64::INFINITY;
        }
        let n = self.count as f64;
        let variance = (self.sum_sq - self.sum * self.sum / n) / (n - 1.0);
        (variance.max(0.0) / n).sqrt()
    }
}

/// Monte Carlo estimate of a European option price.
pub fn simulate_european(
    option: &OptionSpec,
    criterion: ConvergenceCriterion,
    time_steps: u32,
    seed: u32,
) -> f64 {
    let mut rng = StdRng::seed_from_u64(u64::from(seed));
    let steps = time_steps.max(1);
    let dt = option.time_to_maturity / f64::from(steps);
    let drift = (option.risk_free_rate
        - option.dividend_yield
        - 0.5 * option.volatility * option.volatility)
        * dt;
    let diffusion = option.volatility * dt.sqrt();
    let discount = (-option.risk_free_rate * option.time_to_maturity).exp();
    let log_spot = option.stock_price.ln();

    let mut path = || {
        let mut log_s = log_spot;
        for _ in 0..steps {
            let z: f64 = StandardNormal.sample(&mut rng);
            log_s += drift + diffusion * z;
        }
        let terminal = log_s.exp();
        let payoff = match option.option_type {
            OptionType::Call => (terminal - option.strike_price).max(0.0),
            OptionType::Put => (option.strike_price - terminal).max(0.0),
        };
        discount * payoff
    };

    let mut acc = Accumulator::default();
    match criterion {
        ConvergenceCriterion::FixedSamples(n) => {
            for _ in 0..n {
                acc.push(path());
            }
        }
        ConvergenceCriterion::Tolerance(tol) => loop {
            for _ in 0..BLOCK_PATHS {
                acc.push(path());
            }
            if acc.std_error() <= tol || acc.count >= MAX_TOLERANCE_PATHS {
                break;
            }
        },
    }
    acc.mean()
}
