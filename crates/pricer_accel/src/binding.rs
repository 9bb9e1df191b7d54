//! Accelerator binding interface.
//!
//! The engine never talks to a device runtime directly. Everything it needs
//! from the card (program loading, kernel and buffer objects, transfers,
//! launches and the round barrier) goes through [`AcceleratorBinding`].
//!
//! # Buffer layout
//!
//! | Buffer | Word type | Size (words) | Written by | Read by |
//! |--------|-----------|--------------|------------|---------|
//! | seed (shared) | `u32` | `num_kernels * max_assets_per_slot` | host | kernel |
//! | output (per slot) | `f64` | `max_assets_per_slot` | kernel | host |
//!
//! Offsets in [`AcceleratorBinding::write`] and [`AcceleratorBinding::read`]
//! are counted in words, not bytes.

use crate::error::BindingStatus;
use crate::types::{ConvergenceCriterion, OptionSpec};

/// Loaded program image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u64);

/// Kernel instance created from a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KernelHandle(pub u64);

/// Device-resident buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// Any releasable device object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Handle {
    /// Program image.
    Program(ProgramHandle),
    /// Kernel instance.
    Kernel(KernelHandle),
    /// Device buffer.
    Buffer(BufferHandle),
}

impl From<ProgramHandle> for Handle {
    fn from(h: ProgramHandle) -> Self {
        Handle::Program(h)
    }
}

impl From<KernelHandle> for Handle {
    fn from(h: KernelHandle) -> Self {
        Handle::Kernel(h)
    }
}

impl From<BufferHandle> for Handle {
    fn from(h: BufferHandle) -> Self {
        Handle::Buffer(h)
    }
}

/// Memory bank a buffer is placed in (the slot's memory extension).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryBank(pub u32);

/// Arguments of one Monte Carlo kernel launch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelArgs {
    /// Option being priced.
    pub option: OptionSpec,
    /// Sampling mode.
    pub criterion: ConvergenceCriterion,
    /// Number of time steps per path.
    pub time_steps: u32,
    /// Shared seed buffer.
    pub seed_buffer: BufferHandle,
    /// Word offset of this launch's seed.
    pub seed_offset: usize,
    /// Slot output buffer.
    pub output_buffer: BufferHandle,
    /// Word offset the kernel writes its price to.
    pub output_offset: usize,
}

impl KernelArgs {
    /// Tolerance scalar argument; zero in fixed-sample mode.
    pub fn required_tolerance(&self) -> f64 {
        match self.criterion {
            ConvergenceCriterion::Tolerance(tol) => tol,
            ConvergenceCriterion::FixedSamples(_) => 0.0,
        }
    }

    /// Sample-count scalar argument; zero in tolerance mode.
    pub fn required_samples(&self) -> u32 {
        match self.criterion {
            ConvergenceCriterion::Tolerance(_) => 0,
            ConvergenceCriterion::FixedSamples(n) => n,
        }
    }
}

/// Device runtime operations the engine consumes.
///
/// Implementations may enqueue asynchronously: a successful `write` or
/// `launch` only means the command was accepted. Data produced by a launch
/// is guaranteed visible to `read` only after `synchronize` returns.
pub trait AcceleratorBinding {
    /// Loads and builds the named program image.
    fn load_image(&mut self, name: &str) -> Result<ProgramHandle, BindingStatus>;

    /// Instantiates a named kernel from a loaded program.
    fn create_kernel(
        &mut self,
        program: ProgramHandle,
        name: &str,
    ) -> Result<KernelHandle, BindingStatus>;

    /// Allocates a device buffer of `size_bytes` in the given memory bank.
    fn create_buffer(
        &mut self,
        program: ProgramHandle,
        size_bytes: usize,
        bank: MemoryBank,
    ) -> Result<BufferHandle, BindingStatus>;

    /// Copies seed words from the host into `buffer` starting at word `offset`.
    fn write(&mut self, buffer: BufferHandle, offset: usize, data: &[u32])
        -> Result<(), BindingStatus>;

    /// Copies price words from `buffer` starting at word `offset` to the host.
    fn read(
        &mut self,
        buffer: BufferHandle,
        offset: usize,
        out: &mut [f64],
    ) -> Result<(), BindingStatus>;

    /// Enqueues one kernel execution.
    fn launch(&mut self, kernel: KernelHandle, args: &KernelArgs) -> Result<(), BindingStatus>;

    /// Blocks until every enqueued command has completed.
    fn synchronize(&mut self) -> Result<(), BindingStatus>;

    /// Releases a device object.
    fn release(&mut self, handle: Handle) -> Result<(), BindingStatus>;
}

impl<T: AcceleratorBinding + ?Sized> AcceleratorBinding for Box<T> {
    fn load_image(&mut self, name: &str) -> Result<ProgramHandle, BindingStatus> {
        (**self).load_image(name)
    }

    fn create_kernel(
        &mut self,
        program: ProgramHandle,
        name: &str,
    ) -> Result<KernelHandle, BindingStatus> {
        (**self).create_kernel(program, name)
    }

    fn create_buffer(
        &mut self,
        program: ProgramHandle,
        size_bytes: usize,
        bank: MemoryBank,
    ) -> Result<BufferHandle, BindingStatus> {
        (**self).create_buffer(program, size_bytes, bank)
    }

    fn write(
        &mut self,
        buffer: BufferHandle,
        offset: usize,
        data: &[u32],
    ) -> Result<(), BindingStatus> {
        (**self).write(buffer, offset, data)
    }

    fn read(
        &mut self,
        buffer: BufferHandle,
        offset: usize,
        out: &mut [f64],
    ) -> Result<(), BindingStatus> {
        (**self).read(buffer, offset, out)
    }

    fn launch(&mut self, kernel: KernelHandle, args: &KernelArgs) -> Result<(), BindingStatus> {
        (**self).launch(kernel, args)
    }

    fn synchronize(&mut self) -> Result<(), BindingStatus> {
        (**self).synchronize()
    }

    fn release(&mut self, handle: Handle) -> Result<(), BindingStatus> {
        (**self).release(handle)
    }
}
