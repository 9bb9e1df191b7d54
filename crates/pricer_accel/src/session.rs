//! Accelerator resource lifecycle.
//!
//! A [`ResourceSession`] owns every device object the pricing engine uses:
//! the program image, one [`KernelSlot`] per physical kernel instance, and
//! the seed buffer shared by all slots. Creating device objects is
//! expensive, so a session is built once per device attachment and reused
//! for every run until it is released.
//!
//! # Acquisition order
//!
//! ```text
//! program ─┬─ kernel 0 ── output buffer 0   (bank 0)
//!          ├─ kernel 1 ── output buffer 1   (bank 1)
//!          ├─ ...
//!          └─ seed buffer (shared, num_kernels * max_assets_per_slot words)
//! ```
//!
//! Release walks the same list backwards. A failure part-way through
//! creation releases whatever was already acquired before returning.

use std::mem;

use tracing::{debug, info, warn};

use crate::binding::{
    AcceleratorBinding, BufferHandle, Handle, KernelArgs, KernelHandle, MemoryBank, ProgramHandle,
};
use crate::config::SessionConfig;
use crate::device::{Device, ImageResolver};
use crate::error::{BindingStatus, InitStage, ResourceError};
use crate::seed::SeedProvider;

/// One physical kernel instance and its dedicated output buffer.
#[derive(Debug)]
pub struct KernelSlot {
    index: usize,
    name: String,
    kernel: KernelHandle,
    output: BufferHandle,
    bank: MemoryBank,
    /// Host copy of the output buffer, one word per round.
    pub(crate) host_output: Vec<f64>,
    /// Launch arguments staged for the current round.
    pub(crate) staged: Option<KernelArgs>,
}

impl KernelSlot {
    /// Position of the slot in the pool.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Kernel name the slot was created from.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kernel handle.
    #[inline]
    pub fn kernel(&self) -> KernelHandle {
        self.kernel
    }

    /// Output buffer handle.
    #[inline]
    pub fn output(&self) -> BufferHandle {
        self.output
    }

    /// Memory bank of the output buffer.
    #[inline]
    pub fn bank(&self) -> MemoryBank {
        self.bank
    }
}

/// Owner of all device-side objects for one attached accelerator.
pub struct ResourceSession<B: AcceleratorBinding> {
    pub(crate) binding: B,
    device: Device,
    config: SessionConfig,
    program: ProgramHandle,
    pub(crate) slots: Vec<KernelSlot>,
    pub(crate) seed_buffer: BufferHandle,
    /// Host staging for the seed buffer.
    pub(crate) host_seeds: Vec<u32>,
    pub(crate) seeds: SeedProvider,
    /// Every live device object, in acquisition order.
    acquired: Vec<Handle>,
}

struct Acquired {
    program: ProgramHandle,
    slots: Vec<KernelSlot>,
    seed_buffer: BufferHandle,
}

impl<B: AcceleratorBinding> ResourceSession<B> {
    /// Loads the device's program image and allocates the slot pool.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::UnsupportedDevice`] if the resolver knows no image
    ///   for `device`; nothing has been acquired at that point.
    /// - [`ResourceError::InitializationFailed`] if the binding rejects any
    ///   step; every object created before the failure is released first.
    pub fn create(
        mut binding: B,
        device: &Device,
        resolver: &dyn ImageResolver,
        config: SessionConfig,
        seeds: SeedProvider,
    ) -> Result<Self, ResourceError> {
        let image = resolver.resolve_image_name(device)?;
        info!(device = device.name(), image = %image, "creating accelerator session");

        let mut acquired = Vec::new();
        let parts = match acquire(&mut binding, &image, &config, &mut acquired) {
            Ok(parts) => parts,
            Err(err) => {
                warn!(device = device.name(), error = %err, "session creation failed, rolling back");
                release_all(&mut binding, &mut acquired);
                return Err(err);
            }
        };

        info!(
            device = device.name(),
            slots = parts.slots.len(),
            max_assets_per_slot = config.max_assets_per_slot(),
            "accelerator session ready"
        );

        Ok(Self {
            binding,
            device: device.clone(),
            host_seeds: vec![0; config.seed_words()],
            config,
            program: parts.program,
            slots: parts.slots,
            seed_buffer: parts.seed_buffer,
            seeds,
            acquired,
        })
    }

    /// Releases all device objects in reverse acquisition order.
    ///
    /// Idempotent: a second call finds nothing left to release. Release
    /// failures are logged and do not stop the remaining releases.
    pub fn release(&mut self) {
        if self.acquired.is_empty() {
            return;
        }
        info!(
            device = self.device.name(),
            objects = self.acquired.len(),
            "releasing accelerator session"
        );
        release_all(&mut self.binding, &mut self.acquired);
    }

    /// Returns `true` once [`release`](Self::release) has run.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.acquired.is_empty()
    }

    /// Device the session is attached to.
    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Session shape.
    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Loaded program handle.
    #[inline]
    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    /// The slot pool, indexed by slot position.
    #[inline]
    pub fn slots(&self) -> &[KernelSlot] {
        &self.slots
    }

    /// Number of kernel slots.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Shared seed buffer.
    #[inline]
    pub fn seed_buffer(&self) -> BufferHandle {
        self.seed_buffer
    }

    /// The underlying binding.
    #[inline]
    pub fn binding(&self) -> &B {
        &self.binding
    }

    /// Word offset of a slot's seed for a dispatch round.
    #[inline]
    pub(crate) fn seed_offset(&self, slot: usize, round: usize) -> usize {
        slot * self.config.max_assets_per_slot() + round
    }
}

impl<B: AcceleratorBinding> Drop for ResourceSession<B> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<B: AcceleratorBinding> std::fmt::Debug for ResourceSession<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSession")
            .field("device", &self.device)
            .field("config", &self.config)
            .field("program", &self.program)
            .field("slots", &self.slots)
            .field("seed_buffer", &self.seed_buffer)
            .field("live_objects", &self.acquired.len())
            .finish_non_exhaustive()
    }
}

fn acquire<B: AcceleratorBinding>(
    binding: &mut B,
    image: &str,
    config: &SessionConfig,
    acquired: &mut Vec<Handle>,
) -> Result<Acquired, ResourceError> {
    let fail = |stage: InitStage| {
        move |status: BindingStatus| ResourceError::InitializationFailed { stage, status }
    };

    let program = binding.load_image(image).map_err(fail(InitStage::LoadImage))?;
    acquired.push(program.into());

    let per_slot = config.max_assets_per_slot();
    let mut slots = Vec::with_capacity(config.num_kernels);
    for (index, name) in config.kernel_names().into_iter().enumerate() {
        let kernel = binding
            .create_kernel(program, &name)
            .map_err(fail(InitStage::CreateKernel { slot: index }))?;
        acquired.push(kernel.into());

        let bank = MemoryBank(index as u32);
        let output = binding
            .create_buffer(program, per_slot * mem::size_of::<f64>(), bank)
            .map_err(fail(InitStage::CreateOutputBuffer { slot: index }))?;
        acquired.push(output.into());

        debug!(slot = index, kernel = %name, "kernel slot allocated");
        slots.push(KernelSlot {
            index,
            name,
            kernel,
            output,
            bank,
            host_output: vec![0.0; per_slot],
            staged: None,
        });
    }

    let seed_buffer = binding
        .create_buffer(
            program,
            config.seed_words() * mem::size_of::<u32>(),
            MemoryBank(0),
        )
        .map_err(fail(InitStage::CreateSeedBuffer))?;
    acquired.push(seed_buffer.into());

    Ok(Acquired {
        program,
        slots,
        seed_buffer,
    })
}

fn release_all<B: AcceleratorBinding>(binding: &mut B, acquired: &mut Vec<Handle>) {
    while let Some(handle) = acquired.pop() {
        if let Err(status) = binding.release(handle) {
            warn!(?handle, %status, "failed to release device object");
        }
    }
}
