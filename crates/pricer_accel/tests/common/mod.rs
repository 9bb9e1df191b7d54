//! Counting mock binding shared by the integration tests.
//!
//! The mock answers instantly (unless a barrier delay is set), records every
//! call in a shared ledger that outlives the binding itself, and can be told
//! to fail specific calls. Each kernel "computes" the option's stock price,
//! so tests can check results land at the right index.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pricer_accel::binding::{
    AcceleratorBinding, BufferHandle, Handle, KernelArgs, KernelHandle, MemoryBank, ProgramHandle,
};
use pricer_accel::{
    BindingStatus, ConvergenceCriterion, Device, OptionSpec, PricingEngine, SessionConfig,
};

/// One observed call on the device.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    LoadImage(String),
    CreateKernel(String),
    CreateBuffer { size_bytes: usize, bank: MemoryBank },
    Write { offset: usize, seeds: Vec<u32> },
    Launch(KernelArgs),
    Synchronize,
    Read { offset: usize },
    Release(Handle),
}

/// Calls to fail, counted from zero per call kind.
#[derive(Clone, Debug, Default)]
pub struct Faults {
    pub load_image: bool,
    pub create_kernel_at: Option<usize>,
    pub create_buffer_at: Option<usize>,
    pub write_at: Option<usize>,
    pub launch_at: Option<usize>,
    pub read_at: Option<usize>,
    pub synchronize: bool,
}

#[derive(Default)]
pub struct Ledger {
    pub events: Vec<Event>,
    pub live: Vec<Handle>,
    pub double_releases: usize,
    pub faults: Faults,
    pub sync_delay: Duration,
    next_id: u64,
    kernel_calls: usize,
    buffer_calls: usize,
    write_calls: usize,
    launch_calls: usize,
    read_calls: usize,
    pending: Vec<KernelArgs>,
    outputs: HashMap<(BufferHandle, usize), f64>,
}

impl Ledger {
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn launches(&self) -> Vec<KernelArgs> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Launch(args) => Some(*args),
                _ => None,
            })
            .collect()
    }

    pub fn written_seeds(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Write { seeds, .. } => Some(seeds.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn releases(&self) -> Vec<Handle> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Release(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone, Default)]
pub struct MockBinding {
    ledger: Arc<Mutex<Ledger>>,
}

impl MockBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: Faults) -> Self {
        let mock = Self::new();
        mock.ledger().faults = faults;
        mock
    }

    pub fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap()
    }
}

impl AcceleratorBinding for MockBinding {
    fn load_image(&mut self, name: &str) -> Result<ProgramHandle, BindingStatus> {
        let mut l = self.ledger();
        l.events.push(Event::LoadImage(name.to_string()));
        if l.faults.load_image {
            return Err(BindingStatus::IMAGE_NOT_FOUND);
        }
        let h = ProgramHandle(l.next_id());
        l.live.push(h.into());
        Ok(h)
    }

    fn create_kernel(
        &mut self,
        _program: ProgramHandle,
        name: &str,
    ) -> Result<KernelHandle, BindingStatus> {
        let mut l = self.ledger();
        l.events.push(Event::CreateKernel(name.to_string()));
        let call = l.kernel_calls;
        l.kernel_calls += 1;
        if l.faults.create_kernel_at == Some(call) {
            return Err(BindingStatus::FAILED);
        }
        let h = KernelHandle(l.next_id());
        l.live.push(h.into());
        Ok(h)
    }

    fn create_buffer(
        &mut self,
        _program: ProgramHandle,
        size_bytes: usize,
        bank: MemoryBank,
    ) -> Result<BufferHandle, BindingStatus> {
        let mut l = self.ledger();
        l.events.push(Event::CreateBuffer { size_bytes, bank });
        let call = l.buffer_calls;
        l.buffer_calls += 1;
        if l.faults.create_buffer_at == Some(call) {
            return Err(BindingStatus::OUT_OF_RESOURCES);
        }
        let h = BufferHandle(l.next_id());
        l.live.push(h.into());
        Ok(h)
    }

    fn write(
        &mut self,
        _buffer: BufferHandle,
        offset: usize,
        data: &[u32],
    ) -> Result<(), BindingStatus> {
        let mut l = self.ledger();
        l.events.push(Event::Write {
            offset,
            seeds: data.to_vec(),
        });
        let call = l.write_calls;
        l.write_calls += 1;
        if l.faults.write_at == Some(call) {
            return Err(BindingStatus::FAILED);
        }
        Ok(())
    }

    fn read(
        &mut self,
        buffer: BufferHandle,
        offset: usize,
        out: &mut [f64],
    ) -> Result<(), BindingStatus> {
        let mut l = self.ledger();
        l.events.push(Event::Read { offset });
        let call = l.read_calls;
        l.read_calls += 1;
        if l.faults.read_at == Some(call) {
            return Err(BindingStatus::FAILED);
        }
        for (i, value) in out.iter_mut().enumerate() {
            *value = l
                .outputs
                .get(&(buffer, offset + i))
                .copied()
                .unwrap_or(f64::NAN);
        }
        Ok(())
    }

    fn launch(&mut self, _kernel: KernelHandle, args: &KernelArgs) -> Result<(), BindingStatus> {
        let mut l = self.ledger();
        l.events.push(Event::Launch(*args));
        let call = l.launch_calls;
        l.launch_calls += 1;
        if l.faults.launch_at == Some(call) {
            return Err(BindingStatus::FAILED);
        }
        l.pending.push(*args);
        Ok(())
    }

    fn synchronize(&mut self) -> Result<(), BindingStatus> {
        let delay = {
            let mut l = self.ledger();
            l.events.push(Event::Synchronize);
            if l.faults.synchronize {
                return Err(BindingStatus::FAILED);
            }
            let pending = std::mem::take(&mut l.pending);
            for args in pending {
                l.outputs.insert(
                    (args.output_buffer, args.output_offset),
                    args.option.stock_price,
                );
            }
            l.sync_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn release(&mut self, handle: Handle) -> Result<(), BindingStatus> {
        let mut l = self.ledger();
        l.events.push(Event::Release(handle));
        match l.live.iter().position(|h| *h == handle) {
            Some(pos) => {
                l.live.remove(pos);
                Ok(())
            }
            None => {
                l.double_releases += 1;
                Err(BindingStatus::INVALID_HANDLE)
            }
        }
    }
}

/// Installs a test-writer subscriber once; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

pub fn config(num_kernels: usize, max_batch_width: usize) -> SessionConfig {
    SessionConfig::builder()
        .num_kernels(num_kernels)
        .max_batch_width(max_batch_width)
        .build()
        .unwrap()
}

/// Engine with a live session on a fresh mock; returns the mock handle too.
pub fn engine_with_mock(
    num_kernels: usize,
    max_batch_width: usize,
    faults: Faults,
) -> (PricingEngine<MockBinding>, MockBinding) {
    init_tracing();
    let mock = MockBinding::with_faults(faults);
    let resolver = |_: &Device| Some("mc_euro_mock.xclbin".to_string());
    let mut engine =
        PricingEngine::with_resolver(config(num_kernels, max_batch_width), resolver).with_seed(2024);
    engine
        .create_session(mock.clone(), &Device::new("mock"))
        .unwrap();
    (engine, mock)
}

/// Options whose stock price is `index + 1`, so mock prices identify them.
pub fn indexed_specs(n: usize) -> Vec<OptionSpec> {
    (0..n)
        .map(|i| OptionSpec::call(i as f64 + 1.0, 100.0, 0.05, 0.0, 0.2, 1.0))
        .collect()
}

pub fn fixed(n: usize, samples: u32) -> Vec<ConvergenceCriterion> {
    vec![ConvergenceCriterion::FixedSamples(samples); n]
}
