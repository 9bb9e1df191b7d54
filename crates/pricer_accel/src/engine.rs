//! Monte Carlo European pricing engine.
//!
//! [`PricingEngine`] is the control loop between callers and the kernel
//! pool. It claims a device by creating a [`ResourceSession`], then turns
//! every pricing call into dispatch rounds over the session's slots.
//!
//! # Dispatch
//!
//! A batch of `n` assets on `k` slots runs in `ceil(n / k)` rounds. Asset
//! `i` runs in round `i / k` on slot `i % k`:
//!
//! ```text
//! n = 5, k = 4
//!
//! round 0:  slot0=a0  slot1=a1  slot2=a2  slot3=a3   -> synchronize -> read 4
//! round 1:  slot0=a4  (slots 1..3 idle)              -> synchronize -> read 1
//! ```
//!
//! Within a round each populated slot has its arguments staged, its seed
//! written, and its kernel launched; the round then waits on a single
//! barrier before any output is read. Idle slots are not touched.
//!
//! # Failure isolation
//!
//! A failed seed write, launch or readback marks only that asset as failed
//! and the rest of the batch carries on. A failed barrier means the device is
//! unusable and aborts the call with [`AccelError::SynchronizeFailed`].
//!
//! # Examples
//!
//! ```rust
//! use pricer_accel::config::SessionConfig;
//! use pricer_accel::device::Device;
//! use pricer_accel::emulation::HostEmulator;
//! use pricer_accel::engine::PricingEngine;
//! use pricer_accel::types::OptionSpec;
//!
//! let config = SessionConfig::builder().num_kernels(2).build().unwrap();
//! let mut engine = PricingEngine::new(config).with_seed(42);
//! engine
//!     .create_session(HostEmulator::new(), &Device::new("xilinx_u250_xdma_201830_2"))
//!     .unwrap();
//!
//! let spec = OptionSpec::call(100.0, 100.0, 0.05, 0.0, 0.2, 1.0);
//! let price = engine.run_samples(spec, 20_000).unwrap();
//! assert!(price > 9.0 && price < 12.0);
//!
//! engine.release_session();
//! ```

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::binding::{AcceleratorBinding, KernelArgs};
use crate::config::SessionConfig;
use crate::device::{Device, ImageResolver, TableResolver};
use crate::error::{AccelError, ComputeError, ResourceError, ValidationError};
use crate::seed::SeedProvider;
use crate::session::ResourceSession;
use crate::timer::RunTimer;
use crate::types::{AssetColumns, ConvergenceCriterion, OptionSpec, RunResult};

/// Pricing entry points over an accelerator kernel pool.
///
/// One engine drives at most one session at a time, and a run owns the
/// session until it returns. Callers sharing an engine across threads must
/// serialise access themselves.
pub struct PricingEngine<B: AcceleratorBinding> {
    config: SessionConfig,
    resolver: Box<dyn ImageResolver>,
    session: Option<ResourceSession<B>>,
    timer: RunTimer,
    seed: Option<u64>,
}

impl<B: AcceleratorBinding> PricingEngine<B> {
    /// Creates an engine that resolves program images with the default
    /// [`TableResolver`].
    pub fn new(config: SessionConfig) -> Self {
        Self::with_resolver(config, TableResolver::default())
    }

    /// Creates an engine with a custom image resolver.
    pub fn with_resolver(config: SessionConfig, resolver: impl ImageResolver + 'static) -> Self {
        Self {
            config,
            resolver: Box::new(resolver),
            session: None,
            timer: RunTimer::new(),
            seed: None,
        }
    }

    /// Makes kernel seeds reproducible for sessions created afterwards.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Session shape used for new sessions and for batch validation.
    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The live session, if any.
    #[inline]
    pub fn session(&self) -> Option<&ResourceSession<B>> {
        self.session.as_ref()
    }

    /// Returns `true` while a session is live.
    #[inline]
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Claims `device` through `binding` and allocates the kernel pool.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::SessionActive`] if a session already exists;
    ///   the existing session is left untouched.
    /// - Any creation error from [`ResourceSession::create`]; the engine
    ///   stays without a session and the call can be retried.
    pub fn create_session(&mut self, binding: B, device: &Device) -> Result<(), ResourceError> {
        if let Some(existing) = &self.session {
            return Err(ResourceError::SessionActive(
                existing.device().name().to_string(),
            ));
        }

        let seeds = match self.seed {
            Some(seed) => SeedProvider::from_seed(seed),
            None => SeedProvider::from_entropy(),
        };
        let session = ResourceSession::create(
            binding,
            device,
            self.resolver.as_ref(),
            self.config.clone(),
            seeds,
        )?;
        self.session = Some(session);
        Ok(())
    }

    /// Releases the live session. A no-op when there is none.
    pub fn release_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.release();
        }
    }

    /// Prices one option, sampling until the standard error reaches
    /// `required_tolerance`.
    pub fn run_tolerance(
        &mut self,
        spec: OptionSpec,
        required_tolerance: f64,
    ) -> Result<f64, AccelError> {
        self.run_single(spec, ConvergenceCriterion::Tolerance(required_tolerance))
    }

    /// Prices one option with exactly `required_samples` paths.
    pub fn run_samples(&mut self, spec: OptionSpec, required_samples: u32) -> Result<f64, AccelError> {
        self.run_single(spec, ConvergenceCriterion::FixedSamples(required_samples))
    }

    /// Prices `num_assets` options given as columns, each to its own
    /// tolerance.
    pub fn run_batch_tolerance(
        &mut self,
        columns: &AssetColumns<'_>,
        required_tolerance: &[f64],
        num_assets: usize,
    ) -> Result<Vec<RunResult>, AccelError> {
        let specs = columns.to_specs(num_assets)?;
        check_len("required_tolerance", required_tolerance.len(), num_assets)?;
        let criteria: Vec<_> = required_tolerance
            .iter()
            .map(|&tol| ConvergenceCriterion::Tolerance(tol))
            .collect();
        self.run_batch(&specs, &criteria)
    }

    /// Prices `num_assets` options given as columns, each with its own
    /// sample count.
    pub fn run_batch_samples(
        &mut self,
        columns: &AssetColumns<'_>,
        required_samples: &[u32],
        num_assets: usize,
    ) -> Result<Vec<RunResult>, AccelError> {
        let specs = columns.to_specs(num_assets)?;
        check_len("required_samples", required_samples.len(), num_assets)?;
        let criteria: Vec<_> = required_samples
            .iter()
            .map(|&n| ConvergenceCriterion::FixedSamples(n))
            .collect();
        self.run_batch(&specs, &criteria)
    }

    /// Prices a batch of options, one criterion per option.
    ///
    /// Returns one [`RunResult`] per input, in input order. Per-asset
    /// failures are reported inside the results.
    ///
    /// # Errors
    ///
    /// - [`AccelError::Validation`] for mismatched lengths, an oversized
    ///   batch or an invalid criterion; no device call has been made.
    /// - [`AccelError::NoSession`] if no session is live.
    /// - [`AccelError::SynchronizeFailed`] if a round barrier fails.
    pub fn run_batch(
        &mut self,
        specs: &[OptionSpec],
        criteria: &[ConvergenceCriterion],
    ) -> Result<Vec<RunResult>, AccelError> {
        let num_assets = specs.len();
        check_len("criteria", criteria.len(), num_assets)?;
        if num_assets > self.config.max_batch_width {
            return Err(ValidationError::BatchSizeExceeded {
                requested: num_assets,
                max: self.config.max_batch_width,
            }
            .into());
        }
        for (asset, criterion) in criteria.iter().enumerate() {
            criterion.validate(asset)?;
        }

        self.timer.start();
        if num_assets == 0 {
            self.timer.stop();
            return Ok(Vec::new());
        }

        let session = match self.session.as_mut() {
            Some(session) => session,
            None => {
                self.timer.stop();
                return Err(AccelError::NoSession);
            }
        };
        let outcome = dispatch(session, specs, criteria);
        self.timer.stop();

        if let Ok(results) = &outcome {
            let failed = results.iter().filter(|r| !r.is_ok()).count();
            info!(
                assets = num_assets,
                failed,
                elapsed_us = self.timer.elapsed_micros() as u64,
                "batch priced"
            );
        }
        outcome
    }

    /// Duration of the most recent run; zero before the first run.
    #[inline]
    pub fn last_run_time(&self) -> Duration {
        self.timer.elapsed()
    }

    /// Duration of the most recent run in microseconds.
    #[inline]
    pub fn last_run_micros(&self) -> u128 {
        self.timer.elapsed_micros()
    }

    fn run_single(
        &mut self,
        spec: OptionSpec,
        criterion: ConvergenceCriterion,
    ) -> Result<f64, AccelError> {
        let results = self.run_batch(&[spec], &[criterion])?;
        Ok(results[0].into_result()?)
    }
}

impl<B: AcceleratorBinding> Drop for PricingEngine<B> {
    fn drop(&mut self) {
        self.release_session();
    }
}

fn check_len(field: &'static str, actual: usize, expected: usize) -> Result<(), ValidationError> {
    if actual != expected {
        return Err(ValidationError::ArrayLengthMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

fn dispatch<B: AcceleratorBinding>(
    session: &mut ResourceSession<B>,
    specs: &[OptionSpec],
    criteria: &[ConvergenceCriterion],
) -> Result<Vec<RunResult>, AccelError> {
    let num_assets = specs.len();
    let num_kernels = session.slot_count();
    let rounds = num_assets.div_ceil(num_kernels);
    let time_steps = session.config().time_steps;
    let seed_buffer = session.seed_buffer;

    let mut results = vec![RunResult::priced(f64::NAN); num_assets];

    for round in 0..rounds {
        let base = round * num_kernels;
        let populated = num_kernels.min(num_assets - base);
        debug!(round, populated, "dispatching round");

        for slot in session.slots.iter_mut() {
            slot.staged = None;
        }

        let mut launched = 0usize;
        for slot_index in 0..populated {
            let asset = base + slot_index;
            let seed_offset = session.seed_offset(slot_index, round);
            let seed = session.seeds.next_seed(asset, slot_index);
            session.host_seeds[seed_offset] = seed;

            let slot = &mut session.slots[slot_index];
            let args = KernelArgs {
                option: specs[asset],
                criterion: criteria[asset],
                time_steps,
                seed_buffer,
                seed_offset,
                output_buffer: slot.output(),
                output_offset: round,
            };

            if let Err(status) = session.binding.write(
                seed_buffer,
                seed_offset,
                &session.host_seeds[seed_offset..=seed_offset],
            ) {
                warn!(asset, slot = slot_index, %status, "seed transfer failed");
                results[asset] = RunResult::failed(ComputeError::TransferFailed { asset, status });
                continue;
            }

            if let Err(status) = session.binding.launch(slot.kernel(), &args) {
                warn!(asset, slot = slot_index, %status, "kernel launch failed");
                results[asset] = RunResult::failed(ComputeError::KernelFailed { asset, status });
                continue;
            }

            slot.staged = Some(args);
            launched += 1;
        }

        if launched == 0 {
            continue;
        }
        session
            .binding
            .synchronize()
            .map_err(|status| AccelError::SynchronizeFailed { round, status })?;

        for slot in session.slots.iter_mut() {
            if slot.staged.take().is_none() {
                continue;
            }
            let asset = base + slot.index();
            match session
                .binding
                .read(slot.output(), round, &mut slot.host_output[round..=round])
            {
                Ok(()) => results[asset] = RunResult::priced(slot.host_output[round]),
                Err(status) => {
                    warn!(asset, slot = slot.index(), %status, "output readback failed");
                    results[asset] =
                        RunResult::failed(ComputeError::TransferFailed { asset, status });
                }
            }
        }
    }

    Ok(results)
}
