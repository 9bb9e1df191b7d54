//! # Pricer Accel (Layer 3: Accelerator Host)
//!
//! Host-side orchestration for Monte Carlo European option pricing on an
//! accelerator card with a fixed pool of kernel instances.
//!
//! The Monte Carlo kernel itself runs on the device. This crate owns
//! everything around it:
//! - Device object lifecycle (program, kernels, buffers) via [`session`]
//! - Per-launch seed generation via [`seed`]
//! - Tolerance and fixed-sample dispatch, batching across the slot pool and
//!   per-asset failure isolation via [`engine`]
//! - Wall-clock timing of each run via [`timer`]
//!
//! The device runtime is reached only through the
//! [`AcceleratorBinding`](binding::AcceleratorBinding) trait. The
//! [`emulation`] module provides a software binding that runs the kernel on
//! the host.
//!
//! ## Usage Example
//!
//! ```rust
//! use pricer_accel::{
//!     AssetColumns, ConvergenceCriterion, Device, HostEmulator, OptionSpec, OptionType,
//!     PricingEngine, SessionConfig,
//! };
//!
//! let config = SessionConfig::builder().num_kernels(4).build().unwrap();
//! let mut engine = PricingEngine::new(config);
//! engine
//!     .create_session(HostEmulator::new(), &Device::new("xilinx_u200_xdma_201830_2"))
//!     .unwrap();
//!
//! // Single asset, sample until the standard error is at most 0.1
//! let spec = OptionSpec::put(100.0, 110.0, 0.03, 0.01, 0.25, 0.5);
//! let price = engine.run_tolerance(spec, 0.1).unwrap();
//! assert!(price > 0.0);
//!
//! // Column batch, fixed sample counts
//! let option_type = [OptionType::Call, OptionType::Put, OptionType::Call];
//! let spot = [100.0, 100.0, 95.0];
//! let strike = [100.0, 105.0, 100.0];
//! let rate = [0.05; 3];
//! let dividend = [0.0; 3];
//! let vol = [0.2, 0.3, 0.25];
//! let maturity = [1.0, 0.5, 2.0];
//! let columns = AssetColumns {
//!     option_type: &option_type,
//!     stock_price: &spot,
//!     strike_price: &strike,
//!     risk_free_rate: &rate,
//!     dividend_yield: &dividend,
//!     volatility: &vol,
//!     time_to_maturity: &maturity,
//! };
//! let results = engine.run_batch_samples(&columns, &[4096; 3], 3).unwrap();
//! assert_eq!(results.len(), 3);
//! assert!(results.iter().all(|r| r.is_ok()));
//!
//! println!("last run took {} us", engine.last_run_micros());
//! engine.release_session();
//! ```

#![warn(missing_docs)]

pub mod binding;
pub mod config;
pub mod device;
pub mod emulation;
pub mod engine;
pub mod error;
pub mod seed;
pub mod session;
pub mod timer;
pub mod types;

pub use binding::{AcceleratorBinding, KernelArgs};
pub use config::{build_config, ConfigError, SessionConfig};
pub use device::{Device, ImageResolver, TableResolver};
pub use emulation::HostEmulator;
pub use engine::PricingEngine;
pub use error::{AccelError, BindingStatus, ComputeError, ResourceError, ValidationError};
pub use seed::SeedProvider;
pub use session::{KernelSlot, ResourceSession};
pub use timer::RunTimer;
pub use types::{AssetColumns, ConvergenceCriterion, OptionSpec, OptionType, RunResult};
