//! Value types exchanged with the pricing engine.
//!
//! Callers own these; the engine copies them into its staging area before
//! dispatch and does not retain them afterwards.

use serde::{Deserialize, Serialize};

use crate::error::{ComputeError, ValidationError};

/// Option payoff direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    /// Right to buy at the strike.
    #[default]
    Call,
    /// Right to sell at the strike.
    Put,
}

/// Contract and market parameters of one European option.
///
/// # Examples
///
/// ```rust
/// use pricer_accel::types::{OptionSpec, OptionType};
///
/// let spec = OptionSpec::call(100.0, 105.0, 0.05, 0.0, 0.2, 1.0);
/// assert_eq!(spec.option_type, OptionType::Call);
/// assert_eq!(spec.strike_price, 105.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    /// Call or put.
    pub option_type: OptionType,
    /// Spot price of the underlying.
    pub stock_price: f64,
    /// Strike price.
    pub strike_price: f64,
    /// Continuously compounded risk-free rate.
    pub risk_free_rate: f64,
    /// Continuous dividend yield.
    pub dividend_yield: f64,
    /// Annualised volatility.
    pub volatility: f64,
    /// Time to maturity in years.
    pub time_to_maturity: f64,
}

impl OptionSpec {
    /// Creates a call option.
    pub fn call(
        stock_price: f64,
        strike_price: f64,
        risk_free_rate: f64,
        dividend_yield: f64,
        volatility: f64,
        time_to_maturity: f64,
    ) -> Self {
        Self {
            option_type: OptionType::Call,
            stock_price,
            strike_price,
            risk_free_rate,
            dividend_yield,
            volatility,
            time_to_maturity,
        }
    }

    /// Creates a put option.
    pub fn put(
        stock_price: f64,
        strike_price: f64,
        risk_free_rate: f64,
        dividend_yield: f64,
        volatility: f64,
        time_to_maturity: f64,
    ) -> Self {
        Self {
            option_type: OptionType::Put,
            ..Self::call(
                stock_price,
                strike_price,
                risk_free_rate,
                dividend_yield,
                volatility,
                time_to_maturity,
            )
        }
    }
}

/// How the kernel decides it has simulated enough paths.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceCriterion {
    /// Keep sampling until the standard error drops to this value.
    Tolerance(f64),
    /// Simulate exactly this many paths.
    FixedSamples(u32),
}

impl ConvergenceCriterion {
    /// Checks the criterion is one the kernel can honour.
    ///
    /// A zero sample count is rejected: the kernel reads a zero count as
    /// "run in tolerance mode", which would silently change the mode.
    pub fn validate(&self, asset: usize) -> Result<(), ValidationError> {
        match *self {
            ConvergenceCriterion::Tolerance(tol) if !(tol.is_finite() && tol > 0.0) => {
                Err(ValidationError::InvalidCriterion {
                    asset,
                    reason: format!("tolerance must be positive and finite, got {}", tol),
                })
            }
            ConvergenceCriterion::FixedSamples(0) => Err(ValidationError::InvalidCriterion {
                asset,
                reason: "sample count must be at least 1".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Column-oriented batch input: one slice per option field.
///
/// Every slice must hold exactly `num_assets` entries, index-aligned.
#[derive(Clone, Copy, Debug)]
pub struct AssetColumns<'a> {
    /// Call or put per asset.
    pub option_type: &'a [OptionType],
    /// Spot prices.
    pub stock_price: &'a [f64],
    /// Strike prices.
    pub strike_price: &'a [f64],
    /// Risk-free rates.
    pub risk_free_rate: &'a [f64],
    /// Dividend yields.
    pub dividend_yield: &'a [f64],
    /// Volatilities.
    pub volatility: &'a [f64],
    /// Times to maturity.
    pub time_to_maturity: &'a [f64],
}

impl AssetColumns<'_> {
    /// Checks every column has `num_assets` entries.
    pub fn check_len(&self, num_assets: usize) -> Result<(), ValidationError> {
        let lengths = [
            ("option_type", self.option_type.len()),
            ("stock_price", self.stock_price.len()),
            ("strike_price", self.strike_price.len()),
            ("risk_free_rate", self.risk_free_rate.len()),
            ("dividend_yield", self.dividend_yield.len()),
            ("volatility", self.volatility.len()),
            ("time_to_maturity", self.time_to_maturity.len()),
        ];
        for (field, actual) in lengths {
            if actual != num_assets {
                return Err(ValidationError::ArrayLengthMismatch {
                    field,
                    expected: num_assets,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Gathers the columns into one [`OptionSpec`] per asset.
    pub fn to_specs(&self, num_assets: usize) -> Result<Vec<OptionSpec>, ValidationError> {
        self.check_len(num_assets)?;
        Ok((0..num_assets)
            .map(|i| OptionSpec {
                option_type: self.option_type[i],
                stock_price: self.stock_price[i],
                strike_price: self.strike_price[i],
                risk_free_rate: self.risk_free_rate[i],
                dividend_yield: self.dividend_yield[i],
                volatility: self.volatility[i],
                time_to_maturity: self.time_to_maturity[i],
            })
            .collect())
    }
}

/// Outcome of pricing one asset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunResult {
    /// Estimated option price; `NaN` when `error` is set.
    pub option_price: f64,
    /// Set when the asset's accelerator invocation failed.
    pub error: Option<ComputeError>,
}

impl RunResult {
    /// Successful result.
    pub fn priced(option_price: f64) -> Self {
        Self {
            option_price,
            error: None,
        }
    }

    /// Failed result.
    pub fn failed(error: ComputeError) -> Self {
        Self {
            option_price: f64::NAN,
            error: Some(error),
        }
    }

    /// Returns `true` when the asset was priced.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Converts into a `Result`.
    pub fn into_result(self) -> Result<f64, ComputeError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.option_price),
        }
    }
}
