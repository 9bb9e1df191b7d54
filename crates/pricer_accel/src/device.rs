//! Device identity and program image selection.
//!
//! Each accelerator card variant needs its own program image. Which image
//! belongs to which card is policy, kept behind [`ImageResolver`] so new
//! variants can be added without touching the dispatch code.

use crate::error::ResourceError;

/// Identity of an attached accelerator.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Device {
    name: String,
}

impl Device {
    /// Creates a device identity from its reported name
    /// (e.g. `xilinx_u250_xdma_201830_2`).
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Reported device name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Selects the program image for a device.
pub trait ImageResolver {
    /// Returns the image name or path for `device`.
    fn resolve_image_name(&self, device: &Device) -> Result<String, ResourceError>;
}

impl<F> ImageResolver for F
where
    F: Fn(&Device) -> Option<String>,
{
    fn resolve_image_name(&self, device: &Device) -> Result<String, ResourceError> {
        self(device).ok_or_else(|| ResourceError::UnsupportedDevice(device.name().to_string()))
    }
}

/// Resolves images by matching fragments of the device name, first match
/// wins.
///
/// # Examples
///
/// ```rust
/// use pricer_accel::device::{Device, ImageResolver, TableResolver};
///
/// let resolver = TableResolver::default();
/// let image = resolver
///     .resolve_image_name(&Device::new("xilinx_u250_xdma_201830_2"))
///     .unwrap();
/// assert_eq!(image, "mc_euro_u250.xclbin");
/// ```
#[derive(Clone, Debug)]
pub struct TableResolver {
    entries: Vec<(String, String)>,
}

impl TableResolver {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends a `fragment -> image` entry.
    pub fn with_entry(mut self, fragment: impl Into<String>, image: impl Into<String>) -> Self {
        self.entries.push((fragment.into(), image.into()));
        self
    }
}

impl Default for TableResolver {
    /// Alveo card variants the Monte Carlo European image is built for.
    fn default() -> Self {
        Self::new()
            .with_entry("u200", "mc_euro_u200.xclbin")
            .with_entry("u250", "mc_euro_u250.xclbin")
            .with_entry("u280", "mc_euro_u280.xclbin")
            .with_entry("u50", "mc_euro_u50.xclbin")
    }
}

impl ImageResolver for TableResolver {
    fn resolve_image_name(&self, device: &Device) -> Result<String, ResourceError> {
        self.entries
            .iter()
            .find(|(fragment, _)| device.name().contains(fragment.as_str()))
            .map(|(_, image)| image.clone())
            .ok_or_else(|| ResourceError::UnsupportedDevice(device.name().to_string()))
    }
}
