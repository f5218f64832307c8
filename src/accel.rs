//! CPU feature detection and vector kernels
//!
//! The detected [`CpuFeatures`] are captured once and carried by an
//! explicitly constructed [`Accelerator`]; there is no process-wide
//! selector. All kernels are portable scalar code, the detected level is
//! reported for diagnostics only.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::ops::{Add, Mul};
use tracing::{debug, info};

/// Best vector extension available on this CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccelLevel {
    Generic,
    Sse2,
    Avx,
    Avx2,
}

impl fmt::Display for AccelLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccelLevel::Generic => "generic",
            AccelLevel::Sse2 => "sse2",
            AccelLevel::Avx => "avx",
            AccelLevel::Avx2 => "avx2",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CpuFeatures {
    pub level: AccelLevel,
}

impl Default for CpuFeatures {
    fn default() -> Self {
        Self {
            level: AccelLevel::Generic,
        }
    }
}

impl CpuFeatures {
    /// Probe the running CPU
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    pub fn detect() -> Self {
        let level = if is_x86_feature_detected!("avx2") {
            AccelLevel::Avx2
        } else if is_x86_feature_detected!("avx") {
            AccelLevel::Avx
        } else if is_x86_feature_detected!("sse2") {
            AccelLevel::Sse2
        } else {
            AccelLevel::Generic
        };
        debug!(%level, "Detected CPU features");
        Self { level }
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    pub fn detect() -> Self {
        Self::default()
    }
}

/// Element types the kernels accept
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Add<Output = Self> + Mul<Output = Self> {
    fn from_index(index: usize) -> Self;
    const NAME: &'static str;
}

macro_rules! impl_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                fn from_index(index: usize) -> Self {
                    index as $t
                }
                const NAME: &'static str = stringify!($t);
            }
        )*
    };
}

impl_element!(f32, f64, i32, i64);

/// Vector kernels bound to a detected feature set
#[derive(Debug, Clone, Copy)]
pub struct Accelerator {
    features: CpuFeatures,
}

impl Accelerator {
    pub fn new(features: CpuFeatures) -> Self {
        Self { features }
    }

    /// Detect features and build an accelerator in one step
    pub fn detect() -> Self {
        Self::new(CpuFeatures::detect())
    }

    pub fn features(&self) -> CpuFeatures {
        self.features
    }

    /// Sum of pairwise products
    pub fn dot_product<T: Element>(&self, a: &[T], b: &[T]) -> Result<T> {
        if a.len() != b.len() {
            return Err(Error::InvalidArgument(format!(
                "dot product over slices of length {} and {}",
                a.len(),
                b.len()
            )));
        }
        Ok(a
            .iter()
            .zip(b)
            .fold(T::default(), |sum, (&x, &y)| sum + x * y))
    }

    /// Self-check every element type against sums of squares
    pub fn verify(&self) -> Result<()> {
        self.verify_element::<f32>()?;
        self.verify_element::<f64>()?;
        self.verify_element::<i32>()?;
        self.verify_element::<i64>()?;
        info!(level = %self.features.level, "Accelerator verified");
        Ok(())
    }

    fn verify_element<T: Element>(&self) -> Result<()> {
        const TEST_LENGTH: usize = 127;
        const WINDOWS: usize = 0x20;

        let values: Vec<T> = (0..TEST_LENGTH).map(T::from_index).collect();
        for start in 0..WINDOWS {
            let expected = (start..TEST_LENGTH)
                .map(|i| T::from_index(i * i))
                .fold(T::default(), |sum, x| sum + x);
            let window = &values[start..];
            let computed = self.dot_product(window, window)?;
            if computed != expected {
                return Err(Error::Internal(format!(
                    "{} dot product mismatch at window {}: expected {:?}, got {:?}",
                    T::NAME,
                    start,
                    expected,
                    computed
                )));
            }
        }
        Ok(())
    }
}
