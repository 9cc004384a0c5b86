//! Public embedding API
//!
//! - [`native`]: building native functions and the registry shared by the
//!   compiler and the VM
//! - [`conversion`]: typed conversion between Rust values and [`Value`]s
//!
//! [`Value`]: crate::value::Value

pub mod conversion;
pub mod native;

pub use conversion::{ConversionError, FromValue, ToValue};
pub use native::{BuildError, NativeFunctionBuilder, NativeRegistry, RegistryError};
