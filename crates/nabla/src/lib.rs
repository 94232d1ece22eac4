extern crate self as nabla;

pub mod array;
pub mod backend;
pub mod device;
pub mod dtype;
mod env;
pub mod error;
pub mod fast;
pub mod ops;
pub mod random;
pub mod shape;
pub mod transforms;

pub use array::{eval, Array, ArrayElement};
pub use device::{Device, DeviceType, Stream, StreamOrDevice};
pub use dtype::DType;
pub use error::{Exception, Result};
