//! Provider-facing descriptors (data) and strategies (behavior).
//!
//! `descriptor` exposes validated metadata (`ProviderDescriptor`) covering the authorize and
//! token endpoints, the client authentication mode, and the data API version used for resource
//! calls. `strategy` defines [`ProviderStrategy`], an HTTP-client-agnostic hook that maps token
//! endpoint failures into the gateway error taxonomy.

pub mod descriptor;
pub mod strategy;

pub use descriptor::*;
pub use strategy::*;
