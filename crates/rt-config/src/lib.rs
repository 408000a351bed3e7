// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A hierarchical, type-safe, hot-reloadable configuration registry.
//!
//! Variables are looked up by dotted lowercase name (`fiber.stack_size`) and
//! are type-checked at every access: asking for a `u32` handle to a name
//! that was registered as a `String` returns [`None`] and logs, it never
//! panics or silently reinterprets the bytes.

mod codec;
mod error;
mod registry;
mod var;

pub use codec::TextCodec;
pub use error::ConfigError;
pub use registry::{
    load_from_tree, load_from_yaml_str, lookup, lookup_base, lookup_or_create, register, visit,
    Registry,
};
pub use var::{ConfigVar, ConfigVarBase, ListenerId};
