//! USB composite device stack.
//!
//! A [`composite::Composite`] owns a set of [`class::ClassDriver`]
//! implementations, assigns each its interface numbers, endpoint
//! addresses and string indices at mount time, concatenates their
//! configuration descriptor fragments, and routes bus events to the
//! owning driver. The class drivers themselves live under [`classes`].

#[macro_use]
extern crate bitfield;

pub mod class;
pub mod classes;
pub mod composite;
pub mod core;
pub mod descriptors;
pub mod testing;
pub mod usb;
mod vec_map;
