//! Generic Attribute Profile ([Vol 3] Part G).

pub use {consts::*, local::*};

mod consts;
mod local;
