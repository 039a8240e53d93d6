//! Platform Abstraction Layer (PAL). Everything this crate needs to ask the operating system
//! goes through here, so that the rest of the crate can be exercised against mock or fake
//! hardware.

mod platform;

pub(crate) use platform::*;
