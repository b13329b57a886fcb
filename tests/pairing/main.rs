//! Integration tests: a simulated mobile app driving full sessions against
//! the browser-side driver.

mod common;
mod devices;
mod end_to_end;
mod tiered_cache;
