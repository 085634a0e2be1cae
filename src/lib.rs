//! Two-process password search: a controller hands one crypt(3) hash to a
//! worker over TCP, and the worker brute-forces it with a thread pool while
//! reporting progress on request.

pub mod controller;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod shadow;
pub mod structs;
pub mod traits;
pub mod worker;
