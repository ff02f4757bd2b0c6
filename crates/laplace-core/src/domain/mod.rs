//! Domain vocabulary for the LAPLACE-LHC server.
//!
//! This module contains pure types with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is called the **domain**.  Domain code has no imports from network
//! libraries or OS APIs, and can be compiled and tested on any platform without
//! any external setup.
//!
//! Here the domain is small: the catalogue of devices a server can front, and
//! the shape of the address a server binds to.  Code in outer layers (the
//! server's dispatch loop, the socket adapters) depends on these types, but
//! they never depend on the outer layers.

/// Bind address parsing (`tcp://<host-or-*>:<port>`).
pub mod address;

/// The fixed device enumeration.
pub mod device;
