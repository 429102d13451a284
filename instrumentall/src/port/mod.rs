//! Module-side ports: named, indexed, typed endpoints belonging to a
//! [`crate::module::Module`] (`spec.md` \S3, \S4.3).
//!
//! A `TrigPort` is modeled as an [`in_port::InPort`] constructed via
//! [`in_port::InPort::new_trig`] rather than a separate type: it is, in
//! every respect but type-acceptance, a plain in-port (`spec.md` \S3:
//! "a `TrigPort` is an `InPort` that accepts any type").

pub mod in_port;
pub mod out_port;

pub use in_port::InPort;
pub use out_port::OutPort;
