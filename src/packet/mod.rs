//
// Wire format (spec.md §4.A-§4.C): message framing, path attributes, BGP
// capabilities, and per-family NLRI. Grounded in holo-bgp's `packet/`
// layout (message.rs/attribute.rs/capability.rs/consts.rs/error.rs), with
// `nlri` broken out of `message.rs` into its own family-keyed module
// (see `nlri/mod.rs`) since this crate covers far more AFI/SAFI pairs
// than holo-bgp's IPv4/IPv6-unicast-only generic parameter does.
//

pub mod attribute;
pub mod capability;
pub mod consts;
pub mod error;
pub mod message;
pub mod nlri;
