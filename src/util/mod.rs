//
// Ambient helpers shared across the packet codec, connection layer, and
// reactor. Grounded in holo_utils (bytes.rs, task.rs, socket.rs), trimmed
// to what a single-crate BGP speaker needs.
//

pub mod bytes_ext;
pub mod socket;
pub mod task;
