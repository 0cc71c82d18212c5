/// csh-protocol defines the tagged binary codec and wire framing that
/// the csh server and its clients use to exchange requests and
/// responses. It has no knowledge of sockets, sessions, or the
/// filesystem: just values in, bytes out, and back.
mod error;
mod frame;
mod value;

pub use error::CodecError;
pub use frame::{read_frame, write_frame, CHUNK_SIZE, MAGIC};
pub use value::{Tag, Value};
