mod block_id;
mod codec;

pub use block_id::{BlockId, BlockIdError, DAG_CBOR_CODEC, MAX_IDENTITY_SIZE, RAW_CODEC};
pub use codec::{block_links, BlockEncoded, CodecError};
