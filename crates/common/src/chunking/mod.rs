mod chunk;
mod derivation;
mod uploader;

pub use chunk::{Chunk, Location, MapKey, MAP_KEY_SIZE};
pub use derivation::{chunk_address_at, next_chunk_address, ChunkAddress, DerivationError, StreamSecret};
pub use uploader::{
    ChunkCapability, ChunkNode, CommittedChunk, Committer, FileProperties, FileUploader,
    UploadError, UploadState, FRAGMENT_SIZE, INLINE_FRAGMENT_MAX,
};
