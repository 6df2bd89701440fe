use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use async_trait::async_trait;
use bytes::Bytes;

use crate::crypto::{Bat, KeyHash, Secret, SecretError, SigningWriter};
use crate::linked_data::{BlockEncoded, BlockId, CodecError};
use crate::store::{BlockStore, StoreError};

use super::chunk::{Chunk, Location, MapKey};
use super::derivation::{next_chunk_address, ChunkAddress, DerivationError, StreamSecret};

/// Size of one raw fragment block within a sealed chunk
pub const FRAGMENT_SIZE: usize = 1024 * 1024;

/// Largest sealed chunk stored inline in its chunk node instead of as
/// separate fragment blocks
pub const INLINE_FRAGMENT_MAX: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload targets writer {expected} but was signed by {actual}")]
    WrongWriter { expected: KeyHash, actual: KeyHash },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Derivation(#[from] DerivationError),
    #[error("upload error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Plaintext metadata of an uploaded file, stored sealed in the first
/// chunk's node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProperties {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

impl BlockEncoded for FileProperties {}

impl FileProperties {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size,
            modified: Utc::now(),
        }
    }
}

/// The capability to read one chunk: where it lives and how to decrypt
/// it. Stored sealed under the file's base key inside the preceding
/// chunk's node, so holding the first capability yields the whole file
/// while revealing nothing to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkCapability {
    pub map_key: MapKey,
    pub data_key: Secret,
    pub bat: Option<Bat>,
}

impl BlockEncoded for ChunkCapability {}

impl ChunkCapability {
    pub fn seal(&self, base_key: &Secret) -> Result<Vec<u8>, UploadError> {
        Ok(base_key.encrypt(&self.encode()?)?)
    }

    pub fn open(base_key: &Secret, sealed: &[u8]) -> Result<Self, UploadError> {
        Ok(Self::decode(&base_key.decrypt(sealed)?)?)
    }
}

/// The structured block committed for one chunk.
///
/// Small chunks carry their ciphertext inline; larger ones link out to
/// raw fragment blocks. Either way the node links (sealed) to the next
/// chunk in the chain, and only the first node carries file properties.
/// The chunk's access token is embedded as an identity-form link, which
/// DAG walks skip rather than fetch.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkNode {
    #[serde_as(as = "Option<serde_with::Bytes>")]
    pub properties: Option<Vec<u8>>,
    #[serde_as(as = "Option<serde_with::Bytes>")]
    pub inline: Option<Vec<u8>>,
    pub fragments: Vec<BlockId>,
    #[serde_as(as = "serde_with::Bytes")]
    pub next: Vec<u8>,
    pub bat: Option<BlockId>,
}

impl BlockEncoded for ChunkNode {}

/// Binds a committed chunk node to its map key in the writer's
/// namespace.
///
/// `commit` is a compare-and-set: `existing` names the node the caller
/// last observed at the map key, and the committer must refuse the
/// update if the committed value has moved since. That refusal is what
/// stops two concurrent writers from silently clobbering each other's
/// chunks.
#[async_trait]
pub trait Committer: Send + Sync {
    /// The node currently committed at a map key, if any.
    async fn current(
        &self,
        owner: KeyHash,
        writer: &SigningWriter,
        map_key: &MapKey,
    ) -> anyhow::Result<Option<BlockId>>;

    async fn commit(
        &self,
        owner: KeyHash,
        writer: &SigningWriter,
        map_key: &MapKey,
        existing: Option<&BlockId>,
        updated: &BlockId,
    ) -> anyhow::Result<()>;
}

/// One chunk's committed outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedChunk {
    pub map_key: MapKey,
    pub node: BlockId,
    pub sealed_size: usize,
}

/// Accumulated result of an upload.
#[derive(Debug, Default)]
pub struct UploadState {
    pub bytes_written: u64,
    pub chunks: Vec<CommittedChunk>,
}

/// Sequential chunked upload of one file.
///
/// The source is consumed front to back; each chunk is sealed,
/// committed inside its own transaction, and linked to the next chunk's
/// derived address before the next read begins. A failure therefore
/// leaves a valid prefix of the file committed, resumable from the
/// failed chunk's offset.
///
/// `data_key` encrypts the first chunk only; every link in the chain
/// mints a fresh key for the chunk it points at, carried inside the
/// sealed capability.
pub struct FileUploader<R> {
    reader: R,
    length: u64,
    properties: FileProperties,
    location: Location,
    first_bat: Option<Bat>,
    base_key: Secret,
    data_key: Secret,
    stream_secret: StreamSecret,
}

impl<R: AsyncRead + Unpin + Send> FileUploader<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: R,
        length: u64,
        properties: FileProperties,
        location: Location,
        first_bat: Option<Bat>,
        base_key: Secret,
        data_key: Secret,
        stream_secret: StreamSecret,
    ) -> Self {
        Self {
            reader,
            length,
            properties,
            location,
            first_bat,
            base_key,
            data_key,
            stream_secret,
        }
    }

    /// Number of chunks this upload commits. Empty files still commit
    /// one (empty) chunk so the file exists and its properties are
    /// stored.
    pub fn chunk_count(&self) -> u64 {
        self.length.div_ceil(Chunk::MAX_SIZE as u64).max(1)
    }

    /// Upload every chunk in order, reporting progress through
    /// `monitor` as sealed bytes reach the store.
    pub async fn upload(
        mut self,
        writer: &SigningWriter,
        store: &dyn BlockStore,
        committer: &dyn Committer,
        monitor: &mut (dyn FnMut(u64) + Send),
    ) -> Result<UploadState, UploadError> {
        if writer.key_hash != self.location.writer {
            return Err(UploadError::WrongWriter {
                expected: self.location.writer,
                actual: writer.key_hash,
            });
        }

        let chunk_count = self.chunk_count();
        let mut address = ChunkAddress::new(self.location.map_key, self.first_bat.clone());
        let mut chunk_key = self.data_key.clone();
        let mut state = UploadState::default();
        for index in 0..chunk_count {
            let remaining = self.length - state.bytes_written;
            let size = remaining.min(Chunk::MAX_SIZE as u64) as usize;
            let mut data = vec![0u8; size];
            self.reader.read_exact(&mut data).await?;

            let next = next_chunk_address(&self.stream_secret, &address);
            // each link carries a fresh key, so holding one chunk's key
            // reveals nothing about earlier chunks
            let next_key = Secret::generate();
            let existing = committer
                .current(self.location.owner, writer, &address.map_key)
                .await?;
            let committed = self
                .upload_chunk(
                    index,
                    data,
                    &address,
                    &next,
                    existing.as_ref(),
                    &chunk_key,
                    &next_key,
                    writer,
                    store,
                    committer,
                    monitor,
                )
                .await?;
            state.bytes_written += size as u64;
            state.chunks.push(committed);
            address = next;
            chunk_key = next_key;
        }
        debug!(
            name = %self.properties.name,
            chunks = chunk_count,
            bytes = state.bytes_written,
            "upload complete"
        );
        Ok(state)
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_chunk(
        &self,
        index: u64,
        data: Vec<u8>,
        address: &ChunkAddress,
        next: &ChunkAddress,
        existing: Option<&BlockId>,
        chunk_key: &Secret,
        next_key: &Secret,
        writer: &SigningWriter,
        store: &dyn BlockStore,
        committer: &dyn Committer,
        monitor: &mut (dyn FnMut(u64) + Send),
    ) -> Result<CommittedChunk, UploadError> {
        let plain_size = data.len() as u64;
        let chunk = Chunk::new(data, chunk_key.clone(), address.map_key);
        let sealed = chunk.seal()?;
        let sealed_size = sealed.len();

        let next_capability = ChunkCapability {
            map_key: next.map_key,
            data_key: next_key.clone(),
            bat: next.bat.clone(),
        };

        let owner = self.location.owner;
        let tid = store.start_transaction(owner).await?;
        let result = async {
            let (inline, fragments) = if sealed_size <= INLINE_FRAGMENT_MAX {
                monitor(plain_size);
                (Some(sealed), Vec::new())
            } else {
                let mut fragments = Vec::new();
                let mut written = 0u64;
                let mut reported = 0u64;
                for fragment in sealed.chunks(FRAGMENT_SIZE) {
                    let stored = store
                        .put(
                            owner,
                            writer.key_hash,
                            vec![Bytes::copy_from_slice(fragment)],
                            true,
                            tid,
                        )
                        .await?;
                    fragments.extend(stored);
                    // scale sealed progress back to plaintext bytes so the
                    // per-chunk reports sum to the chunk's plaintext size
                    written += fragment.len() as u64;
                    let scaled = plain_size * written / sealed_size as u64;
                    monitor(scaled - reported);
                    reported = scaled;
                }
                (None, fragments)
            };

            let properties = match index {
                0 => Some(self.base_key.encrypt(&self.properties.encode()?)?),
                _ => None,
            };
            let node = ChunkNode {
                properties,
                inline,
                fragments,
                next: next_capability.seal(&self.base_key)?,
                bat: address.bat.as_ref().map(Bat::inline_id),
            };
            let stored = store
                .put(
                    owner,
                    writer.key_hash,
                    vec![Bytes::from(node.encode()?)],
                    false,
                    tid,
                )
                .await?;
            let block = *stored
                .first()
                .ok_or_else(|| anyhow::anyhow!("store returned no id for chunk node"))?;
            committer
                .commit(owner, writer, &address.map_key, existing, &block)
                .await?;
            Ok::<_, UploadError>(CommittedChunk {
                map_key: address.map_key,
                node: block,
                sealed_size,
            })
        }
        .await;
        // the transaction closes on both success and failure paths
        let closed = store.close_transaction(owner, tid).await;
        let committed = result?;
        closed?;
        debug!(chunk = index, map_key = %committed.map_key, "committed chunk");
        Ok(committed)
    }
}
