//! Upload staging for Blobshed.
//!
//! Incoming content is spooled to a local file while its size and sha256
//! digest are computed. The spooled file is the handoff point to the
//! blobstore: [`StagedUpload::path`] feeds `Blobstore::put_file`, the
//! digest goes to the controller as the upload's checksum.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::debug;
use uuid::Uuid;

use blobshed_common::{BlobKey, ByteStream, Checksum, Error, Result};

/// Read buffer size when spooling from a reader.
const SPOOL_CHUNK: usize = 64 * 1024;

/// A spooled upload.
///
/// Owns its spool file: the file is removed on drop unless it has been
/// handed over via [`StagedUpload::persist_to`] or
/// [`StagedUpload::into_path`].
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
    size: u64,
    checksum: Checksum,
    keep: bool,
}

impl StagedUpload {
    /// Location of the spool file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Spooled size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Digest of the spooled content.
    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// Content-addressed blob key derived from the digest.
    pub fn key(&self) -> Result<BlobKey> {
        BlobKey::parse(&self.checksum.value)
    }

    /// Move the spool file to `dest`.
    ///
    /// Falls back to copy-and-remove when a rename is not possible (spool
    /// dir and destination on different filesystems).
    pub async fn persist_to(mut self, dest: &Path) -> Result<()> {
        match fs::rename(&self.path, dest).await {
            Ok(()) => {
                self.keep = true;
                Ok(())
            }
            Err(_) => {
                fs::copy(&self.path, dest).await?;
                Ok(())
            }
        }
    }

    /// Hand over ownership of the spool file.
    ///
    /// The caller becomes responsible for removing it.
    pub fn into_path(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Spools uploads into a staging directory.
pub struct Stager {
    spool_dir: PathBuf,
    max_size: Option<u64>,
}

impl Stager {
    /// Create a stager.
    ///
    /// `spool_dir` defaults to `blobshed-spool` under the system temp
    /// directory and is created if absent. When `max_size` is set, uploads
    /// exceeding it are aborted and their partial spool file removed.
    pub fn new(spool_dir: Option<PathBuf>, max_size: Option<u64>) -> Result<Self> {
        let spool_dir =
            spool_dir.unwrap_or_else(|| std::env::temp_dir().join("blobshed-spool"));
        std::fs::create_dir_all(&spool_dir)?;
        Ok(Self {
            spool_dir,
            max_size,
        })
    }

    /// Spool an async reader to disk.
    pub async fn stage_reader<R>(&self, mut reader: R) -> Result<StagedUpload>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut spool = self.open_spool().await?;
        let mut buf = vec![0u8; SPOOL_CHUNK];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => return Err(spool.abort(e.into()).await),
            };
            if let Err(e) = spool.write(&buf[..n]).await {
                return Err(spool.abort(e).await);
            }
        }
        spool.finish().await
    }

    /// Spool a byte stream to disk.
    pub async fn stage_stream(&self, mut stream: ByteStream) -> Result<StagedUpload> {
        use futures::StreamExt;

        let mut spool = self.open_spool().await?;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return Err(spool.abort(e).await),
            };
            if let Err(e) = spool.write(&chunk).await {
                return Err(spool.abort(e).await);
            }
        }
        spool.finish().await
    }

    /// Spool an existing file.
    pub async fn stage_file(&self, path: &Path) -> Result<StagedUpload> {
        let file = File::open(path).await?;
        self.stage_reader(file).await
    }

    async fn open_spool(&self) -> Result<Spool> {
        let path = self.spool_dir.join(Uuid::new_v4().to_string());
        let file = File::create(&path).await?;
        Ok(Spool {
            writer: BufWriter::new(file),
            path,
            hasher: Sha256::new(),
            size: 0,
            max_size: self.max_size,
        })
    }
}

/// An in-progress spool file with a running digest.
struct Spool {
    writer: BufWriter<File>,
    path: PathBuf,
    hasher: Sha256,
    size: u64,
    max_size: Option<u64>,
}

impl Spool {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.size += chunk.len() as u64;
        if let Some(max) = self.max_size {
            if self.size > max {
                return Err(Error::InvalidInput(format!(
                    "Upload exceeds maximum size of {} bytes",
                    max
                )));
            }
        }
        self.hasher.update(chunk);
        self.writer.write_all(chunk).await?;
        Ok(())
    }

    async fn finish(mut self) -> Result<StagedUpload> {
        self.writer.flush().await?;
        let digest = hex::encode(self.hasher.finalize());
        debug!(path = %self.path.display(), size = self.size, "staged upload");
        Ok(StagedUpload {
            path: self.path,
            size: self.size,
            checksum: Checksum::sha256(digest),
            keep: false,
        })
    }

    /// Remove the partial spool file and pass the failure through.
    async fn abort(mut self, error: Error) -> Error {
        let _ = self.writer.flush().await;
        let _ = fs::remove_file(&self.path).await;
        error
    }
}
