//! Streaming bitrot codec: a writer that chains a keyed hash over
//! fixed-size shards, and a reader that verifies each shard before handing
//! bytes back to the caller. Supports two interchangeable hash algorithms.

use blake2::digest::consts::U32;
use blake2::digest::{Digest, FixedOutput, Update};
use bytes::{Bytes, BytesMut};
use ferrite_common::FileInfo;
use ferrite_common::error::FerriteError;
use ferrite_common::filemeta::BitrotAlgorithm;
use highway::{HighwayHash, HighwayHasher, Key};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HASH_SIZE: usize = 32;

/// A 256-bit key derived from erasure-set configuration, used to seed
/// HighwayHash so that bitrot checksums cannot be forged by an attacker
/// without the set's configuration.
#[derive(Debug, Clone, Copy)]
pub struct BitrotKey(pub [u64; 4]);

impl BitrotKey {
    /// Derive a key from arbitrary configuration bytes (set id, object
    /// name, ...). Not cryptographically sensitive beyond "not guessable
    /// from the shard contents alone".
    pub fn derive(seed: &[u8]) -> Self {
        let mut hasher = Blake2bKeyed::new();
        hasher.update(seed);
        let digest = hasher.finalize();
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&digest[i * 8..i * 8 + 8]);
            *word = u64::from_le_bytes(buf);
        }
        BitrotKey(words)
    }
}

type Blake2bKeyed = blake2::Blake2b<U32>;

fn highway_key(key: BitrotKey) -> Key {
    Key(key.0)
}

/// Compute the bitrot hash of one shard.
pub fn hash_shard(algorithm: BitrotAlgorithm, key: BitrotKey, shard: &[u8]) -> Vec<u8> {
    match algorithm {
        BitrotAlgorithm::HighwayHash256 => {
            let mut hasher = HighwayHasher::new(highway_key(key));
            hasher.append(shard);
            let parts: [u64; 4] = hasher.finalize256();
            let mut out = Vec::with_capacity(32);
            for part in parts {
                out.extend_from_slice(&part.to_le_bytes());
            }
            out
        }
        BitrotAlgorithm::Blake2b256 => {
            let mut hasher = Blake2bKeyed::new();
            Update::update(&mut hasher, shard);
            FixedOutput::finalize_fixed(hasher).to_vec()
        }
    }
}

/// `ceil(input / shard_size) * (shard_size + HASH_SIZE)`.
pub fn bitrot_shard_file_size(input_size: u64, shard_size: u64) -> u64 {
    if shard_size == 0 {
        return 0;
    }
    let shards = input_size.div_ceil(shard_size);
    shards * (shard_size + HASH_SIZE as u64)
}

/// Streaming writer: buffers up to `shard_size` bytes, then emits the shard
/// followed by its hash. The final (possibly short) shard is flushed on
/// `finish`.
pub struct BitrotWriter<W> {
    inner: W,
    algorithm: BitrotAlgorithm,
    key: BitrotKey,
    shard_size: usize,
    buffer: BytesMut,
}

impl<W: AsyncWrite + Unpin> BitrotWriter<W> {
    pub fn new(inner: W, algorithm: BitrotAlgorithm, key: BitrotKey, shard_size: usize) -> Self {
        Self {
            inner,
            algorithm,
            key,
            shard_size,
            buffer: BytesMut::with_capacity(shard_size),
        }
    }

    pub async fn write_all(&mut self, mut data: &[u8]) -> Result<(), FerriteError> {
        while !data.is_empty() {
            let take = (self.shard_size - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == self.shard_size {
                self.flush_shard().await?;
            }
        }
        Ok(())
    }

    async fn flush_shard(&mut self) -> Result<(), FerriteError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let shard = self.buffer.split().freeze();
        let hash = hash_shard(self.algorithm, self.key, &shard);
        self.inner
            .write_all(&shard)
            .await
            .map_err(|e| FerriteError::Io(e.to_string()))?;
        self.inner
            .write_all(&hash)
            .await
            .map_err(|e| FerriteError::Io(e.to_string()))?;
        Ok(())
    }

    /// Flush any trailing partial shard and return the underlying writer.
    pub async fn finish(mut self) -> Result<W, FerriteError> {
        self.flush_shard().await?;
        self.inner
            .flush()
            .await
            .map_err(|e| FerriteError::Io(e.to_string()))?;
        Ok(self.inner)
    }
}

/// Streaming reader: reads `shard_size + HASH_SIZE`-byte frames, verifies
/// each against its trailing hash, and yields the verified shard bytes.
/// Returns `FileCorrupted` on the first mismatch.
pub struct BitrotReader<R> {
    inner: R,
    algorithm: BitrotAlgorithm,
    key: BitrotKey,
    shard_size: usize,
    bucket: String,
    object: String,
}

impl<R: AsyncRead + Unpin> BitrotReader<R> {
    pub fn new(
        inner: R,
        algorithm: BitrotAlgorithm,
        key: BitrotKey,
        shard_size: usize,
        bucket: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            algorithm,
            key,
            shard_size,
            bucket: bucket.into(),
            object: object.into(),
        }
    }

    /// Read and verify the next shard. Returns `None` at clean EOF (no
    /// bytes read at all); a partial frame is `UnexpectedEof`.
    pub async fn read_shard(&mut self) -> Result<Option<Bytes>, FerriteError> {
        let mut shard = vec![0u8; self.shard_size];
        let mut read_total = 0usize;
        loop {
            let n = self
                .inner
                .read(&mut shard[read_total..])
                .await
                .map_err(|e| FerriteError::Io(e.to_string()))?;
            if n == 0 {
                break;
            }
            read_total += n;
            if read_total == shard.len() {
                break;
            }
        }
        if read_total == 0 {
            return Ok(None);
        }
        if read_total != shard.len() {
            return Err(FerriteError::UnexpectedEof(format!(
                "{}/{}",
                self.bucket, self.object
            )));
        }

        let mut hash = vec![0u8; HASH_SIZE];
        self.inner
            .read_exact(&mut hash)
            .await
            .map_err(|_| FerriteError::UnexpectedEof(format!("{}/{}", self.bucket, self.object)))?;

        let expected = hash_shard(self.algorithm, self.key, &shard);
        if expected != hash {
            return Err(FerriteError::FileCorrupted {
                bucket: self.bucket.clone(),
                object: self.object.clone(),
            });
        }

        Ok(Some(Bytes::from(shard)))
    }

    /// Recover the underlying reader, e.g. to re-wrap it with a different
    /// `shard_size` for the next (possibly shorter) block.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Verify a sub-range of an already-written bitrot file without reading the
/// whole thing, by aligning to shard boundaries.
pub fn shard_index_for_offset(offset: u64, shard_size: u64) -> u64 {
    if shard_size == 0 { 0 } else { offset / shard_size }
}

pub fn shard_file_offset_for_index(shard_index: u64, shard_size: u64) -> u64 {
    shard_index * (shard_size + HASH_SIZE as u64)
}

/// Attach bitrot checksums already computed during a write to a `FileInfo`'s
/// erasure record (glue used by `ferrite-object`'s Put path).
pub fn record_checksum(file_info: &mut FileInfo, algorithm: BitrotAlgorithm, hash: Vec<u8>) {
    if let Some(erasure) = file_info.erasure.as_mut() {
        erasure
            .checksums
            .push(ferrite_common::filemeta::BitrotChecksum { algorithm, hash });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn write_then_read_round_trips_uncorrupted_shards() {
        let key = BitrotKey::derive(b"test-set");
        let shard_size = 8usize;
        let mut buf = Vec::new();
        {
            let mut writer =
                BitrotWriter::new(&mut buf, BitrotAlgorithm::HighwayHash256, key, shard_size);
            writer.write_all(b"helloworldfoo").await.unwrap();
            writer.finish().await.unwrap();
        }

        let mut reader = BitrotReader::new(
            Cursor::new(buf),
            BitrotAlgorithm::HighwayHash256,
            key,
            shard_size,
            "bucket",
            "object",
        );
        let mut out = Vec::new();
        while let Some(shard) = reader.read_shard().await.unwrap() {
            out.extend_from_slice(&shard);
        }
        assert_eq!(out, b"helloworldfoo");
    }

    #[tokio::test]
    async fn single_byte_corruption_is_detected() {
        let key = BitrotKey::derive(b"test-set");
        let shard_size = 4usize;
        let mut buf = Vec::new();
        {
            let mut writer =
                BitrotWriter::new(&mut buf, BitrotAlgorithm::Blake2b256, key, shard_size);
            writer.write_all(b"abcd").await.unwrap();
            writer.finish().await.unwrap();
        }
        buf[0] ^= 0xFF;

        let mut reader = BitrotReader::new(
            Cursor::new(buf),
            BitrotAlgorithm::Blake2b256,
            key,
            shard_size,
            "bucket",
            "object",
        );
        let err = reader.read_shard().await.unwrap_err();
        assert!(matches!(err, FerriteError::FileCorrupted { .. }));
    }

    #[test]
    fn shard_file_size_matches_contract() {
        assert_eq!(bitrot_shard_file_size(0, 4), 0);
        assert_eq!(bitrot_shard_file_size(1, 4), 4 + HASH_SIZE as u64);
        assert_eq!(bitrot_shard_file_size(9, 4), 3 * (4 + HASH_SIZE as u64));
    }
}
