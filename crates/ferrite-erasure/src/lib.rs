//! Reed-Solomon erasure codec. The per-block `encode_block`/
//! `decode_block` primitives wrap `reed_solomon_simd` directly; this crate
//! adds the streaming writer/reader-array API and the pure coordinate
//! arithmetic (`shard_file_size`, `shard_file_offset`) plus the `prefer[]`
//! tie-break for reconstruction source selection.

use ferrite_common::error::FerriteError;
use reed_solomon_simd::{ReedSolomonDecoder, ReedSolomonEncoder};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

type Result<T> = std::result::Result<T, FerriteError>;

pub const DEFAULT_DATA_SHARDS: usize = 4;
pub const DEFAULT_PARITY_SHARDS: usize = 2;
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErasureConfig {
    pub data_shards: usize,
    pub parity_shards: usize,
    pub block_size: usize,
}

impl Default for ErasureConfig {
    fn default() -> Self {
        Self {
            data_shards: DEFAULT_DATA_SHARDS,
            parity_shards: DEFAULT_PARITY_SHARDS,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl ErasureConfig {
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    pub fn shard_size(&self) -> Result<usize> {
        validate_config(self)?;
        let mut shard_size = self.block_size.div_ceil(self.data_shards);
        if shard_size % 2 != 0 {
            shard_size += 1;
        }
        Ok(shard_size)
    }

    /// Shard size for an arbitrary block length (the final block of an
    /// object is usually shorter than `block_size`).
    pub fn shard_size_for(&self, block_len: usize) -> Result<usize> {
        validate_config(self)?;
        let mut shard_size = block_len.div_ceil(self.data_shards).max(1);
        if shard_size % 2 != 0 {
            shard_size += 1;
        }
        Ok(shard_size)
    }

    /// Total per-drive shard-file size for an object of `object_size` bytes
    /// striped with this config. Computed by summing the per-block shard
    /// size across all full blocks plus the trailing partial block
    /// (zero-byte objects yield zero).
    pub fn shard_file_size(&self, object_size: u64) -> Result<u64> {
        validate_config(self)?;
        if object_size == 0 {
            return Ok(0);
        }
        let block_size = self.block_size as u64;
        let full_blocks = object_size / block_size;
        let remainder = object_size % block_size;
        let mut total = full_blocks * self.shard_size()? as u64;
        if remainder > 0 {
            total += self.shard_size_for(remainder as usize)? as u64;
        }
        Ok(total)
    }

    /// Map an object-relative `(offset, length)` read request, given the
    /// object's total size, to the `(shard_start, shard_length)` byte range
    /// that must be read from each participating drive's shard file.
    pub fn shard_file_offset(&self, offset: u64, length: u64, object_size: u64) -> Result<(u64, u64)> {
        validate_config(self)?;
        if offset > object_size || offset + length > object_size {
            return Err(FerriteError::InvalidRange {
                offset: offset as i64,
                length: length as i64,
                size: object_size as i64,
            });
        }
        let block_size = self.block_size as u64;
        let shard_size = self.shard_size()? as u64;
        let start_block = offset / block_size;
        let end_block = (offset + length).div_ceil(block_size).max(start_block + 1);
        let shard_start = start_block * shard_size;
        let shard_length = (end_block - start_block) * shard_size;
        Ok((shard_start, shard_length))
    }
}

pub fn encode_block(data: &[u8], config: &ErasureConfig) -> Result<Vec<Vec<u8>>> {
    validate_config(config)?;

    if data.len() > config.block_size {
        return Err(FerriteError::InvalidArgument(format!(
            "block size {} exceeds configured block_size {}",
            data.len(),
            config.block_size
        )));
    }

    let shard_size = config.shard_size_for(data.len())?;
    let data_payload_size = shard_size * config.data_shards;
    let mut payload = vec![0_u8; data_payload_size];
    payload[..data.len()].copy_from_slice(data);

    let mut encoder = ReedSolomonEncoder::new(config.data_shards, config.parity_shards, shard_size)
        .map_err(map_reed_solomon_error)?;

    let mut shards = Vec::with_capacity(config.total_shards());
    for shard_idx in 0..config.data_shards {
        let start = shard_idx * shard_size;
        let end = start + shard_size;
        let shard = &payload[start..end];
        encoder
            .add_original_shard(shard)
            .map_err(map_reed_solomon_error)?;
        shards.push(shard.to_vec());
    }

    let encoded = encoder.encode().map_err(map_reed_solomon_error)?;
    for recovery in encoded.recovery_iter() {
        shards.push(recovery.to_vec());
    }

    Ok(shards)
}

pub fn decode_block(shards: Vec<Option<Vec<u8>>>, config: &ErasureConfig) -> Result<Vec<u8>> {
    validate_config(config)?;

    if shards.len() != config.total_shards() {
        return Err(FerriteError::InvalidArgument(format!(
            "invalid shard count: expected {}, got {}",
            config.total_shards(),
            shards.len()
        )));
    }

    let shard_size = shards
        .iter()
        .flatten()
        .map(|s| s.len())
        .next()
        .ok_or_else(|| FerriteError::InvalidArgument("no shards available to decode".into()))?;

    let available_shards = shards.iter().filter(|shard| shard.is_some()).count();
    if available_shards < config.data_shards {
        return Err(FerriteError::InvalidArgument(format!(
            "insufficient shards: need at least {}, got {}",
            config.data_shards, available_shards
        )));
    }

    let mut decoder = ReedSolomonDecoder::new(config.data_shards, config.parity_shards, shard_size)
        .map_err(map_reed_solomon_error)?;

    for (idx, shard) in shards.iter().take(config.data_shards).enumerate() {
        if let Some(bytes) = shard {
            validate_shard_size(idx, bytes, shard_size)?;
            decoder
                .add_original_shard(idx, bytes)
                .map_err(map_reed_solomon_error)?;
        }
    }

    for (parity_idx, shard) in shards.iter().skip(config.data_shards).enumerate() {
        if let Some(bytes) = shard {
            validate_shard_size(config.data_shards + parity_idx, bytes, shard_size)?;
            decoder
                .add_recovery_shard(parity_idx, bytes)
                .map_err(map_reed_solomon_error)?;
        }
    }

    let decoded = decoder.decode().map_err(map_reed_solomon_error)?;
    let mut originals = vec![vec![0_u8; shard_size]; config.data_shards];
    let mut restored = vec![false; config.data_shards];

    for (idx, shard) in shards.iter().take(config.data_shards).enumerate() {
        if let Some(bytes) = shard {
            originals[idx].copy_from_slice(bytes);
            restored[idx] = true;
        }
    }

    for (idx, bytes) in decoded.restored_original_iter() {
        if idx < config.data_shards {
            originals[idx] = bytes.to_vec();
            restored[idx] = true;
        }
    }

    if restored.iter().any(|value| !value) {
        return Err(FerriteError::Internal(
            "decoder did not restore all original shards".to_string(),
        ));
    }

    let mut block = Vec::with_capacity(config.data_shards * shard_size);
    for shard in originals {
        block.extend_from_slice(&shard);
    }

    Ok(block)
}

/// Select which readers to use for reconstruction: any `data_shards`
/// non-`None` entries, preferring indices marked `prefer[i] = true` (local
/// drives), ties broken by original index.
pub fn select_sources(available: &[bool], prefer: &[bool], data_shards: usize) -> Vec<usize> {
    let mut candidates: Vec<usize> = (0..available.len()).filter(|&i| available[i]).collect();
    candidates.sort_by_key(|&i| (!prefer.get(i).copied().unwrap_or(false), i));
    candidates.truncate(data_shards.max(candidates.len().min(data_shards)));
    candidates.into_iter().take(data_shards).collect()
}

/// Stream-encode `input` in `block_size`-sized blocks, writing shard `i` of
/// each block to `writers[i]`. Returns the number of input bytes processed,
/// or `WriteQuorum` if fewer than `write_quorum` writers accepted a block.
pub async fn encode<R, W>(
    mut input: R,
    writers: &mut [W],
    config: &ErasureConfig,
    write_quorum: usize,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if writers.len() != config.total_shards() {
        return Err(FerriteError::InvalidArgument(format!(
            "expected {} writers, got {}",
            config.total_shards(),
            writers.len()
        )));
    }

    let mut buf = vec![0u8; config.block_size];
    let mut bytes_processed: u64 = 0;

    loop {
        let mut filled = 0;
        while filled < buf.len() {
            let n = input
                .read(&mut buf[filled..])
                .await
                .map_err(|e| FerriteError::Io(e.to_string()))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }

        let shards = encode_block(&buf[..filled], config)?;
        let mut successes = 0usize;
        for (writer, shard) in writers.iter_mut().zip(shards.iter()) {
            if writer.write_all(shard).await.is_ok() {
                successes += 1;
            }
        }
        if successes < write_quorum {
            return Err(FerriteError::WriteQuorum {
                bucket: String::new(),
                object: String::new(),
                have: successes,
                need: write_quorum,
            });
        }

        bytes_processed += filled as u64;
        if filled < buf.len() {
            break;
        }
    }

    for writer in writers.iter_mut() {
        let _ = writer.flush().await;
    }

    Ok(bytes_processed)
}

/// Reconstruct `length` bytes starting at object-relative `offset` from any
/// `data_shards` non-`None` readers, writing the result to `output`.
pub async fn decode<R, W>(
    mut output: W,
    readers: &mut [Option<R>],
    offset: u64,
    length: u64,
    object_size: u64,
    prefer: &[bool],
    config: &ErasureConfig,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if readers.len() != config.total_shards() {
        return Err(FerriteError::InvalidArgument(format!(
            "expected {} readers, got {}",
            config.total_shards(),
            readers.len()
        )));
    }
    if offset > object_size || offset + length > object_size {
        return Err(FerriteError::InvalidRange {
            offset: offset as i64,
            length: length as i64,
            size: object_size as i64,
        });
    }

    let available: Vec<bool> = readers.iter().map(|r| r.is_some()).collect();
    let sources = select_sources(&available, prefer, config.data_shards);
    if sources.len() < config.data_shards {
        return Err(FerriteError::ReadQuorum {
            bucket: String::new(),
            object: String::new(),
            have: sources.len(),
            need: config.data_shards,
        });
    }

    let block_size = config.block_size as u64;
    let start_block = offset / block_size;
    let end_block = (offset + length).div_ceil(block_size).max(start_block + 1);

    let mut written: u64 = 0;
    let mut cursor = start_block * block_size;

    for block_idx in start_block..end_block {
        let block_len = block_size.min(object_size - block_idx * block_size) as usize;
        let shard_size = config.shard_size_for(block_len)?;

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; config.total_shards()];
        for &idx in &sources {
            if let Some(reader) = readers[idx].as_mut() {
                let mut shard = vec![0u8; shard_size];
                reader
                    .read_exact(&mut shard)
                    .await
                    .map_err(|e| FerriteError::Io(e.to_string()))?;
                shards[idx] = Some(shard);
            }
        }

        let block = decode_block(shards, config)?;
        let block = &block[..block_len];

        let block_start_object_offset = cursor;
        let want_start = offset.max(block_start_object_offset) - block_start_object_offset;
        let want_end =
            (offset + length).min(block_start_object_offset + block_len as u64) - block_start_object_offset;
        let slice = &block[want_start as usize..want_end as usize];

        output
            .write_all(slice)
            .await
            .map_err(|e| FerriteError::Io(e.to_string()))?;
        written += slice.len() as u64;
        cursor += block_len as u64;
    }

    output.flush().await.map_err(|e| FerriteError::Io(e.to_string()))?;
    Ok(written)
}

fn validate_config(config: &ErasureConfig) -> Result<()> {
    if config.data_shards == 0 {
        return Err(FerriteError::InvalidArgument(
            "data_shards must be greater than zero".to_string(),
        ));
    }
    if config.parity_shards == 0 {
        return Err(FerriteError::InvalidArgument(
            "parity_shards must be greater than zero".to_string(),
        ));
    }
    if config.block_size == 0 {
        return Err(FerriteError::InvalidArgument(
            "block_size must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_shard_size(shard_index: usize, shard: &[u8], expected_size: usize) -> Result<()> {
    if shard.len() != expected_size {
        return Err(FerriteError::InvalidArgument(format!(
            "invalid shard size for shard {}: expected {}, got {}",
            shard_index,
            expected_size,
            shard.len()
        )));
    }
    Ok(())
}

fn map_reed_solomon_error(error: reed_solomon_simd::Error) -> FerriteError {
    FerriteError::Internal(format!("reed-solomon error: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_block_round_trips() {
        let config = ErasureConfig {
            data_shards: 4,
            parity_shards: 2,
            block_size: 16,
        };
        let data = b"0123456789abcdef";
        let shards = encode_block(data, &config).unwrap();
        assert_eq!(shards.len(), 6);

        let mut inputs: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        inputs[0] = None;
        inputs[3] = None;

        let decoded = decode_block(inputs, &config).unwrap();
        assert_eq!(&decoded[..data.len()], data);
    }

    #[test]
    fn select_sources_prefers_local_then_index() {
        let available = vec![true, true, true, true];
        let prefer = vec![false, true, false, true];
        let sources = select_sources(&available, &prefer, 2);
        assert_eq!(sources, vec![1, 3]);
    }

    #[test]
    fn shard_file_size_is_zero_for_empty_object() {
        let config = ErasureConfig::default();
        assert_eq!(config.shard_file_size(0).unwrap(), 0);
    }
}
