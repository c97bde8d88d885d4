//! Byte-stream builders for the ingest path.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use warehouse_media::mjpeg::encode_part;

/// Concatenate JPEGs into a `multipart/x-mixed-replace` body.
pub fn mjpeg_stream(jpegs: &[Vec<u8>]) -> Vec<u8> {
    jpegs.iter().flat_map(|jpeg| encode_part(jpeg)).collect()
}

/// Fixed-size chunks (the last one may be shorter).
pub fn split_every(data: &[u8], size: usize) -> Vec<Bytes> {
    data.chunks(size.max(1))
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Chunks of random length in `1..=max_chunk`, reproducible for a given seed.
pub fn split_random(data: &[u8], seed: u64, max_chunk: usize) -> Vec<Bytes> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let n = rng.gen_range(1..=max_chunk.max(1)).min(rest.len());
        let (head, tail) = rest.split_at(n);
        out.push(Bytes::copy_from_slice(head));
        rest = tail;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_preserve_bytes() {
        let data: Vec<u8> = (0..=255).collect();
        for chunks in [split_every(&data, 7), split_random(&data, 42, 13)] {
            let joined: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
            assert_eq!(joined, data);
        }
        assert_eq!(split_random(&data, 1, 9), split_random(&data, 1, 9));
    }
}
