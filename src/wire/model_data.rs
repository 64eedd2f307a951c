//! Wire payload carried by `data` packets: a fixed-width parameter vector
//! plus the list of node prefixes that observed local congestion on the
//! way up.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Failure modes when decoding a [`ModelData`] payload.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("buffer holds {available} bytes, expected {expected} for {expected_p} float32 parameters")]
    TruncatedParameters { expected: usize, available: usize, expected_p: usize },

    #[error("buffer ended mid string-length header")]
    TruncatedStringHeader,

    #[error("string header claims {claimed} bytes but only {available} remain")]
    TruncatedStringBody { claimed: usize, available: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// `{ parameters, congested_nodes }` as defined by the aggregation payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelData {
    pub parameters: Vec<f32>,
    pub congested_nodes: Vec<String>,
}

impl ModelData {
    pub fn zeros(p: usize) -> Self {
        Self {
            parameters: vec![0.0; p],
            congested_nodes: Vec::new(),
        }
    }

    /// Elementwise `self += other`. Panics if lengths differ, mirroring the
    /// fixed-width-per-node invariant that callers must already uphold.
    pub fn accumulate(&mut self, other: &ModelData) {
        assert_eq!(
            self.parameters.len(),
            other.parameters.len(),
            "accumulate called with mismatched parameter widths"
        );
        for (a, b) in self.parameters.iter_mut().zip(other.parameters.iter()) {
            *a += b;
        }
        self.congested_nodes
            .extend(other.congested_nodes.iter().cloned());
    }

    pub fn mean(&self, producer_count: usize) -> Vec<f32> {
        let n = producer_count as f32;
        self.parameters.iter().map(|v| v / n).collect()
    }

    /// Raw little-endian float32 bytes, then length-prefixed UTF-8 strings.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            self.parameters.len() * 4
                + self
                    .congested_nodes
                    .iter()
                    .map(|s| 4 + s.len())
                    .sum::<usize>(),
        );
        for p in &self.parameters {
            buf.put_f32_le(*p);
        }
        for node in &self.congested_nodes {
            buf.put_u32_le(node.len() as u32);
            buf.put_slice(node.as_bytes());
        }
        buf.freeze()
    }

    /// Decode `bytes` assuming `expected_p` float32 parameters; everything
    /// after that is a run of length-prefixed strings.
    pub fn deserialize(mut bytes: Bytes, expected_p: usize) -> Result<Self> {
        let expected = expected_p * 4;
        if bytes.len() < expected {
            return Err(Error::TruncatedParameters {
                expected,
                available: bytes.len(),
                expected_p,
            });
        }

        let mut parameters = Vec::with_capacity(expected_p);
        for _ in 0..expected_p {
            parameters.push(bytes.get_f32_le());
        }

        let mut congested_nodes = Vec::new();
        while bytes.has_remaining() {
            if bytes.remaining() < 4 {
                return Err(Error::TruncatedStringHeader);
            }
            let len = bytes.get_u32_le() as usize;
            if bytes.remaining() < len {
                return Err(Error::TruncatedStringBody {
                    claimed: len,
                    available: bytes.remaining(),
                });
            }
            let raw = bytes.copy_to_bytes(len);
            let s = String::from_utf8_lossy(&raw).into_owned();
            congested_nodes.push(s);
        }

        Ok(Self {
            parameters,
            congested_nodes,
        })
    }
}
