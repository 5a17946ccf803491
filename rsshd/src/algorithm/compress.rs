use flate2::{FlushCompress, FlushDecompress, Status};
use strum::{AsRefStr, EnumString};

use super::{Catalog, Negociate};
use crate::{
    error::NegotiationError,
    packet::{trans::KexInit, NameList},
    side::{client::Client, server::Server},
    Error, Result,
};

impl Negociate<Client> for Compress {
    const ERR: NegotiationError = NegotiationError::Compression;

    fn field(kex: &KexInit) -> &NameList {
        &kex.compression_algorithms_client_to_server
    }
}

impl Negociate<Server> for Compress {
    const ERR: NegotiationError = NegotiationError::Compression;

    fn field(kex: &KexInit) -> &NameList {
        &kex.compression_algorithms_server_to_client
    }
}

/// SSH compression algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Compress {
    /// No compression algorithm.
    #[default]
    None,

    /// zlib compression, delayed until the user is authenticated (OpenSSH mode).
    #[strum(serialize = "zlib@openssh.com")]
    ZlibOpenssh,

    /// zlib compression.
    Zlib,
}

impl Catalog for Compress {
    fn all() -> Vec<Self> {
        vec![Self::None, Self::ZlibOpenssh, Self::Zlib]
    }

    fn is_legacy(&self) -> bool {
        false
    }
}

impl Compress {
    /// Whether compression only starts once the user is authenticated.
    pub(crate) fn is_delayed(&self) -> bool {
        matches!(self, Self::ZlibOpenssh)
    }
}

/// A continuous zlib stream for one direction of the transport.
#[derive(Default)]
pub(crate) struct CompressState {
    deflate: Option<flate2::Compress>,
    inflate: Option<flate2::Decompress>,
}

impl std::fmt::Debug for CompressState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressState")
            .field("deflate", &self.deflate.is_some())
            .field("inflate", &self.inflate.is_some())
            .finish()
    }
}

impl CompressState {
    pub(crate) fn compress(&mut self, buf: &[u8]) -> Result<Vec<u8>> {
        let deflate = self
            .deflate
            .get_or_insert_with(|| flate2::Compress::new(flate2::Compression::default(), true));

        let mut output = Vec::with_capacity(buf.len() + 64);
        let mut consumed = 0;

        loop {
            let before = deflate.total_in();
            deflate
                .compress_vec(&buf[consumed..], &mut output, FlushCompress::Partial)
                .map_err(|_| Error::Compression)?;
            consumed += (deflate.total_in() - before) as usize;

            if consumed == buf.len() && output.len() < output.capacity() {
                break;
            }

            output.reserve(output.capacity().max(64));
        }

        Ok(output)
    }

    /// Decompress the `buf`, failing if the output would exceed `max` bytes.
    pub(crate) fn decompress(&mut self, buf: &[u8], max: usize) -> Result<Vec<u8>> {
        let inflate = self
            .inflate
            .get_or_insert_with(|| flate2::Decompress::new(true));

        let mut output = Vec::with_capacity(buf.len() * 2 + 64);
        let mut consumed = 0;

        loop {
            let before = inflate.total_in();
            let status = inflate
                .decompress_vec(&buf[consumed..], &mut output, FlushDecompress::Sync)
                .map_err(|_| Error::Compression)?;
            consumed += (inflate.total_in() - before) as usize;

            if output.len() > max {
                return Err(Error::Compression);
            }
            if status == Status::StreamEnd
                || (consumed == buf.len() && output.len() < output.capacity())
            {
                break;
            }

            output.reserve(output.capacity().max(64));
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_spans_multiple_packets() {
        let mut tx = CompressState::default();
        let mut rx = CompressState::default();

        for message in [&b"first packet payload"[..], &[0u8; 4096], b"third"] {
            let compressed = tx.compress(message).unwrap();
            let decompressed = rx.decompress(&compressed, 1 << 16).unwrap();

            assert_eq!(decompressed, message);
        }
    }

    #[test]
    fn decompression_bomb_is_rejected() {
        let mut tx = CompressState::default();
        let compressed = tx.compress(&[0u8; 1 << 16]).unwrap();

        assert!(CompressState::default()
            .decompress(&compressed, 1024)
            .is_err());
    }

    #[test]
    fn delayed_variant() {
        assert!("zlib@openssh.com".parse::<Compress>().unwrap().is_delayed());
        assert!(!Compress::Zlib.is_delayed());
    }
}
