//! Module containing the finalized, persistable table.

use super::bin::BinningModel;
use super::config::TableConfig;
use super::error::{Error, Result};
use super::filler::FillStats;
use super::nodes::BinGrids;
use super::tensor::CoefficientTensor;
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};

const FILE_VERSION: u64 = 1;
const LZ4_MAGIC: u32 = 0x18_4D_22_04;

/// Interpolation coefficients of a finalized table together with everything needed to evaluate
/// them: binning, node grids and configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Table {
    config: TableConfig,
    binning: BinningModel,
    grids: Vec<BinGrids>,
    tensor: CoefficientTensor,
    stats: FillStats,
    events: f64,
    metadata: BTreeMap<String, String>,
}

impl Table {
    pub(crate) const fn new(
        config: TableConfig,
        binning: BinningModel,
        grids: Vec<BinGrids>,
        tensor: CoefficientTensor,
        stats: FillStats,
        events: f64,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            config,
            binning,
            grids,
            tensor,
            stats,
            events,
            metadata,
        }
    }

    /// Return the configuration the table was created with.
    #[must_use]
    pub const fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Return the binning.
    #[must_use]
    pub const fn binning(&self) -> &BinningModel {
        &self.binning
    }

    /// Return the node grids of each bin.
    #[must_use]
    pub fn grids(&self) -> &[BinGrids] {
        &self.grids
    }

    /// Return the coefficients.
    #[must_use]
    pub const fn tensor(&self) -> &CoefficientTensor {
        &self.tensor
    }

    /// Return the filling statistics.
    #[must_use]
    pub const fn stats(&self) -> &FillStats {
        &self.stats
    }

    /// Return the number of events the coefficients are normalized to.
    #[must_use]
    pub const fn events(&self) -> f64 {
        self.events
    }

    /// Return the metadata.
    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Set the metadata `key` to `value`.
    pub fn set_key_value(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_owned(), value.to_owned());
    }

    /// Add `weight` times the coefficients of `other` to this table. Statistics and event numbers
    /// are added without weight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mismatch`] if the configurations, binnings or grids of both tables differ.
    pub fn merge(&mut self, other: &Self, weight: f64) -> Result<()> {
        if self.config != other.config {
            return Err(Error::Mismatch(
                "tables with different configurations can not be merged".to_owned(),
            ));
        }

        if self.binning != other.binning {
            return Err(Error::Mismatch(
                "tables with different binnings can not be merged".to_owned(),
            ));
        }

        if self.grids != other.grids {
            return Err(Error::Mismatch(
                "tables with different node grids can not be merged".to_owned(),
            ));
        }

        self.tensor.merge(&other.tensor, weight)?;
        self.stats.merge(&other.stats)?;
        self.events += other.events;

        Ok(())
    }

    /// Construct a `Table` by deserializing it from `reader`. Reading is buffered and
    /// LZ4-compressed streams are detected automatically.
    ///
    /// # Errors
    ///
    /// If reading from the compressed or uncompressed stream fails an error is returned.
    pub fn read(reader: impl Read) -> Result<Self> {
        let mut reader = BufReader::new(reader);
        let buffer = reader.fill_buf().map_err(|err| Error::Other(err.into()))?;

        let magic_bytes: [u8; 4] = buffer
            .get(0..4)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| Error::General("stream is too short to contain a table".to_owned()))?;

        if u32::from_le_bytes(magic_bytes) == LZ4_MAGIC {
            Self::read_uncompressed(BufReader::new(FrameDecoder::new(reader)))
        } else {
            Self::read_uncompressed(reader)
        }
    }

    fn read_uncompressed(mut reader: impl BufRead) -> Result<Self> {
        let magic_bytes: [u8; 16] = reader
            .fill_buf()
            .map_err(|err| Error::Other(err.into()))?
            .get(0..16)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| Error::General("stream is too short to contain a table".to_owned()))?;

        if &magic_bytes[0..8] != b"FastGrid" {
            return Err(Error::General("stream does not contain a table".to_owned()));
        }

        reader.consume(16);

        let file_version = u64::from_le_bytes(
            magic_bytes[8..16]
                .try_into()
                .unwrap_or_else(|_| unreachable!()),
        );

        match file_version {
            FILE_VERSION => {
                bincode::deserialize_from(reader).map_err(|err| Error::Other(err.into()))
            }
            _ => Err(Error::General(format!(
                "file version {file_version} is not supported"
            ))),
        }
    }

    /// Serializes `self` into `writer`. The table is serialized into memory first, so nothing is
    /// written if serialization fails.
    ///
    /// # Errors
    ///
    /// If serialization or writing fails an error is returned.
    pub fn write(&self, writer: impl Write) -> Result<()> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(b"FastGrid");
        buffer.extend_from_slice(&FILE_VERSION.to_le_bytes());

        bincode::serialize_into(&mut buffer, self).map_err(|err| Error::Other(err.into()))?;

        let mut writer = BufWriter::new(writer);
        writer
            .write_all(&buffer)
            .and_then(|()| writer.flush())
            .map_err(|err| Error::Other(err.into()))
    }

    /// Serializes `self` into `writer`, using LZ4 compression.
    ///
    /// # Errors
    ///
    /// If writing or compression fails an error is returned.
    pub fn write_lz4(&self, writer: impl Write) -> Result<()> {
        let mut encoder = FrameEncoder::new(writer);
        self.write(&mut encoder)?;
        encoder
            .try_finish()
            .map_err(|err| Error::Other(err.into()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_rejects_foreign_streams() {
        assert!(matches!(Table::read(&b"Fast"[..]), Err(Error::General(_))));
        assert!(matches!(
            Table::read(&b"NotAGrid\x01\0\0\0\0\0\0\0"[..]),
            Err(Error::General(_))
        ));

        let mut future = b"FastGrid".to_vec();
        future.extend_from_slice(&2_u64.to_le_bytes());
        future.extend_from_slice(&[0; 32]);

        match Table::read(future.as_slice()) {
            Err(Error::General(message)) => {
                assert_eq!(message, "file version 2 is not supported");
            }
            _ => panic!("unexpected result"),
        }
    }

    #[test]
    fn read_detects_truncated_lz4() {
        let mut encoder = FrameEncoder::new(Vec::new());
        encoder.write_all(b"Fast").unwrap();
        let compressed = encoder.finish().unwrap();

        assert!(Table::read(compressed.as_slice()).is_err());
    }
}
