//! LDR firmware container parsing.
//!
//! An LDR image is a sequence of 16-byte little-endian block headers
//! (`block_code, target_address, byte_count, argument`), each followed by
//! `byte_count` payload bytes unless the FILL flag is set. Blocks group
//! into DXEs: a new DXE opens at the first block and at every IGNORE
//! block, and a FINAL block ends the image.

use std::path::Path;

use bitflags::bitflags;
use thiserror::Error;

/// Size of one block header on disk.
pub const BLOCK_HEADER_LEN: usize = 16;

bitflags! {
    /// Block-code flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u32 {
        const SAFE = 0x0000_0010;
        const AUX = 0x0000_0020;
        const FILL = 0x0000_0100;
        const QUICKBOOT = 0x0000_0200;
        const CALLBACK = 0x0000_0400;
        const INIT = 0x0000_0800;
        const IGNORE = 0x0000_1000;
        const INDIRECT = 0x0000_2000;
        const FIRST = 0x0000_4000;
        const FINAL = 0x0000_8000;
    }
}

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("failed to read firmware: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated block header at offset {offset:#x}")]
    TruncatedHeader { offset: usize },

    #[error("truncated payload at offset {offset:#x}: need {need} bytes")]
    TruncatedPayload { offset: usize, need: u32 },
}

/// One load block.
#[derive(Debug, Clone)]
pub struct Block {
    pub block_code: u32,
    pub target_address: u32,
    pub byte_count: u32,
    pub argument: u32,
    /// Payload bytes; empty for FILL blocks.
    pub data: Vec<u8>,
    /// File offset of the header, for diagnostics.
    pub offset: usize,
}

impl Block {
    pub fn flags(&self) -> BlockFlags {
        BlockFlags::from_bits_truncate(self.block_code)
    }

    pub fn is_fill(&self) -> bool {
        self.flags().contains(BlockFlags::FILL)
    }

    pub fn is_first(&self) -> bool {
        self.flags().contains(BlockFlags::FIRST)
    }

    pub fn is_final(&self) -> bool {
        self.flags().contains(BlockFlags::FINAL)
    }

    pub fn is_init(&self) -> bool {
        self.flags().contains(BlockFlags::INIT)
    }
}

/// One linked executable inside the container.
#[derive(Debug, Default, Clone)]
pub struct Dxe {
    pub blocks: Vec<Block>,
}

/// A parsed firmware image.
#[derive(Debug, Default, Clone)]
pub struct LdrImage {
    pub dxes: Vec<Dxe>,
}

impl LdrImage {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoaderError> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, LoaderError> {
        let mut image = LdrImage::default();
        let mut cursor = 0usize;

        while cursor + BLOCK_HEADER_LEN <= bytes.len() {
            let word = |i: usize| {
                u32::from_le_bytes(bytes[cursor + i * 4..cursor + i * 4 + 4].try_into().unwrap())
            };
            let block_code = word(0);
            let target_address = word(1);
            let byte_count = word(2);
            let argument = word(3);
            let flags = BlockFlags::from_bits_truncate(block_code);
            let header_offset = cursor;
            cursor += BLOCK_HEADER_LEN;

            let data = if !flags.contains(BlockFlags::FILL) && byte_count > 0 {
                let end = cursor + byte_count as usize;
                if end > bytes.len() {
                    return Err(LoaderError::TruncatedPayload {
                        offset: cursor,
                        need: byte_count,
                    });
                }
                let payload = bytes[cursor..end].to_vec();
                cursor = end;
                payload
            } else {
                Vec::new()
            };

            if image.dxes.is_empty() || flags.contains(BlockFlags::IGNORE) {
                image.dxes.push(Dxe::default());
            }
            let done = flags.contains(BlockFlags::FINAL);
            image.dxes.last_mut().unwrap().blocks.push(Block {
                block_code,
                target_address,
                byte_count,
                argument,
                data,
                offset: header_offset,
            });
            if done {
                return Ok(image);
            }
        }

        if cursor < bytes.len() {
            return Err(LoaderError::TruncatedHeader { offset: cursor });
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(code: u32, target: u32, count: u32, arg: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        for word in [code, target, count, arg] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn parses_blocks_and_payloads() {
        let mut image = header(BlockFlags::FIRST.bits(), 0xFFA0_0000, 4, 0);
        image.extend_from_slice(&[1, 2, 3, 4]);
        image.extend(header(BlockFlags::FINAL.bits(), 0x0000_1000, 2, 0));
        image.extend_from_slice(&[9, 8]);

        let parsed = LdrImage::parse(&image).unwrap();
        assert_eq!(parsed.dxes.len(), 1);
        let blocks = &parsed.dxes[0].blocks;
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].is_first());
        assert_eq!(blocks[0].data, vec![1, 2, 3, 4]);
        assert!(blocks[1].is_final());
        assert_eq!(blocks[1].target_address, 0x1000);
    }

    #[test]
    fn fill_blocks_carry_no_payload() {
        let mut image = header(BlockFlags::FILL.bits(), 0x2000, 64, 0xDEAD_BEEF);
        image.extend(header(BlockFlags::FINAL.bits(), 0x3000, 0, 0));
        let parsed = LdrImage::parse(&image).unwrap();
        let block = &parsed.dxes[0].blocks[0];
        assert!(block.is_fill());
        assert!(block.data.is_empty());
        assert_eq!(block.byte_count, 64);
        assert_eq!(block.argument, 0xDEAD_BEEF);
    }

    #[test]
    fn ignore_blocks_open_a_new_dxe() {
        let mut image = header(BlockFlags::FIRST.bits(), 0, 0, 0);
        image.extend(header(BlockFlags::IGNORE.bits(), 0, 0, 0));
        image.extend(header(BlockFlags::FINAL.bits(), 0, 0, 0));
        let parsed = LdrImage::parse(&image).unwrap();
        assert_eq!(parsed.dxes.len(), 2);
        assert_eq!(parsed.dxes[0].blocks.len(), 1);
        assert_eq!(parsed.dxes[1].blocks.len(), 2);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut image = header(0, 0, 100, 0);
        image.extend_from_slice(&[0; 10]);
        assert!(matches!(
            LdrImage::parse(&image),
            Err(LoaderError::TruncatedPayload { .. })
        ));
    }

    #[test]
    fn parsing_stops_at_the_final_block() {
        let mut image = header(BlockFlags::FINAL.bits(), 0, 0, 0);
        image.extend_from_slice(&[0xEE; 7]); // trailing garbage is ignored
        let parsed = LdrImage::parse(&image).unwrap();
        assert_eq!(parsed.dxes.len(), 1);
    }
}
