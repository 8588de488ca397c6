//! Program image model.
//!
//! An [`Image`] is an ordered list of named chunks, each carrying a type
//! tag, a slot number, and its byte payload. The compiler/linker that
//! produces images is a separate concern; the link layer only iterates
//! chunks and queries the total size.
//!
//! For Spybotics the chunks are not downloaded individually: the image is
//! first linked into one contiguous blob and sent as a single body.

use crate::opcode;

/// Chunk type tag, selecting the begin-download opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// An executable task.
    Task,
    /// A subroutine.
    Sub,
}

impl ChunkKind {
    /// Opcode of the begin-download command for this chunk type.
    #[must_use]
    pub fn begin_opcode(self) -> u8 {
        match self {
            Self::Task => opcode::BEGIN_TASK,
            Self::Sub => opcode::BEGIN_SUB,
        }
    }
}

/// One downloadable chunk of a program image.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk type tag.
    pub kind: ChunkKind,
    /// Slot number within its type (task number, sub number).
    pub number: u8,
    /// Chunk byte payload.
    pub data: Vec<u8>,
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(kind: ChunkKind, number: u8, data: Vec<u8>) -> Self {
        Self { kind, number, data }
    }
}

/// An ordered collection of chunks forming one program.
#[derive(Debug, Clone, Default)]
pub struct Image {
    chunks: Vec<Chunk>,
}

impl Image {
    /// Create an empty image.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk.
    pub fn push(&mut self, chunk: Chunk) {
        self.chunks.push(chunk);
    }

    /// Iterate the chunks in download order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    /// Number of chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total payload size across all chunks.
    #[must_use]
    pub fn size(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }

    /// Link the image into the single contiguous body Spybotics expects.
    #[must_use]
    pub fn link_contiguous(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.data);
        }
        out
    }
}
