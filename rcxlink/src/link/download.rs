//! Chunked downloads and the program download sequence.
//!
//! A body goes out as a train of sequenced download frames: sequences
//! 1, 2, ... for the interior, and sequence 0 marking the final frame.
//! That zero is the only end-of-transfer signal the protocol has. Each
//! prospective frame is run through the shaper first, so a frame may be
//! shorter than the nominal chunk size.

use super::{
    Link, SPYBOTICS_CHUNK, SPYBOTICS_SMALL_CHUNK, SPYBOTICS_START,
};
use crate::cmd::{sum16, Cmd};
use crate::error::{Error, Result};
use crate::image::{ChunkKind, Image};
use crate::target::Target;
use crate::transport::Transport;
use log::{debug, info};

impl<T: Transport> Link<T> {
    /// Send one body as a train of sequenced download frames.
    pub(crate) fn download_stream<F>(
        &mut self,
        data: &[u8],
        chunk: usize,
        progress: &mut F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize, usize) -> bool,
    {
        debug!("downloading {} bytes in {chunk}-byte chunks", data.len());

        let mut seq: u16 = 1;
        let mut offset = 0;

        while offset < data.len() {
            let remain = data.len() - offset;
            let mut n = if remain <= chunk {
                // Interactive use always marks the final frame; only a
                // quiet non-program transfer leaves it unmarked.
                if !self.quiet || self.program_mode {
                    seq = 0;
                }
                remain
            } else {
                chunk
            };

            n = self
                .shaper
                .adjust(n, &data[offset..], self.transport.complement_data());

            let wait = self.download_wait;
            self.send_with(&Cmd::download(seq, &data[offset..offset + n]), true, wait)?;
            seq = seq.wrapping_add(1);
            offset += n;

            if !self.increment_progress(n, progress) {
                return Err(Error::Abort);
            }
        }

        Ok(())
    }

    /// Download a program image into a program slot.
    ///
    /// The progress callback sees `(so_far, total, delta)` between frames
    /// and stops the transfer by returning false; the target is then left
    /// in an undefined program state until the caller re-syncs.
    pub fn download_program<F>(
        &mut self,
        image: &Image,
        program_number: u8,
        progress: &mut F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize, usize) -> bool,
    {
        info!(
            "downloading program of {} chunks ({} bytes) to {}",
            image.chunk_count(),
            image.size(),
            self.target()
        );

        self.sync()?;
        self.send(&Cmd::stop_all())?;

        if self.target == Target::Spybotics {
            self.download_spybotics(image, progress)?;
        } else {
            self.program_mode = true;
            let result = self.download_image(image, program_number, progress);
            self.program_mode = false;
            result?;
        }

        if !self.quiet {
            // Signal completion audibly; losing the sound is no error.
            let _ = self.send(&Cmd::play_sound(5));
        }

        info!("program download complete");
        Ok(())
    }

    /// Spybotics path: one linked body sent like a firmware image.
    fn download_spybotics<F>(&mut self, image: &Image, progress: &mut F) -> Result<()>
    where
        F: FnMut(usize, usize, usize) -> bool,
    {
        let body = image.link_contiguous();
        let check = sum16(&body);

        self.send(&Cmd::begin_firmware(SPYBOTICS_START, check))?;

        self.begin_progress(body.len());
        let chunk = if self.usb {
            SPYBOTICS_SMALL_CHUNK
        } else {
            SPYBOTICS_CHUNK
        };
        self.download_stream(&body, chunk, progress)
    }

    /// Per-chunk path for the interpreter targets.
    fn download_image<F>(
        &mut self,
        image: &Image,
        program_number: u8,
        progress: &mut F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize, usize) -> bool,
    {
        if program_number > 0 {
            self.send(&Cmd::select_program(program_number - 1))?;
        }

        self.send(&Cmd::delete_tasks())?;
        self.send(&Cmd::delete_subs())?;

        let total = image.size();
        for (i, chunk) in image.chunks().enumerate() {
            let first = (i == 0).then_some(total);
            self.download_chunk(chunk.kind, chunk.number, &chunk.data, first, progress)?;
        }

        Ok(())
    }

    /// Download one task or subroutine chunk.
    ///
    /// `total`, when present, primes the progress counters; pass it on the
    /// first chunk of an image and `None` afterwards so the counters run
    /// across the whole image. `Some(0)` means "just this chunk".
    pub fn download_chunk<F>(
        &mut self,
        kind: ChunkKind,
        number: u8,
        data: &[u8],
        total: Option<usize>,
        progress: &mut F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize, usize) -> bool,
    {
        self.sync()?;

        let n = self.send(&Cmd::begin(kind, number, data.len() as u16))?;
        if n != 1 || self.reply_byte(0) != 0 {
            return Err(Error::MemFull);
        }

        if let Some(total) = total {
            let total = if total == 0 { data.len() } else { total };
            self.begin_progress(total);
        }

        let chunk = self.program_chunk;
        self.download_stream(data, chunk, progress)
    }
}
