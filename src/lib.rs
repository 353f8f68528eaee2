//! Command-stream encoder for AMD UVD/VCN fixed-function video encode.
//!
//! Turns per-frame picture descriptions into the versioned binary command
//! buffers the encode firmware consumes: length-prefixed parameter packets,
//! bit-exact HEVC parameter-set NAL units and a slice-header template. GPU
//! memory and submission stay behind the [`Winsys`] trait; this crate only
//! produces dwords and buffer references.

mod bitwriter;
mod cmdstream;
mod contract;
pub mod fw;
mod hevc_1_1;
mod session;

use log::{debug, warn};

pub use crate::contract::{
    BitstreamBuffer, BufferAccess, BufferDomain, Codec, CropRect, DeblockingConfig, EncodeError,
    FeedbackHandle, FirmwareVersion, GpuBuffer, GpuGeneration, Level, PictureDesc, PictureHandle,
    PictureType, Plane, PlaneView, Profile, QualityPreset, RateControl, RateControlMethod,
    SessionConfig, SliceConfig, Tier, VuiInfo, Winsys,
};
pub use crate::session::{SessionGeometry, SurfaceMode};

use crate::bitwriter::BitWriter;
use crate::cmdstream::CmdStream;
use crate::hevc_1_1::Hevc11;
use crate::session::{
    EncodeContext, EncodePipeline, EncoderSession, FrameBuffers, SessionState,
};

fn select_pipeline(config: &SessionConfig) -> Result<Box<dyn EncodePipeline>, EncodeError> {
    if config.firmware.major != fw::FW_INTERFACE_MAJOR
        || config.firmware.minor < fw::FW_INTERFACE_MINOR
    {
        return Err(EncodeError::UnsupportedInterface(config.firmware));
    }
    match config.codec {
        Codec::Hevc => Ok(Box::new(Hevc11)),
        Codec::H264 => Err(EncodeError::UnsupportedCodec(config.codec)),
    }
}

/// One hardware encode session.
///
/// All calls come from a single thread in lifecycle order: `begin_frame`,
/// then `encode_bitstream`, then `end_frame` to submit, with `get_feedback`
/// redeeming each frame's handle once. Dropping the encoder closes the
/// session with the hardware.
pub struct Encoder {
    pipeline: Box<dyn EncodePipeline>,
    ctx: EncodeContext,
}

impl Encoder {
    pub fn new(config: SessionConfig, winsys: Box<dyn Winsys>) -> Result<Self, EncodeError> {
        let pipeline = select_pipeline(&config)?;
        let session = EncoderSession::new(config)?;
        debug!("created encode session: {}", session.config);
        Ok(Self {
            pipeline,
            ctx: EncodeContext {
                session,
                cs: CmdStream::new(),
                bw: BitWriter::new(),
                winsys,
            },
        })
    }

    pub fn geometry(&self) -> SessionGeometry {
        self.ctx.session.geometry
    }

    /// Derives fresh per-picture state and, on the first call of the
    /// session, allocates the session buffers and submits the one-time
    /// session-setup task.
    pub fn begin_frame(&mut self, desc: &PictureDesc) -> Result<(), EncodeError> {
        if self.ctx.session.state == SessionState::Closed {
            return Err(EncodeError::SessionClosed);
        }
        if self.ctx.session.buffers.is_some() {
            return Ok(());
        }

        let pic = self.ctx.session.derive_picture_state(desc);
        self.ctx.allocate_session_buffers()?;
        self.ctx.cs.clear();
        if let Err(err) = self.pipeline.begin(&mut self.ctx, &pic) {
            self.ctx.release_session_buffers();
            return Err(err);
        }
        let result = self.ctx.winsys.submit(self.ctx.cs.dwords());
        self.ctx.cs.clear();
        if let Err(err) = result {
            self.ctx.release_session_buffers();
            return Err(err);
        }
        self.ctx.session.state = SessionState::Active;
        debug!("encode session active, task sequence submitted");
        Ok(())
    }

    /// Queues one frame's encode task. Packets accumulate in the command
    /// stream until [`Encoder::end_frame`] submits them.
    pub fn encode_bitstream(
        &mut self,
        desc: &PictureDesc,
        destination: BitstreamBuffer,
    ) -> Result<FeedbackHandle, EncodeError> {
        match self.ctx.session.state {
            SessionState::Active => {}
            SessionState::Uninitialized => return Err(EncodeError::SessionNotStarted),
            SessionState::Closed => return Err(EncodeError::SessionClosed),
        }

        let pic = self.ctx.session.derive_picture_state(desc);
        let luma = self.ctx.winsys.resolve_picture(desc.input_picture, Plane::Luma)?;
        let chroma = self
            .ctx
            .winsys
            .resolve_picture(desc.input_picture, Plane::Chroma)?;
        let feedback = self
            .ctx
            .winsys
            .create_buffer(fw::FEEDBACK_BUFFER_SIZE, BufferDomain::Gtt)
            .map_err(|err| EncodeError::Allocation(format!("feedback buffer: {err}")))?;

        let io = FrameBuffers {
            luma,
            chroma,
            bitstream: destination,
            feedback,
        };
        if let Err(err) = self.pipeline.encode(&mut self.ctx, &pic, &io) {
            // No partial-submission path exists; a mid-build failure
            // abandons everything queued for the frame batch.
            self.ctx.winsys.destroy_buffer(feedback);
            self.ctx.cs.clear();
            return Err(err);
        }
        Ok(self.ctx.session.track_feedback(feedback))
    }

    /// Submits every task queued since the last submission.
    pub fn end_frame(&mut self) -> Result<(), EncodeError> {
        if self.ctx.cs.is_empty() {
            return Ok(());
        }
        let result = self.ctx.winsys.submit(self.ctx.cs.dwords());
        self.ctx.cs.clear();
        result
    }

    /// Reads one frame's hardware feedback record and returns the coded
    /// bitstream size in bytes. A non-OK hardware status is reported as
    /// size 0; the caller decides whether to drop the frame. The handle is
    /// consumed either way.
    pub fn get_feedback(&mut self, handle: FeedbackHandle) -> Result<u32, EncodeError> {
        let buffer = self
            .ctx
            .session
            .take_feedback(handle)
            .ok_or(EncodeError::UnknownFeedback)?;
        let data = self.ctx.winsys.map(buffer);
        self.ctx.winsys.destroy_buffer(buffer);
        let data = data?;
        if data.len() < 8 {
            return Err(EncodeError::Winsys(format!(
                "short feedback record: {} bytes",
                data.len()
            )));
        }
        let status = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let size = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if status != 0 {
            warn!("hardware reported encode status {status:#x}, dropping frame output");
            return Ok(0);
        }
        Ok(size)
    }

    /// Closes the session with the hardware and releases every buffer the
    /// session owns. Idempotent; also runs on drop.
    pub fn destroy(&mut self) -> Result<(), EncodeError> {
        if self.ctx.session.state == SessionState::Closed {
            return Ok(());
        }
        let was_active = self.ctx.session.state == SessionState::Active;
        self.ctx.session.state = SessionState::Closed;

        let mut result = Ok(());
        if was_active {
            // The close task wants a feedback descriptor; the record is
            // never read back.
            match self
                .ctx
                .winsys
                .create_buffer(fw::FEEDBACK_BUFFER_SIZE, BufferDomain::Gtt)
            {
                Ok(feedback) => {
                    self.ctx.cs.clear();
                    result = self
                        .pipeline
                        .destroy(&mut self.ctx, feedback)
                        .and_then(|()| self.ctx.winsys.submit(self.ctx.cs.dwords()));
                    self.ctx.cs.clear();
                    self.ctx.winsys.destroy_buffer(feedback);
                }
                Err(err) => result = Err(err),
            }
        }
        self.ctx.release_session_buffers();
        debug!("encode session closed");
        result
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            warn!("encode session teardown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Default)]
    struct State {
        next_handle: u64,
        submissions: Vec<Vec<u32>>,
    }

    #[derive(Clone, Default)]
    struct RecordingWinsys(Rc<RefCell<State>>);

    impl Winsys for RecordingWinsys {
        fn create_buffer(
            &mut self,
            _size: u64,
            _domain: BufferDomain,
        ) -> Result<GpuBuffer, EncodeError> {
            let mut state = self.0.borrow_mut();
            state.next_handle += 1;
            Ok(GpuBuffer(state.next_handle))
        }

        fn destroy_buffer(&mut self, _buffer: GpuBuffer) {}

        fn map(&mut self, _buffer: GpuBuffer) -> Result<Vec<u8>, EncodeError> {
            Ok(vec![0; 16])
        }

        fn gpu_address(&self, buffer: GpuBuffer) -> u64 {
            buffer.0 << 16
        }

        fn add_buffer_reference(&mut self, _buffer: GpuBuffer, _access: BufferAccess) {}

        fn submit(&mut self, stream: &[u32]) -> Result<(), EncodeError> {
            self.0.borrow_mut().submissions.push(stream.to_vec());
            Ok(())
        }

        fn resolve_picture(
            &self,
            picture: PictureHandle,
            plane: Plane,
        ) -> Result<PlaneView, EncodeError> {
            Ok(PlaneView {
                buffer: GpuBuffer(picture.0),
                offset: match plane {
                    Plane::Luma => 0,
                    Plane::Chroma => 1920 * 1088,
                },
                pitch: 1920,
            })
        }
    }

    fn destination() -> BitstreamBuffer {
        BitstreamBuffer {
            buffer: GpuBuffer(900),
            offset: 0,
            size: 2 << 20,
        }
    }

    #[test]
    fn a_failed_encode_abandons_the_queued_command_buffer() {
        let winsys = RecordingWinsys::default();
        let config = SessionConfig::new(Codec::Hevc, 1920, 1080, GpuGeneration::Gfx9);
        let mut enc = Encoder::new(config, Box::new(winsys.clone())).unwrap();
        let desc = PictureDesc::new(PictureType::Idr, 0, PictureHandle(1));
        enc.begin_frame(&desc).unwrap();

        // One valid frame queued but not yet submitted.
        let _ = enc.encode_bitstream(&desc, destination()).unwrap();
        assert!(!enc.ctx.cs.is_empty());

        // Force a mid-build failure for the next frame's task.
        let buffers = enc.ctx.session.buffers.take();
        assert!(matches!(
            enc.encode_bitstream(&desc, destination()),
            Err(EncodeError::SessionNotStarted)
        ));
        enc.ctx.session.buffers = buffers;

        // Everything queued for the batch is discarded, so the next
        // end_frame has nothing to submit.
        assert!(enc.ctx.cs.is_empty());
        let before = winsys.0.borrow().submissions.len();
        enc.end_frame().unwrap();
        assert_eq!(winsys.0.borrow().submissions.len(), before);
    }
}
