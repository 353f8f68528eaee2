//! Encode session state: derived geometry, reusable buffers, task and
//! feedback bookkeeping, and the per-frame picture state handed to the
//! codec pipeline.

use std::collections::HashMap;

use log::debug;

use crate::bitwriter::BitWriter;
use crate::cmdstream::CmdStream;
use crate::contract::{
    BitstreamBuffer, BufferDomain, CropRect, DeblockingConfig, EncodeError, FeedbackHandle,
    GpuBuffer, GpuGeneration, PictureDesc, PictureType, PlaneView, SessionConfig, SliceConfig,
    VuiInfo, Winsys,
};
use crate::fw;

pub(crate) fn align_u32(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

pub(crate) fn align_u64(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Uninitialized,
    Active,
    Closed,
}

/// Surface addressing variant, resolved once at session construction from
/// the GPU generation tag and never switched afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceMode {
    Tiled { array_mode: u32 },
    Linear { swizzle_mode: u32 },
}

impl SurfaceMode {
    pub(crate) fn hw_dword(self) -> u32 {
        match self {
            Self::Tiled { array_mode } => array_mode,
            Self::Linear { swizzle_mode } => swizzle_mode,
        }
    }
}

/// Geometry derived from the session config at creation time.
#[derive(Debug, Clone, Copy)]
pub struct SessionGeometry {
    pub aligned_width: u32,
    pub aligned_height: u32,
    pub padding_width: u32,
    pub padding_height: u32,
    pub log2_max_poc: u32,
    /// Reference-picture slots in the CPB pool.
    pub cpb_slots: u32,
    pub rec_luma_pitch: u32,
    pub rec_chroma_pitch: u32,
    pub rec_luma_size: u64,
    pub rec_chroma_size: u64,
}

impl SessionGeometry {
    pub fn cpb_size(&self) -> u64 {
        align_u64(
            (self.rec_luma_size + self.rec_chroma_size) * u64::from(self.cpb_slots),
            fw::BUFFER_SIZE_ALIGN,
        )
    }
}

#[derive(Debug)]
pub(crate) struct SessionBuffers {
    pub cpb: GpuBuffer,
    pub scratch: GpuBuffer,
}

pub(crate) struct EncoderSession {
    pub config: SessionConfig,
    pub geometry: SessionGeometry,
    pub surface_mode: SurfaceMode,
    pub state: SessionState,
    pub buffers: Option<SessionBuffers>,
    task_id: u32,
    next_feedback_id: u64,
    pending_feedback: HashMap<u64, GpuBuffer>,
}

impl EncoderSession {
    pub fn new(config: SessionConfig) -> Result<Self, EncodeError> {
        if config.width == 0 || config.height == 0 {
            return Err(EncodeError::InvalidConfig(format!(
                "picture size {}x{} is empty",
                config.width, config.height
            )));
        }
        if config.width > fw::MAX_PIC_WIDTH || config.height > fw::MAX_PIC_HEIGHT {
            return Err(EncodeError::InvalidConfig(format!(
                "picture size {}x{} exceeds the hardware maximum {}x{}",
                config.width,
                config.height,
                fw::MAX_PIC_WIDTH,
                fw::MAX_PIC_HEIGHT
            )));
        }
        if config.bit_depth != 8 && config.bit_depth != 10 {
            return Err(EncodeError::InvalidConfig(format!(
                "unsupported bit depth {}",
                config.bit_depth
            )));
        }
        if config.num_temporal_layers == 0 || config.num_temporal_layers > 4 {
            return Err(EncodeError::InvalidConfig(format!(
                "temporal layer count {} out of range",
                config.num_temporal_layers
            )));
        }

        let geometry = derive_geometry(&config)?;
        let surface_mode = match config.gpu_generation {
            GpuGeneration::Legacy => SurfaceMode::Tiled {
                array_mode: fw::ARRAY_MODE_2D_TILED_THIN1,
            },
            GpuGeneration::Gfx9 => SurfaceMode::Linear {
                swizzle_mode: fw::SWIZZLE_MODE_256B_D,
            },
        };

        Ok(Self {
            config,
            geometry,
            surface_mode,
            state: SessionState::Uninitialized,
            buffers: None,
            task_id: 0,
            next_feedback_id: 0,
            pending_feedback: HashMap::new(),
        })
    }

    pub fn next_task_id(&mut self) -> u32 {
        self.task_id += 1;
        self.task_id
    }

    pub fn derive_picture_state(&self, desc: &PictureDesc) -> PictureState {
        let crop = desc.crop.unwrap_or_else(|| {
            let c = &self.config;
            CropRect {
                left: 0,
                right: (align_u32(c.width, fw::CROP_ALIGN) - c.width) / 2,
                top: 0,
                bottom: (align_u32(c.height, fw::CROP_ALIGN) - c.height) / 2,
            }
        });

        // Two-slot ping-pong between reconstructed and reference surfaces.
        let reference_index = match desc.picture_type {
            PictureType::P | PictureType::B => Some(desc.frame_num.saturating_sub(1) % 2),
            PictureType::Idr | PictureType::I | PictureType::Skip => None,
        };

        let poc_mask = match self.geometry.log2_max_poc {
            32.. => u32::MAX,
            bits => (1u32 << bits) - 1,
        };

        PictureState {
            picture_type: desc.picture_type,
            frame_num: desc.frame_num,
            pic_order_cnt: desc.pic_order_cnt & poc_mask,
            crop,
            vui: desc.vui.clone(),
            slice: desc.slice.clone(),
            deblocking: desc.deblocking.clone(),
            reference_index,
            reconstructed_index: desc.frame_num % 2,
        }
    }

    pub fn track_feedback(&mut self, buffer: GpuBuffer) -> FeedbackHandle {
        self.next_feedback_id += 1;
        let handle = FeedbackHandle::new(self.next_feedback_id);
        self.pending_feedback.insert(handle.id(), buffer);
        handle
    }

    pub fn take_feedback(&mut self, handle: FeedbackHandle) -> Option<GpuBuffer> {
        self.pending_feedback.remove(&handle.id())
    }

    pub fn drain_feedback(&mut self) -> Vec<GpuBuffer> {
        self.pending_feedback.drain().map(|(_, b)| b).collect()
    }
}

fn derive_geometry(config: &SessionConfig) -> Result<SessionGeometry, EncodeError> {
    let aligned_width = align_u32(config.width, fw::PIC_WIDTH_ALIGN);
    let aligned_height = align_u32(config.height, fw::PIC_HEIGHT_ALIGN);

    // max_poc is the power-of-two POC span; the shift loop below lands one
    // past the bit width of max_poc, which is what the firmware interface
    // expects. Keep the loop, not a closed form.
    let max_poc = 16u32.max(
        config
            .intra_period
            .max(1)
            .checked_next_power_of_two()
            .unwrap_or(1 << 31),
    );
    let mut log2_max_poc = 0u32;
    let mut i = max_poc;
    while i != 0 {
        i >>= 1;
        log2_max_poc += 1;
    }

    let width_16 = align_u32(config.width, 16) / 16;
    let height_16 = align_u32(config.height, 16) / 16;
    let cpb_slots = (config.level.dpb_budget_16x16() / (width_16 * height_16))
        .min(fw::MAX_REFERENCE_PICTURES);
    if cpb_slots == 0 {
        return Err(EncodeError::InvalidConfig(format!(
            "level_idc {} cannot hold one {}x{} reference picture",
            config.level.idc(),
            config.width,
            config.height
        )));
    }

    let pitch = align_u32(aligned_width, fw::REC_PITCH_ALIGN);
    let rec_luma_size = match config.gpu_generation {
        // Tiled surfaces round the plane height up to whole macro tiles;
        // linear gfx9+ surfaces take the 16-aligned height as is.
        GpuGeneration::Legacy => {
            u64::from(pitch) * u64::from(align_u32(aligned_height, fw::LEGACY_TILE_HEIGHT_ALIGN))
        }
        GpuGeneration::Gfx9 => u64::from(pitch) * u64::from(aligned_height),
    };
    let rec_chroma_size = rec_luma_size / 2;

    Ok(SessionGeometry {
        aligned_width,
        aligned_height,
        padding_width: aligned_width - config.width,
        padding_height: aligned_height - config.height,
        log2_max_poc,
        cpb_slots,
        rec_luma_pitch: pitch,
        rec_chroma_pitch: pitch,
        rec_luma_size,
        rec_chroma_size,
    })
}

/// Per-frame encoder picture state, recomputed from the caller's
/// `PictureDesc` at the start of every begin/encode call.
#[derive(Debug, Clone)]
pub(crate) struct PictureState {
    pub picture_type: PictureType,
    pub frame_num: u32,
    pub pic_order_cnt: u32,
    pub crop: CropRect,
    pub vui: VuiInfo,
    pub slice: SliceConfig,
    pub deblocking: DeblockingConfig,
    pub reference_index: Option<u32>,
    pub reconstructed_index: u32,
}

/// Per-call GPU buffers for one frame's encode task.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameBuffers {
    pub luma: PlaneView,
    pub chroma: PlaneView,
    pub bitstream: BitstreamBuffer,
    pub feedback: GpuBuffer,
}

/// Everything the packet emitters mutate: session state, the command
/// stream, the bit packer and the winsys collaborator.
pub(crate) struct EncodeContext {
    pub session: EncoderSession,
    pub cs: CmdStream,
    pub bw: BitWriter,
    pub winsys: Box<dyn Winsys>,
}

impl EncodeContext {
    /// Registers a buffer with the submission layer and writes its GPU
    /// address as two dwords, high half first.
    pub fn write_buffer_ref(
        &mut self,
        buffer: GpuBuffer,
        access: crate::contract::BufferAccess,
        offset: u64,
    ) {
        self.winsys.add_buffer_reference(buffer, access);
        let addr = self.winsys.gpu_address(buffer) + offset;
        self.cs.push((addr >> 32) as u32);
        self.cs.push(addr as u32);
    }

    /// Allocates the session-lifetime buffers (CPB pool and session
    /// scratch). On partial failure everything allocated so far is
    /// released before returning.
    pub fn allocate_session_buffers(&mut self) -> Result<(), EncodeError> {
        let cpb_size = self.session.geometry.cpb_size();
        let cpb = self
            .winsys
            .create_buffer(cpb_size, BufferDomain::Vram)
            .map_err(|err| EncodeError::Allocation(format!("cpb ({cpb_size} bytes): {err}")))?;
        let scratch = match self
            .winsys
            .create_buffer(fw::SESSION_SCRATCH_SIZE, BufferDomain::Vram)
        {
            Ok(buffer) => buffer,
            Err(err) => {
                self.winsys.destroy_buffer(cpb);
                return Err(EncodeError::Allocation(format!("session scratch: {err}")));
            }
        };
        debug!(
            "allocated session buffers: cpb={} bytes, {} reference slots",
            cpb_size, self.session.geometry.cpb_slots
        );
        self.session.buffers = Some(SessionBuffers { cpb, scratch });
        Ok(())
    }

    pub fn release_session_buffers(&mut self) {
        if let Some(buffers) = self.session.buffers.take() {
            self.winsys.destroy_buffer(buffers.cpb);
            self.winsys.destroy_buffer(buffers.scratch);
        }
        for buffer in self.session.drain_feedback() {
            self.winsys.destroy_buffer(buffer);
        }
    }
}

/// Codec- and firmware-specific packet sequences. One concrete
/// implementation per {codec standard, firmware interface}; the encoder
/// picks it at construction time and never switches.
pub(crate) trait EncodePipeline {
    fn begin(&self, ctx: &mut EncodeContext, pic: &PictureState) -> Result<(), EncodeError>;

    fn encode(
        &self,
        ctx: &mut EncodeContext,
        pic: &PictureState,
        io: &FrameBuffers,
    ) -> Result<(), EncodeError>;

    fn destroy(&self, ctx: &mut EncodeContext, feedback: GpuBuffer) -> Result<(), EncodeError>;
}
