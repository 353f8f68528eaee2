use std::{fmt, fmt::Display};

use crate::fw;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    Hevc,
}

impl Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => f.write_str("h264"),
            Self::Hevc => f.write_str("hevc"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Main,
    Main10,
}

impl Profile {
    pub(crate) fn idc(self) -> u32 {
        match self {
            Self::Main => 1,
            Self::Main10 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tier {
    #[default]
    Main,
    High,
}

/// HEVC coding levels, carrying the standard `general_level_idc` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    L1,
    L2,
    L2_1,
    L3,
    L3_1,
    L4,
    L4_1,
    L5,
    L5_1,
    L5_2,
    L6,
    L6_1,
    L6_2,
}

impl Level {
    pub fn idc(self) -> u32 {
        match self {
            Self::L1 => 30,
            Self::L2 => 60,
            Self::L2_1 => 63,
            Self::L3 => 90,
            Self::L3_1 => 93,
            Self::L4 => 120,
            Self::L4_1 => 123,
            Self::L5 => 150,
            Self::L5_1 => 153,
            Self::L5_2 => 156,
            Self::L6 => 180,
            Self::L6_1 => 183,
            Self::L6_2 => 186,
        }
    }

    /// Per-level DPB capacity in 16x16 luma units (6 * MaxLumaPs / 256),
    /// used to size the reference-picture pool.
    pub(crate) fn dpb_budget_16x16(self) -> u32 {
        match self {
            Self::L1 => 864,
            Self::L2 => 2880,
            Self::L2_1 => 5760,
            Self::L3 => 12960,
            Self::L3_1 => 23040,
            Self::L4 | Self::L4_1 => 52224,
            Self::L5 | Self::L5_1 | Self::L5_2 => 208896,
            Self::L6 | Self::L6_1 | Self::L6_2 => 835584,
        }
    }
}

/// Hardware generation tag. Selects the surface addressing formula once
/// per session; the two variants are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuGeneration {
    /// Pre-gfx9 parts with tiled reconstructed surfaces.
    Legacy,
    /// gfx9 and newer, linear addressing with a swizzle mode.
    Gfx9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
}

impl Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControlMethod {
    None,
    LatencyConstrainedVbr,
    PeakConstrainedVbr,
    Cbr,
}

impl RateControlMethod {
    pub(crate) fn hw_tag(self) -> u32 {
        match self {
            Self::None => fw::RATE_CONTROL_METHOD_NONE,
            Self::LatencyConstrainedVbr => fw::RATE_CONTROL_METHOD_LATENCY_CONSTRAINED_VBR,
            Self::PeakConstrainedVbr => fw::RATE_CONTROL_METHOD_PEAK_CONSTRAINED_VBR,
            Self::Cbr => fw::RATE_CONTROL_METHOD_CBR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateControl {
    pub method: RateControlMethod,
    pub target_bitrate: u32,
    pub peak_bitrate: u32,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    pub vbv_buffer_size: u32,
    /// Initial VBV fullness in 1/64ths of the buffer size.
    pub vbv_buffer_level: u32,
    pub qp: u32,
    pub min_qp: u32,
    pub max_qp: u32,
    pub max_au_size: u32,
    pub filler_data: bool,
    pub skip_frame: bool,
    pub enforce_hrd: bool,
}

impl Default for RateControl {
    fn default() -> Self {
        Self {
            method: RateControlMethod::None,
            target_bitrate: 0,
            peak_bitrate: 0,
            frame_rate_num: 30,
            frame_rate_den: 1,
            vbv_buffer_size: 0,
            vbv_buffer_level: 64,
            qp: 26,
            min_qp: 0,
            max_qp: 51,
            max_au_size: 0,
            filler_data: false,
            skip_frame: false,
            enforce_hrd: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityPreset {
    #[default]
    Speed,
    Balance,
    Quality,
}

impl QualityPreset {
    pub(crate) fn op_tag(self) -> u32 {
        match self {
            Self::Speed => fw::IB_OP_SET_SPEED_ENCODING_MODE,
            Self::Balance => fw::IB_OP_SET_BALANCE_ENCODING_MODE,
            Self::Quality => fw::IB_OP_SET_QUALITY_ENCODING_MODE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    pub profile: Profile,
    pub tier: Tier,
    pub level: Level,
    pub bit_depth: u32,
    pub intra_period: u32,
    pub num_temporal_layers: u32,
    pub rate_control: RateControl,
    pub quality_preset: QualityPreset,
    pub gpu_generation: GpuGeneration,
    pub firmware: FirmwareVersion,
}

impl SessionConfig {
    #[must_use]
    pub fn new(codec: Codec, width: u32, height: u32, gpu_generation: GpuGeneration) -> Self {
        Self {
            codec,
            width,
            height,
            profile: Profile::Main,
            tier: Tier::Main,
            level: Level::L4_1,
            bit_depth: 8,
            intra_period: 30,
            num_temporal_layers: 1,
            rate_control: RateControl::default(),
            quality_preset: QualityPreset::default(),
            gpu_generation,
            firmware: FirmwareVersion {
                major: fw::FW_INTERFACE_MAJOR,
                minor: fw::FW_INTERFACE_MINOR,
            },
        }
    }
}

impl Display for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionConfig(codec={}, {}x{}, level_idc={}, fw={})",
            self.codec,
            self.width,
            self.height,
            self.level.idc(),
            self.firmware
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureType {
    Idr,
    I,
    P,
    B,
    Skip,
}

impl PictureType {
    pub(crate) fn hw_tag(self) -> u32 {
        match self {
            Self::B => fw::PICTURE_TYPE_B,
            Self::P => fw::PICTURE_TYPE_P,
            Self::Idr | Self::I => fw::PICTURE_TYPE_I,
            Self::Skip => fw::PICTURE_TYPE_SKIP,
        }
    }

    pub fn is_intra(self) -> bool {
        matches!(self, Self::Idr | Self::I)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropRect {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl CropRect {
    pub fn any(&self) -> bool {
        self.left != 0 || self.right != 0 || self.top != 0 || self.bottom != 0
    }
}

/// Optional VUI block carried into the SPS. Every presence flag gates its
/// dependent fields.
#[derive(Debug, Clone, Default)]
pub struct VuiInfo {
    pub present: bool,
    pub aspect_ratio_info_present: bool,
    pub aspect_ratio_idc: u32,
    pub sar_width: u32,
    pub sar_height: u32,
    pub timing_info_present: bool,
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub chroma_loc_info_present: bool,
    pub chroma_sample_loc_type_top: u32,
    pub chroma_sample_loc_type_bottom: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SliceConfig {
    /// 0 means one slice covering the whole picture.
    pub num_ctbs_per_slice: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DeblockingConfig {
    pub loop_filter_across_slices_enabled: bool,
    pub deblocking_filter_disabled: bool,
    pub beta_offset_div2: i32,
    pub tc_offset_div2: i32,
    pub cb_qp_offset: i32,
    pub cr_qp_offset: i32,
}

/// Caller-supplied per-frame picture description.
#[derive(Debug, Clone)]
pub struct PictureDesc {
    pub picture_type: PictureType,
    pub frame_num: u32,
    pub pic_order_cnt: u32,
    pub crop: Option<CropRect>,
    pub vui: VuiInfo,
    pub slice: SliceConfig,
    pub deblocking: DeblockingConfig,
    pub input_picture: PictureHandle,
}

impl PictureDesc {
    #[must_use]
    pub fn new(picture_type: PictureType, frame_num: u32, input_picture: PictureHandle) -> Self {
        Self {
            picture_type,
            frame_num,
            pic_order_cnt: frame_num,
            crop: None,
            vui: VuiInfo::default(),
            slice: SliceConfig::default(),
            deblocking: DeblockingConfig::default(),
            input_picture,
        }
    }
}

/// Opaque GPU buffer handle owned by the winsys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuBuffer(pub u64);

/// Opaque picture-buffer handle resolved by the winsys into plane views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PictureHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    Luma,
    Chroma,
}

/// One plane of an input picture as the hardware sees it.
#[derive(Debug, Clone, Copy)]
pub struct PlaneView {
    pub buffer: GpuBuffer,
    pub offset: u64,
    pub pitch: u32,
}

/// Destination region for the compressed output of one frame.
#[derive(Debug, Clone, Copy)]
pub struct BitstreamBuffer {
    pub buffer: GpuBuffer,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferDomain {
    Vram,
    Gtt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    Read,
    Write,
    ReadWrite,
}

/// Completion token for one `encode_bitstream` call. Redeemed at most once
/// through `Encoder::get_feedback`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "feedback must be collected or the buffer leaks"]
pub struct FeedbackHandle(pub(crate) u64);

impl FeedbackHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub(crate) fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(Codec),
    #[error("unsupported firmware interface {0}")]
    UnsupportedInterface(FirmwareVersion),
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
    #[error("buffer allocation failed: {0}")]
    Allocation(String),
    #[error("winsys error: {0}")]
    Winsys(String),
    #[error("no active encode session")]
    SessionNotStarted,
    #[error("encode session already closed")]
    SessionClosed,
    #[error("unknown or already collected feedback handle")]
    UnknownFeedback,
}

/// External command-submission and buffer-lifecycle collaborator. The
/// encoder core never touches GPU memory itself; it only references
/// addresses handed out here. `map` is the single blocking point and
/// carries wait-for-completion semantics.
pub trait Winsys {
    fn create_buffer(&mut self, size: u64, domain: BufferDomain) -> Result<GpuBuffer, EncodeError>;

    fn destroy_buffer(&mut self, buffer: GpuBuffer);

    /// Maps a buffer and returns a snapshot of its contents. May block
    /// until the hardware has finished writing it.
    fn map(&mut self, buffer: GpuBuffer) -> Result<Vec<u8>, EncodeError>;

    fn gpu_address(&self, buffer: GpuBuffer) -> u64;

    fn add_buffer_reference(&mut self, buffer: GpuBuffer, access: BufferAccess);

    fn submit(&mut self, stream: &[u32]) -> Result<(), EncodeError>;

    /// Resolves an opaque picture handle into the plane the hardware reads.
    fn resolve_picture(
        &self,
        picture: PictureHandle,
        plane: Plane,
    ) -> Result<PlaneView, EncodeError>;
}
