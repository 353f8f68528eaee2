//! Firmware interface constants for the encode engine.
//!
//! Packet type tags, op tags and layout constants consumed by the command
//! packet emitters. Values are fixed by the firmware interface version the
//! session negotiates; nothing in here carries logic.

pub const FW_INTERFACE_MAJOR: u32 = 1;
pub const FW_INTERFACE_MINOR: u32 = 1;

pub const IB_PARAM_SESSION_INFO: u32 = 0x0000_0001;
pub const IB_PARAM_TASK_INFO: u32 = 0x0000_0002;
pub const IB_PARAM_SESSION_INIT: u32 = 0x0000_0003;
pub const IB_PARAM_LAYER_CONTROL: u32 = 0x0000_0004;
pub const IB_PARAM_LAYER_SELECT: u32 = 0x0000_0005;
pub const IB_PARAM_SLICE_CONTROL: u32 = 0x0000_0006;
pub const IB_PARAM_SPEC_MISC: u32 = 0x0000_0007;
pub const IB_PARAM_RATE_CONTROL_SESSION_INIT: u32 = 0x0000_0008;
pub const IB_PARAM_RATE_CONTROL_LAYER_INIT: u32 = 0x0000_0009;
pub const IB_PARAM_RATE_CONTROL_PER_PICTURE: u32 = 0x0000_000a;
pub const IB_PARAM_QUALITY_PARAMS: u32 = 0x0000_000b;
pub const IB_PARAM_SLICE_HEADER: u32 = 0x0000_000c;
pub const IB_PARAM_ENCODE_PARAMS: u32 = 0x0000_000d;
pub const IB_PARAM_INTRA_REFRESH: u32 = 0x0000_000e;
pub const IB_PARAM_ENCODE_CONTEXT_BUFFER: u32 = 0x0000_000f;
pub const IB_PARAM_VIDEO_BITSTREAM_BUFFER: u32 = 0x0000_0010;
pub const IB_PARAM_FEEDBACK_BUFFER: u32 = 0x0000_0011;
pub const IB_PARAM_INSERT_NAL_UNIT: u32 = 0x0000_0012;
pub const IB_PARAM_DEBLOCKING_FILTER: u32 = 0x0000_0013;

pub const IB_OP_INITIALIZE: u32 = 0x0800_0001;
pub const IB_OP_CLOSE_SESSION: u32 = 0x0800_0002;
pub const IB_OP_ENCODE: u32 = 0x0800_0003;
pub const IB_OP_INIT_RC: u32 = 0x0800_0004;
pub const IB_OP_INIT_RC_VBV_BUFFER_LEVEL: u32 = 0x0800_0005;
pub const IB_OP_SET_SPEED_ENCODING_MODE: u32 = 0x0800_0006;
pub const IB_OP_SET_BALANCE_ENCODING_MODE: u32 = 0x0800_0007;
pub const IB_OP_SET_QUALITY_ENCODING_MODE: u32 = 0x0800_0008;

/// NAL tags carried in the first body word of an INSERT_NAL_UNIT packet.
/// These identify the unit to the firmware and are unrelated to the
/// `nal_unit_type` coded inside the bitstream payload itself.
pub const NALU_TYPE_AUD: u32 = 0x0000_0001;
pub const NALU_TYPE_VPS: u32 = 0x0000_0002;
pub const NALU_TYPE_SPS: u32 = 0x0000_0003;
pub const NALU_TYPE_PPS: u32 = 0x0000_0004;

pub const ENCODE_STANDARD_HEVC: u32 = 0x0000_0000;

pub const PICTURE_TYPE_B: u32 = 0x0000_0000;
pub const PICTURE_TYPE_P: u32 = 0x0000_0001;
pub const PICTURE_TYPE_I: u32 = 0x0000_0002;
pub const PICTURE_TYPE_SKIP: u32 = 0x0000_0003;

pub const RATE_CONTROL_METHOD_NONE: u32 = 0x0000_0000;
pub const RATE_CONTROL_METHOD_LATENCY_CONSTRAINED_VBR: u32 = 0x0000_0001;
pub const RATE_CONTROL_METHOD_PEAK_CONSTRAINED_VBR: u32 = 0x0000_0002;
pub const RATE_CONTROL_METHOD_CBR: u32 = 0x0000_0003;

pub const SLICE_CONTROL_MODE_FIXED_CTBS: u32 = 0x0000_0000;
pub const INTRA_REFRESH_MODE_NONE: u32 = 0x0000_0000;
pub const BUFFER_MODE_LINEAR: u32 = 0x0000_0000;

/// Legacy tiled addressing (pre-gfx9 surface layout).
pub const ARRAY_MODE_2D_TILED_THIN1: u32 = 0x0000_0004;
/// Linear addressing with a gfx9+ swizzle mode.
pub const SWIZZLE_MODE_256B_D: u32 = 0x0000_0002;

pub const HEADER_INSTRUCTION_END: u32 = 0x0000_0000;
pub const HEADER_INSTRUCTION_COPY: u32 = 0x0000_0001;
pub const HEADER_INSTRUCTION_FIRST_SLICE: u32 = 0x0000_0002;
pub const HEADER_INSTRUCTION_SLICE_SEGMENT_ADDRESS: u32 = 0x0000_0003;
pub const HEADER_INSTRUCTION_DEPENDENT_SLICE_END: u32 = 0x0000_0004;
pub const HEADER_INSTRUCTION_SLICE_QP_DELTA: u32 = 0x0000_0005;

pub const SLICE_HEADER_TEMPLATE_MAX_DWORDS: usize = 16;
pub const SLICE_HEADER_MAX_INSTRUCTIONS: usize = 16;

pub const PIC_WIDTH_ALIGN: u32 = 64;
pub const PIC_HEIGHT_ALIGN: u32 = 16;
/// Crop offsets are derived from 16-aligned padding, matching the firmware
/// expectation even though session width is aligned to 64.
pub const CROP_ALIGN: u32 = 16;
pub const REC_PITCH_ALIGN: u32 = 256;
/// Legacy tiled surfaces round reconstructed-picture height to macro tiles.
pub const LEGACY_TILE_HEIGHT_ALIGN: u32 = 32;
pub const BUFFER_SIZE_ALIGN: u64 = 4096;

pub const MAX_PIC_WIDTH: u32 = 16384;
pub const MAX_PIC_HEIGHT: u32 = 16384;

pub const MAX_REFERENCE_PICTURES: u32 = 16;
pub const REFERENCE_INDEX_NONE: u32 = 0xffff_ffff;

pub const SESSION_SCRATCH_SIZE: u64 = 16 * 1024;
pub const FEEDBACK_BUFFER_SIZE: u64 = 4096;
pub const FEEDBACK_DATA_SIZE: u32 = 16;

/// HEVC `aspect_ratio_idc` sentinel selecting an explicit SAR.
pub const ASPECT_RATIO_IDC_EXTENDED_SAR: u32 = 255;
