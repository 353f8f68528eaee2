//! HEVC packet sequences for firmware interface 1.1.
//!
//! One emitter per parameter packet plus the NAL writers (AUD, VPS, SPS,
//! PPS) and the slice-header template. The three lifecycle entry points at
//! the bottom chain the emitters in the order the firmware consumes them.

use crate::cmdstream::{OpenPacket, Slot};
use crate::contract::{BufferAccess, EncodeError, GpuBuffer, PictureType, Profile, Tier};
use crate::fw;
use crate::session::{EncodeContext, EncodePipeline, FrameBuffers, PictureState};

/// HEVC `nal_unit_type` values shifted into the 16-bit NAL unit header
/// (`forbidden_zero_bit`, type, `nuh_layer_id`, `nuh_temporal_id_plus1`).
const NAL_HEADER_AUD: u32 = 0x4601;
const NAL_HEADER_VPS: u32 = 0x4001;
const NAL_HEADER_SPS: u32 = 0x4201;
const NAL_HEADER_PPS: u32 = 0x4401;
const NAL_HEADER_IDR_W_RADL: u32 = 0x2601;
const NAL_HEADER_CRA_NUT: u32 = 0x2a01;
const NAL_HEADER_TRAIL_R: u32 = 0x0201;

const CTB_SIZE: u32 = 64;

pub(crate) struct Hevc11;

impl Hevc11 {
    fn session_info(&self, ctx: &mut EncodeContext) -> Result<(), EncodeError> {
        let scratch = ctx
            .session
            .buffers
            .as_ref()
            .ok_or(EncodeError::SessionNotStarted)?
            .scratch;
        let version =
            (ctx.session.config.firmware.major << 16) | ctx.session.config.firmware.minor;
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_SESSION_INFO);
        ctx.cs.push(version);
        ctx.write_buffer_ref(scratch, BufferAccess::ReadWrite, 0);
        ctx.cs.end_packet(pkt);
        Ok(())
    }

    /// Opens task-size accounting and emits the task-info packet. The
    /// total-size placeholder is patched by `CmdStream::finish_task` once
    /// the phase's last packet has been closed.
    fn task_info(&self, ctx: &mut EncodeContext, need_feedback: bool) {
        ctx.cs.start_task();
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_TASK_INFO);
        let size_slot = ctx.cs.reserve_slot();
        ctx.cs.set_task_size_slot(size_slot);
        let task_id = ctx.session.next_task_id();
        ctx.cs.push(task_id);
        ctx.cs.push(u32::from(need_feedback));
        ctx.cs.end_packet(pkt);
    }

    fn op(&self, ctx: &mut EncodeContext, op_tag: u32) {
        let pkt = ctx.cs.begin_packet(op_tag);
        ctx.cs.end_packet(pkt);
    }

    fn session_init(&self, ctx: &mut EncodeContext) {
        let g = ctx.session.geometry;
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_SESSION_INIT);
        ctx.cs.push(fw::ENCODE_STANDARD_HEVC);
        ctx.cs.push(g.aligned_width);
        ctx.cs.push(g.aligned_height);
        ctx.cs.push(g.padding_width);
        ctx.cs.push(g.padding_height);
        ctx.cs.end_packet(pkt);
    }

    fn layer_control(&self, ctx: &mut EncodeContext) {
        let layers = ctx.session.config.num_temporal_layers;
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_LAYER_CONTROL);
        ctx.cs.push(layers);
        ctx.cs.push(layers);
        ctx.cs.end_packet(pkt);
    }

    fn layer_select(&self, ctx: &mut EncodeContext, layer: u32) {
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_LAYER_SELECT);
        ctx.cs.push(layer);
        ctx.cs.end_packet(pkt);
    }

    fn slice_control(&self, ctx: &mut EncodeContext, pic: &PictureState) {
        let g = ctx.session.geometry;
        let total_ctbs = g.aligned_width.div_ceil(CTB_SIZE) * g.aligned_height.div_ceil(CTB_SIZE);
        let per_slice = match pic.slice.num_ctbs_per_slice {
            0 => total_ctbs,
            n => n,
        };
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_SLICE_CONTROL);
        ctx.cs.push(fw::SLICE_CONTROL_MODE_FIXED_CTBS);
        ctx.cs.push(per_slice);
        ctx.cs.end_packet(pkt);
    }

    fn spec_misc(&self, ctx: &mut EncodeContext) {
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_SPEC_MISC);
        ctx.cs.push(0); // log2_min_luma_coding_block_size_minus3
        ctx.cs.push(1); // amp_disabled
        ctx.cs.push(0); // strong_intra_smoothing_enabled
        ctx.cs.push(0); // constrained_intra_pred_flag
        ctx.cs.push(0); // cabac_init_flag
        ctx.cs.push(1); // half_pel_enabled
        ctx.cs.push(1); // quarter_pel_enabled
        ctx.cs.end_packet(pkt);
    }

    fn rc_session_init(&self, ctx: &mut EncodeContext) {
        let rc = &ctx.session.config.rate_control;
        let method = rc.method.hw_tag();
        let level = rc.vbv_buffer_level;
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_RATE_CONTROL_SESSION_INIT);
        ctx.cs.push(method);
        ctx.cs.push(level);
        ctx.cs.end_packet(pkt);
    }

    fn rc_layer_init(&self, ctx: &mut EncodeContext) {
        let rc = ctx.session.config.rate_control.clone();
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_RATE_CONTROL_LAYER_INIT);
        ctx.cs.push(rc.target_bitrate);
        ctx.cs.push(rc.peak_bitrate);
        ctx.cs.push(rc.frame_rate_num);
        ctx.cs.push(rc.frame_rate_den);
        ctx.cs.push(rc.vbv_buffer_size);
        ctx.cs.end_packet(pkt);
    }

    fn rc_per_picture(&self, ctx: &mut EncodeContext) {
        let rc = ctx.session.config.rate_control.clone();
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_RATE_CONTROL_PER_PICTURE);
        ctx.cs.push(rc.qp);
        ctx.cs.push(rc.min_qp);
        ctx.cs.push(rc.max_qp);
        ctx.cs.push(rc.max_au_size);
        ctx.cs.push(u32::from(rc.filler_data));
        ctx.cs.push(u32::from(rc.skip_frame));
        ctx.cs.push(u32::from(rc.enforce_hrd));
        ctx.cs.end_packet(pkt);
    }

    fn deblocking_filter(&self, ctx: &mut EncodeContext, pic: &PictureState) {
        let db = &pic.deblocking;
        let fields = [
            u32::from(db.loop_filter_across_slices_enabled),
            u32::from(db.deblocking_filter_disabled),
            db.beta_offset_div2 as u32,
            db.tc_offset_div2 as u32,
            db.cb_qp_offset as u32,
            db.cr_qp_offset as u32,
        ];
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_DEBLOCKING_FILTER);
        for f in fields {
            ctx.cs.push(f);
        }
        ctx.cs.end_packet(pkt);
    }

    fn quality_params(&self, ctx: &mut EncodeContext) {
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_QUALITY_PARAMS);
        ctx.cs.push(0); // vbaq_mode
        ctx.cs.push(0); // scene_change_sensitivity
        ctx.cs.push(0); // scene_change_min_idr_interval
        ctx.cs.end_packet(pkt);
    }

    fn ctx_buffer(&self, ctx: &mut EncodeContext) -> Result<(), EncodeError> {
        let cpb = ctx
            .session
            .buffers
            .as_ref()
            .ok_or(EncodeError::SessionNotStarted)?
            .cpb;
        let g = ctx.session.geometry;
        let mode = ctx.session.surface_mode.hw_dword();

        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_ENCODE_CONTEXT_BUFFER);
        ctx.write_buffer_ref(cpb, BufferAccess::ReadWrite, 0);
        ctx.cs.push(mode);
        ctx.cs.push(g.rec_luma_pitch);
        ctx.cs.push(g.rec_chroma_pitch);
        ctx.cs.push(g.cpb_slots);
        let slot_size = g.rec_luma_size + g.rec_chroma_size;
        for slot in 0..u64::from(g.cpb_slots) {
            let luma_offset = slot * slot_size;
            ctx.cs.push(luma_offset as u32);
            ctx.cs.push((luma_offset + g.rec_luma_size) as u32);
        }
        ctx.cs.end_packet(pkt);
        Ok(())
    }

    fn bitstream_buffer(&self, ctx: &mut EncodeContext, io: &FrameBuffers) {
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_VIDEO_BITSTREAM_BUFFER);
        ctx.cs.push(fw::BUFFER_MODE_LINEAR);
        ctx.write_buffer_ref(io.bitstream.buffer, BufferAccess::Write, 0);
        ctx.cs.push(io.bitstream.size);
        ctx.cs.push(io.bitstream.offset);
        ctx.cs.end_packet(pkt);
    }

    fn feedback_buffer(&self, ctx: &mut EncodeContext, feedback: GpuBuffer) {
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_FEEDBACK_BUFFER);
        ctx.cs.push(fw::BUFFER_MODE_LINEAR);
        ctx.write_buffer_ref(feedback, BufferAccess::Write, 0);
        ctx.cs.push(fw::FEEDBACK_BUFFER_SIZE as u32);
        ctx.cs.push(fw::FEEDBACK_DATA_SIZE);
        ctx.cs.end_packet(pkt);
    }

    fn intra_refresh(&self, ctx: &mut EncodeContext) {
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_INTRA_REFRESH);
        ctx.cs.push(fw::INTRA_REFRESH_MODE_NONE);
        ctx.cs.push(0); // offset
        ctx.cs.push(0); // region_size
        ctx.cs.end_packet(pkt);
    }

    fn encode_params(
        &self,
        ctx: &mut EncodeContext,
        pic: &PictureState,
        io: &FrameBuffers,
    ) -> Result<(), EncodeError> {
        let mode = ctx.session.surface_mode.hw_dword();
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_ENCODE_PARAMS);
        ctx.cs.push(pic.picture_type.hw_tag());
        ctx.cs.push(io.bitstream.size);
        ctx.write_buffer_ref(io.luma.buffer, BufferAccess::Read, io.luma.offset);
        ctx.write_buffer_ref(io.chroma.buffer, BufferAccess::Read, io.chroma.offset);
        ctx.cs.push(io.luma.pitch);
        ctx.cs.push(io.chroma.pitch);
        ctx.cs.push(mode);
        ctx.cs
            .push(pic.reference_index.unwrap_or(fw::REFERENCE_INDEX_NONE));
        ctx.cs.push(pic.reconstructed_index);
        ctx.cs.end_packet(pkt);
        Ok(())
    }

    // NAL emission. The packet body is [hw nal tag, byte size, packed
    // payload]; the byte size is patched from the packer's final bit count
    // once the unit is flushed.

    fn begin_nal(&self, ctx: &mut EncodeContext, hw_tag: u32, nal_header: u32) -> (OpenPacket, Slot) {
        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_INSERT_NAL_UNIT);
        ctx.cs.push(hw_tag);
        let size_slot = ctx.cs.reserve_slot();
        let EncodeContext { cs, bw, .. } = ctx;
        bw.reset();
        bw.set_emulation_prevention(false);
        // Start codes are never escaped.
        bw.write_bits(cs, 0x0000_0001, 32);
        bw.write_bits(cs, nal_header, 16);
        bw.byte_align(cs);
        bw.set_emulation_prevention(true);
        (pkt, size_slot)
    }

    fn end_nal(&self, ctx: &mut EncodeContext, pkt: OpenPacket, size_slot: Slot) {
        let EncodeContext { cs, bw, .. } = ctx;
        bw.byte_align(cs);
        bw.flush(cs);
        let byte_size = bw.byte_size();
        cs.patch(size_slot, byte_size);
        cs.end_packet(pkt);
    }

    fn rbsp_trailing(&self, ctx: &mut EncodeContext) {
        let EncodeContext { cs, bw, .. } = ctx;
        bw.write_bits(cs, 1, 1);
        bw.byte_align(cs);
    }

    fn nalu_aud(&self, ctx: &mut EncodeContext, pic: &PictureState) {
        let (pkt, size_slot) = self.begin_nal(ctx, fw::NALU_TYPE_AUD, NAL_HEADER_AUD);
        let pic_type = match pic.picture_type {
            PictureType::Idr | PictureType::I => 0,
            PictureType::P => 1,
            PictureType::B | PictureType::Skip => 2,
        };
        {
            let EncodeContext { cs, bw, .. } = ctx;
            bw.write_bits(cs, pic_type, 3);
        }
        self.rbsp_trailing(ctx);
        self.end_nal(ctx, pkt, size_slot);
    }

    fn profile_tier_level(&self, ctx: &mut EncodeContext) {
        let cfg = &ctx.session.config;
        let tier = match cfg.tier {
            Tier::Main => 0,
            Tier::High => 1,
        };
        let profile_idc = cfg.profile.idc();
        // general_profile_compatibility_flag[j] sits at bit 31-j. Main
        // streams are decodable by Main10 decoders, so both flags are set.
        let compat = match cfg.profile {
            Profile::Main => 0x6000_0000,
            Profile::Main10 => 0x2000_0000,
        };
        let level_idc = cfg.level.idc();

        let EncodeContext { cs, bw, .. } = ctx;
        bw.write_bits(cs, 0, 2); // general_profile_space
        bw.write_bits(cs, tier, 1);
        bw.write_bits(cs, profile_idc, 5);
        bw.write_bits(cs, compat, 32);
        bw.write_bits(cs, 1, 1); // general_progressive_source_flag
        bw.write_bits(cs, 0, 1); // general_interlaced_source_flag
        bw.write_bits(cs, 0, 1); // general_non_packed_constraint_flag
        bw.write_bits(cs, 1, 1); // general_frame_only_constraint_flag
        // general_reserved_zero_44bits
        bw.write_bits(cs, 0, 32);
        bw.write_bits(cs, 0, 12);
        bw.write_bits(cs, level_idc, 8);
    }

    fn nalu_vps(&self, ctx: &mut EncodeContext) {
        let (pkt, size_slot) = self.begin_nal(ctx, fw::NALU_TYPE_VPS, NAL_HEADER_VPS);
        {
            let EncodeContext { cs, bw, .. } = ctx;
            bw.write_bits(cs, 0, 4); // vps_video_parameter_set_id
            bw.write_bits(cs, 0x3, 2); // vps_reserved_three_2bits
            bw.write_bits(cs, 0, 6); // vps_max_layers_minus1
            bw.write_bits(cs, 0, 3); // vps_max_sub_layers_minus1
            bw.write_bits(cs, 1, 1); // vps_temporal_id_nesting_flag
            bw.write_bits(cs, 0xffff, 16); // vps_reserved_0xffff_16bits
        }
        self.profile_tier_level(ctx);
        {
            let EncodeContext { cs, bw, .. } = ctx;
            bw.write_bits(cs, 0, 1); // vps_sub_layer_ordering_info_present_flag
            bw.write_ue(cs, 1); // vps_max_dec_pic_buffering_minus1
            bw.write_ue(cs, 0); // vps_max_num_reorder_pics
            bw.write_ue(cs, 0); // vps_max_latency_increase_plus1
            bw.write_bits(cs, 0, 6); // vps_max_layer_id
            bw.write_ue(cs, 0); // vps_num_layer_sets_minus1
            bw.write_bits(cs, 0, 1); // vps_timing_info_present_flag
            bw.write_bits(cs, 0, 1); // vps_extension_flag
        }
        self.rbsp_trailing(ctx);
        self.end_nal(ctx, pkt, size_slot);
    }

    fn nalu_sps(&self, ctx: &mut EncodeContext, pic: &PictureState) {
        let (pkt, size_slot) = self.begin_nal(ctx, fw::NALU_TYPE_SPS, NAL_HEADER_SPS);
        {
            let EncodeContext { cs, bw, .. } = ctx;
            bw.write_bits(cs, 0, 4); // sps_video_parameter_set_id
            bw.write_bits(cs, 0, 3); // sps_max_sub_layers_minus1
            bw.write_bits(cs, 1, 1); // sps_temporal_id_nesting_flag
        }
        self.profile_tier_level(ctx);

        let g = ctx.session.geometry;
        let bit_depth = ctx.session.config.bit_depth;
        let crop = pic.crop;
        let EncodeContext { cs, bw, .. } = ctx;
        bw.write_ue(cs, 0); // sps_seq_parameter_set_id
        bw.write_ue(cs, 1); // chroma_format_idc, 4:2:0
        bw.write_ue(cs, g.aligned_width);
        bw.write_ue(cs, g.aligned_height);
        let conformance_window = crop.any();
        bw.write_bits(cs, u32::from(conformance_window), 1);
        if conformance_window {
            bw.write_ue(cs, crop.left);
            bw.write_ue(cs, crop.right);
            bw.write_ue(cs, crop.top);
            bw.write_ue(cs, crop.bottom);
        }
        bw.write_ue(cs, bit_depth - 8); // bit_depth_luma_minus8
        bw.write_ue(cs, bit_depth - 8); // bit_depth_chroma_minus8
        bw.write_ue(cs, g.log2_max_poc - 4); // log2_max_pic_order_cnt_lsb_minus4
        bw.write_bits(cs, 0, 1); // sps_sub_layer_ordering_info_present_flag
        bw.write_ue(cs, 1); // sps_max_dec_pic_buffering_minus1
        bw.write_ue(cs, 0); // sps_max_num_reorder_pics
        bw.write_ue(cs, 0); // sps_max_latency_increase_plus1
        bw.write_ue(cs, 0); // log2_min_luma_coding_block_size_minus3
        bw.write_ue(cs, 3); // log2_diff_max_min_luma_coding_block_size
        bw.write_ue(cs, 0); // log2_min_luma_transform_block_size_minus2
        bw.write_ue(cs, 3); // log2_diff_max_min_luma_transform_block_size
        bw.write_ue(cs, 0); // max_transform_hierarchy_depth_inter
        bw.write_ue(cs, 0); // max_transform_hierarchy_depth_intra
        bw.write_bits(cs, 0, 1); // scaling_list_enabled_flag
        bw.write_bits(cs, 0, 1); // amp_enabled_flag
        bw.write_bits(cs, 0, 1); // sample_adaptive_offset_enabled_flag
        bw.write_bits(cs, 0, 1); // pcm_enabled_flag
        bw.write_ue(cs, 0); // num_short_term_ref_pic_sets
        bw.write_bits(cs, 0, 1); // long_term_ref_pics_present_flag
        bw.write_bits(cs, 0, 1); // sps_temporal_mvp_enabled_flag
        bw.write_bits(cs, 0, 1); // strong_intra_smoothing_enabled_flag

        let vui = &pic.vui;
        bw.write_bits(cs, u32::from(vui.present), 1);
        if vui.present {
            bw.write_bits(cs, u32::from(vui.aspect_ratio_info_present), 1);
            if vui.aspect_ratio_info_present {
                bw.write_bits(cs, vui.aspect_ratio_idc, 8);
                if vui.aspect_ratio_idc == fw::ASPECT_RATIO_IDC_EXTENDED_SAR {
                    bw.write_bits(cs, vui.sar_width, 16);
                    bw.write_bits(cs, vui.sar_height, 16);
                }
            }
            bw.write_bits(cs, 0, 1); // overscan_info_present_flag
            bw.write_bits(cs, 0, 1); // video_signal_type_present_flag
            bw.write_bits(cs, u32::from(vui.chroma_loc_info_present), 1);
            if vui.chroma_loc_info_present {
                bw.write_ue(cs, vui.chroma_sample_loc_type_top);
                bw.write_ue(cs, vui.chroma_sample_loc_type_bottom);
            }
            bw.write_bits(cs, 0, 1); // neutral_chroma_indication_flag
            bw.write_bits(cs, 0, 1); // field_seq_flag
            bw.write_bits(cs, 0, 1); // frame_field_info_present_flag
            bw.write_bits(cs, 0, 1); // default_display_window_flag
            bw.write_bits(cs, u32::from(vui.timing_info_present), 1);
            if vui.timing_info_present {
                bw.write_bits(cs, vui.num_units_in_tick, 32);
                bw.write_bits(cs, vui.time_scale, 32);
                bw.write_bits(cs, 0, 1); // vui_poc_proportional_to_timing_flag
                bw.write_bits(cs, 0, 1); // vui_hrd_parameters_present_flag
            }
            bw.write_bits(cs, 0, 1); // bitstream_restriction_flag
        }
        bw.write_bits(cs, 0, 1); // sps_extension_present_flag
        self.rbsp_trailing(ctx);
        self.end_nal(ctx, pkt, size_slot);
    }

    fn nalu_pps(&self, ctx: &mut EncodeContext, pic: &PictureState) {
        let (pkt, size_slot) = self.begin_nal(ctx, fw::NALU_TYPE_PPS, NAL_HEADER_PPS);
        let db = pic.deblocking.clone();
        {
            let EncodeContext { cs, bw, .. } = ctx;
            bw.write_ue(cs, 0); // pps_pic_parameter_set_id
            bw.write_ue(cs, 0); // pps_seq_parameter_set_id
            bw.write_bits(cs, 0, 1); // dependent_slice_segments_enabled_flag
            bw.write_bits(cs, 0, 1); // output_flag_present_flag
            bw.write_bits(cs, 0, 3); // num_extra_slice_header_bits
            bw.write_bits(cs, 0, 1); // sign_data_hiding_enabled_flag
            bw.write_bits(cs, 0, 1); // cabac_init_present_flag
            bw.write_ue(cs, 0); // num_ref_idx_l0_default_active_minus1
            bw.write_ue(cs, 0); // num_ref_idx_l1_default_active_minus1
            bw.write_se(cs, 0); // init_qp_minus26
            bw.write_bits(cs, 0, 1); // constrained_intra_pred_flag
            bw.write_bits(cs, 0, 1); // transform_skip_enabled_flag
            bw.write_bits(cs, 1, 1); // cu_qp_delta_enabled_flag
            bw.write_ue(cs, 0); // diff_cu_qp_delta_depth
            bw.write_se(cs, db.cb_qp_offset); // pps_cb_qp_offset
            bw.write_se(cs, db.cr_qp_offset); // pps_cr_qp_offset
            bw.write_bits(cs, 0, 1); // pps_slice_chroma_qp_offsets_present_flag
            bw.write_bits(cs, 0, 1); // weighted_pred_flag
            bw.write_bits(cs, 0, 1); // weighted_bipred_flag
            bw.write_bits(cs, 0, 1); // transquant_bypass_enabled_flag
            bw.write_bits(cs, 0, 1); // tiles_enabled_flag
            bw.write_bits(cs, 0, 1); // entropy_coding_sync_enabled_flag
            bw.write_bits(cs, u32::from(db.loop_filter_across_slices_enabled), 1);
            bw.write_bits(cs, 1, 1); // deblocking_filter_control_present_flag
            bw.write_bits(cs, 0, 1); // deblocking_filter_override_enabled_flag
            bw.write_bits(cs, u32::from(db.deblocking_filter_disabled), 1);
            if !db.deblocking_filter_disabled {
                bw.write_se(cs, db.beta_offset_div2);
                bw.write_se(cs, db.tc_offset_div2);
            }
            bw.write_bits(cs, 0, 1); // pps_scaling_list_data_present_flag
            bw.write_bits(cs, 0, 1); // lists_modification_present_flag
            bw.write_ue(cs, 0); // log2_parallel_merge_level_minus2
            bw.write_bits(cs, 0, 1); // slice_segment_header_extension_present_flag
            bw.write_bits(cs, 0, 1); // pps_extension_present_flag
        }
        self.rbsp_trailing(ctx);
        self.end_nal(ctx, pkt, size_slot);
    }

    /// Slice-header template packet: a fixed-size bit template region
    /// followed by instruction pairs telling the firmware which spans to
    /// copy verbatim and where to splice in the per-slice fields it owns.
    fn slice_header(&self, ctx: &mut EncodeContext, pic: &PictureState) {
        let nal_header = match pic.picture_type {
            PictureType::Idr => NAL_HEADER_IDR_W_RADL,
            PictureType::I => NAL_HEADER_CRA_NUT,
            PictureType::P | PictureType::B | PictureType::Skip => NAL_HEADER_TRAIL_R,
        };
        let slice_type: u32 = match pic.picture_type {
            PictureType::Idr | PictureType::I => 2,
            PictureType::P | PictureType::Skip => 1,
            PictureType::B => 0,
        };
        let is_idr = pic.picture_type == PictureType::Idr;
        let log2_max_poc = ctx.session.geometry.log2_max_poc;
        let poc_lsb = pic.pic_order_cnt;
        let loop_filter_across_slices = pic.deblocking.loop_filter_across_slices_enabled;

        let pkt = ctx.cs.begin_packet(fw::IB_PARAM_SLICE_HEADER);
        let template_start = ctx.cs.cursor();

        let mut instructions: Vec<(u32, u32)> = Vec::new();
        let EncodeContext { cs, bw, .. } = ctx;
        bw.reset();
        // The firmware re-escapes the final header; the template itself
        // stays unescaped.
        let mut segment_start = 0u32;
        let close_copy = |bw: &crate::bitwriter::BitWriter,
                          instructions: &mut Vec<(u32, u32)>,
                          segment_start: &mut u32| {
            let bits = bw.total_bits() - *segment_start;
            if bits > 0 {
                instructions.push((fw::HEADER_INSTRUCTION_COPY, bits));
            }
            *segment_start = bw.total_bits();
        };

        bw.write_bits(cs, 0x0000_0001, 32);
        bw.write_bits(cs, nal_header, 16);
        close_copy(bw, &mut instructions, &mut segment_start);

        instructions.push((fw::HEADER_INSTRUCTION_FIRST_SLICE, 0));

        if is_idr {
            bw.write_bits(cs, 0, 1); // no_output_of_prior_pics_flag
        }
        bw.write_ue(cs, 0); // slice_pic_parameter_set_id
        close_copy(bw, &mut instructions, &mut segment_start);

        instructions.push((fw::HEADER_INSTRUCTION_SLICE_SEGMENT_ADDRESS, 0));
        instructions.push((fw::HEADER_INSTRUCTION_DEPENDENT_SLICE_END, 0));

        bw.write_ue(cs, slice_type);
        if !is_idr {
            bw.write_bits(cs, poc_lsb, log2_max_poc);
            bw.write_bits(cs, 1, 1); // short_term_ref_pic_set_sps_flag
            if !pic.picture_type.is_intra() {
                bw.write_bits(cs, 0, 1); // num_ref_idx_active_override_flag
            }
        }
        if pic.picture_type == PictureType::P || pic.picture_type == PictureType::B {
            bw.write_ue(cs, 0); // five_minus_max_num_merge_cand
        }
        close_copy(bw, &mut instructions, &mut segment_start);

        instructions.push((fw::HEADER_INSTRUCTION_SLICE_QP_DELTA, 0));

        bw.write_bits(cs, u32::from(loop_filter_across_slices), 1);
        close_copy(bw, &mut instructions, &mut segment_start);

        instructions.push((fw::HEADER_INSTRUCTION_END, 0));
        bw.flush(cs);

        // Pad the bit template out to its fixed footprint.
        while cs.cursor() - template_start < fw::SLICE_HEADER_TEMPLATE_MAX_DWORDS {
            cs.push(0);
        }
        for i in 0..fw::SLICE_HEADER_MAX_INSTRUCTIONS {
            let (instruction, num_bits) = instructions
                .get(i)
                .copied()
                .unwrap_or((fw::HEADER_INSTRUCTION_END, 0));
            cs.push(instruction);
            cs.push(num_bits);
        }
        ctx.cs.end_packet(pkt);
    }
}

impl EncodePipeline for Hevc11 {
    fn begin(&self, ctx: &mut EncodeContext, pic: &PictureState) -> Result<(), EncodeError> {
        self.session_info(ctx)?;
        self.task_info(ctx, false);
        self.op(ctx, fw::IB_OP_INITIALIZE);
        self.session_init(ctx);
        self.slice_control(ctx, pic);
        self.spec_misc(ctx);
        self.deblocking_filter(ctx, pic);
        self.layer_control(ctx);
        self.rc_session_init(ctx);
        self.quality_params(ctx);
        for layer in 0..ctx.session.config.num_temporal_layers {
            self.layer_select(ctx, layer);
            self.rc_layer_init(ctx);
            self.layer_select(ctx, layer);
            self.rc_per_picture(ctx);
        }
        self.op(ctx, fw::IB_OP_INIT_RC);
        self.op(ctx, fw::IB_OP_INIT_RC_VBV_BUFFER_LEVEL);
        ctx.cs.finish_task();
        Ok(())
    }

    fn encode(
        &self,
        ctx: &mut EncodeContext,
        pic: &PictureState,
        io: &FrameBuffers,
    ) -> Result<(), EncodeError> {
        self.session_info(ctx)?;
        self.task_info(ctx, true);
        self.nalu_aud(ctx, pic);
        if pic.picture_type.is_intra() {
            self.nalu_vps(ctx);
            self.nalu_pps(ctx, pic);
            self.nalu_sps(ctx, pic);
        }
        self.slice_header(ctx, pic);
        self.encode_params(ctx, pic, io)?;
        self.ctx_buffer(ctx)?;
        self.bitstream_buffer(ctx, io);
        self.feedback_buffer(ctx, io.feedback);
        self.intra_refresh(ctx);
        let preset_op = ctx.session.config.quality_preset.op_tag();
        self.op(ctx, preset_op);
        self.op(ctx, fw::IB_OP_ENCODE);
        ctx.cs.finish_task();
        Ok(())
    }

    fn destroy(&self, ctx: &mut EncodeContext, feedback: GpuBuffer) -> Result<(), EncodeError> {
        self.session_info(ctx)?;
        self.task_info(ctx, false);
        self.feedback_buffer(ctx, feedback);
        self.op(ctx, fw::IB_OP_CLOSE_SESSION);
        ctx.cs.finish_task();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::bitwriter::BitWriter;
    use crate::cmdstream::CmdStream;
    use crate::contract::{
        BufferDomain, Codec, GpuGeneration, PictureDesc, PictureHandle, PictureType, Plane,
        QualityPreset, SessionConfig, VuiInfo,
    };
    use crate::session::EncoderSession;

    struct NullWinsys;

    impl crate::contract::Winsys for NullWinsys {
        fn create_buffer(
            &mut self,
            _size: u64,
            _domain: BufferDomain,
        ) -> Result<GpuBuffer, EncodeError> {
            Ok(GpuBuffer(1))
        }

        fn destroy_buffer(&mut self, _buffer: GpuBuffer) {}

        fn map(&mut self, _buffer: GpuBuffer) -> Result<Vec<u8>, EncodeError> {
            Ok(vec![0; 16])
        }

        fn gpu_address(&self, buffer: GpuBuffer) -> u64 {
            buffer.0 << 12
        }

        fn add_buffer_reference(&mut self, _buffer: GpuBuffer, _access: BufferAccess) {}

        fn submit(&mut self, _stream: &[u32]) -> Result<(), EncodeError> {
            Ok(())
        }

        fn resolve_picture(
            &self,
            _picture: PictureHandle,
            _plane: Plane,
        ) -> Result<crate::contract::PlaneView, EncodeError> {
            Ok(crate::contract::PlaneView {
                buffer: GpuBuffer(2),
                offset: 0,
                pitch: 1920,
            })
        }
    }

    fn ctx_for(config: SessionConfig) -> EncodeContext {
        EncodeContext {
            session: EncoderSession::new(config).unwrap(),
            cs: CmdStream::new(),
            bw: BitWriter::new(),
            winsys: Box::new(NullWinsys),
        }
    }

    fn test_ctx() -> EncodeContext {
        ctx_for(SessionConfig::new(Codec::Hevc, 1920, 1080, GpuGeneration::Gfx9))
    }

    fn test_io() -> FrameBuffers {
        FrameBuffers {
            luma: crate::contract::PlaneView {
                buffer: GpuBuffer(2),
                offset: 0,
                pitch: 1920,
            },
            chroma: crate::contract::PlaneView {
                buffer: GpuBuffer(2),
                offset: 1920 * 1088,
                pitch: 1920,
            },
            bitstream: crate::contract::BitstreamBuffer {
                buffer: GpuBuffer(3),
                offset: 0,
                size: 1 << 20,
            },
            feedback: GpuBuffer(4),
        }
    }

    fn nal_payload_bytes(ctx: &EncodeContext) -> Vec<u8> {
        // [tag, packet len, nal type, byte size, packed payload...]
        let dwords = ctx.cs.dwords();
        assert_eq!(dwords[0], fw::IB_PARAM_INSERT_NAL_UNIT);
        let byte_size = dwords[3] as usize;
        let mut bytes: Vec<u8> = dwords[4..]
            .iter()
            .flat_map(|dw| dw.to_le_bytes())
            .collect();
        bytes.truncate(byte_size);
        bytes
    }

    /// Strips the emulation-prevention bytes back out of a NAL payload.
    fn unescape(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(bytes.len());
        let mut zeros = 0u32;
        for &byte in bytes {
            if zeros >= 2 && byte == 0x03 {
                zeros = 0;
                continue;
            }
            zeros = if byte == 0 { zeros + 1 } else { 0 };
            out.push(byte);
        }
        out
    }

    /// MSB-first reader over an unescaped payload, mirroring how a decoder
    /// consumes the syntax the packer produced.
    struct BitReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl BitReader {
        fn new(bytes: Vec<u8>) -> Self {
            Self { bytes, pos: 0 }
        }

        fn bit(&mut self) -> u32 {
            let byte = self.bytes[self.pos / 8];
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            self.pos += 1;
            u32::from(bit)
        }

        fn bits(&mut self, count: u32) -> u32 {
            let mut value = 0;
            for _ in 0..count {
                value = (value << 1) | self.bit();
            }
            value
        }

        fn ue(&mut self) -> u32 {
            let mut leading = 0;
            while self.bit() == 0 {
                leading += 1;
            }
            (1 << leading) - 1 + self.bits(leading)
        }
    }

    /// Reads a 1920x1080 SPS payload up to and excluding the
    /// `vui_parameters_present_flag`.
    fn reader_at_vui_flag(ctx: &EncodeContext) -> BitReader {
        let mut r = BitReader::new(unescape(&nal_payload_bytes(ctx)));
        r.bits(32); // start code
        r.bits(16); // nal unit header
        r.bits(8); // parameter set ids, nesting flag
        // profile_tier_level
        r.bits(8);
        r.bits(32); // compatibility flags
        r.bits(4); // source and constraint flags
        r.bits(32);
        r.bits(12); // reserved 44 bits
        r.bits(8); // level_idc
        r.ue(); // sps_seq_parameter_set_id
        r.ue(); // chroma_format_idc
        assert_eq!(r.ue(), 1920); // pic_width_in_luma_samples
        assert_eq!(r.ue(), 1088); // pic_height_in_luma_samples
        if r.bit() == 1 {
            for _ in 0..4 {
                r.ue(); // conformance window offsets
            }
        }
        r.ue(); // bit_depth_luma_minus8
        r.ue(); // bit_depth_chroma_minus8
        r.ue(); // log2_max_pic_order_cnt_lsb_minus4
        r.bit(); // sps_sub_layer_ordering_info_present_flag
        r.ue(); // sps_max_dec_pic_buffering_minus1
        r.ue(); // sps_max_num_reorder_pics
        r.ue(); // sps_max_latency_increase_plus1
        for _ in 0..6 {
            r.ue(); // coding and transform block size fields
        }
        r.bits(4); // scaling list, amp, sao, pcm flags
        r.ue(); // num_short_term_ref_pic_sets
        r.bits(3); // long-term, tmvp, strong intra smoothing flags
        r
    }

    /// Returns the body dwords of the first packet carrying `tag`.
    fn packet_body(dwords: &[u32], tag: u32) -> &[u32] {
        let mut cursor = 0;
        while cursor < dwords.len() {
            let len = dwords[cursor + 1] as usize / 4;
            if dwords[cursor] == tag {
                return &dwords[cursor + 2..cursor + len];
            }
            cursor += len;
        }
        panic!("no packet with tag {tag:#x}");
    }

    #[test]
    fn aud_for_an_intra_frame_is_byte_exact() {
        let mut ctx = test_ctx();
        let pic = ctx
            .session
            .derive_picture_state(&PictureDesc::new(PictureType::Idr, 0, PictureHandle(1)));
        Hevc11.nalu_aud(&mut ctx, &pic);

        assert_eq!(
            nal_payload_bytes(&ctx),
            vec![0x00, 0x00, 0x00, 0x01, 0x46, 0x01, 0x10]
        );
        assert_eq!(ctx.cs.dwords()[2], fw::NALU_TYPE_AUD);
        assert_eq!(ctx.cs.dwords()[3], 7);
    }

    #[test]
    fn aud_pic_type_tracks_picture_type() {
        for (ty, last_byte) in [
            (PictureType::I, 0x10u8),
            (PictureType::P, 0x30),
            (PictureType::B, 0x50),
        ] {
            let mut ctx = test_ctx();
            let pic = ctx
                .session
                .derive_picture_state(&PictureDesc::new(ty, 1, PictureHandle(1)));
            Hevc11.nalu_aud(&mut ctx, &pic);
            assert_eq!(*nal_payload_bytes(&ctx).last().unwrap(), last_byte);
        }
    }

    #[test]
    fn vps_starts_with_its_nal_header() {
        let mut ctx = test_ctx();
        Hevc11.nalu_vps(&mut ctx);
        let bytes = nal_payload_bytes(&ctx);
        assert_eq!(&bytes[..6], &[0x00, 0x00, 0x00, 0x01, 0x40, 0x01]);
        assert_eq!(ctx.cs.dwords()[2], fw::NALU_TYPE_VPS);
        // Patched byte size covers the full flushed payload.
        assert_eq!(ctx.cs.dwords()[3] as usize, bytes.len());
    }

    #[test]
    fn sps_byte_size_matches_bit_count() {
        let mut ctx = test_ctx();
        let pic = ctx
            .session
            .derive_picture_state(&PictureDesc::new(PictureType::Idr, 0, PictureHandle(1)));
        Hevc11.nalu_sps(&mut ctx, &pic);
        assert_eq!(ctx.cs.dwords()[2], fw::NALU_TYPE_SPS);
        assert_eq!(ctx.cs.dwords()[3], ctx.bw.byte_size());
        assert_eq!(ctx.bw.bits_output() % 8, 0);
    }

    #[rstest]
    #[case(fw::ASPECT_RATIO_IDC_EXTENDED_SAR, true)]
    #[case(1, false)]
    fn sps_sar_fields_are_gated_on_the_extended_idc(#[case] idc: u32, #[case] sar_coded: bool) {
        let mut ctx = test_ctx();
        let mut desc = PictureDesc::new(PictureType::Idr, 0, PictureHandle(1));
        desc.vui = VuiInfo {
            present: true,
            aspect_ratio_info_present: true,
            aspect_ratio_idc: idc,
            sar_width: 16,
            sar_height: 9,
            ..VuiInfo::default()
        };
        let pic = ctx.session.derive_picture_state(&desc);
        Hevc11.nalu_sps(&mut ctx, &pic);

        let mut r = reader_at_vui_flag(&ctx);
        assert_eq!(r.bit(), 1); // vui_parameters_present_flag
        assert_eq!(r.bit(), 1); // aspect_ratio_info_present_flag
        assert_eq!(r.bits(8), idc);
        if sar_coded {
            assert_eq!(r.bits(16), 16); // sar_width
            assert_eq!(r.bits(16), 9); // sar_height
        }
        assert_eq!(r.bits(9), 0); // remaining presence flags all off
        assert_eq!(r.bit(), 0); // sps_extension_present_flag
        assert_eq!(r.bit(), 1); // rbsp stop bit
    }

    #[test]
    fn omitted_vui_is_a_single_cleared_flag() {
        let mut ctx = test_ctx();
        let pic = ctx
            .session
            .derive_picture_state(&PictureDesc::new(PictureType::Idr, 0, PictureHandle(1)));
        Hevc11.nalu_sps(&mut ctx, &pic);

        let mut r = reader_at_vui_flag(&ctx);
        assert_eq!(r.bit(), 0); // vui_parameters_present_flag
        assert_eq!(r.bit(), 0); // sps_extension_present_flag
        assert_eq!(r.bit(), 1); // rbsp stop bit
        // Only alignment padding remains before the patched byte size.
        while r.pos % 8 != 0 {
            assert_eq!(r.bit(), 0);
        }
        assert_eq!(r.pos / 8, r.bytes.len());
    }

    #[test]
    fn vui_timing_info_carries_the_frame_rate() {
        let mut ctx = test_ctx();
        let mut desc = PictureDesc::new(PictureType::Idr, 0, PictureHandle(1));
        desc.vui = VuiInfo {
            present: true,
            timing_info_present: true,
            num_units_in_tick: 1001,
            time_scale: 60000,
            ..VuiInfo::default()
        };
        let pic = ctx.session.derive_picture_state(&desc);
        Hevc11.nalu_sps(&mut ctx, &pic);

        let mut r = reader_at_vui_flag(&ctx);
        assert_eq!(r.bit(), 1); // vui_parameters_present_flag
        assert_eq!(r.bits(8), 0); // aspect ratio through default display, all off
        assert_eq!(r.bit(), 1); // vui_timing_info_present_flag
        assert_eq!(r.bits(32), 1001); // vui_num_units_in_tick
        assert_eq!(r.bits(32), 60000); // vui_time_scale
        assert_eq!(r.bits(2), 0); // poc proportional, hrd parameters
        assert_eq!(r.bit(), 0); // bitstream_restriction_flag
        assert_eq!(r.bit(), 0); // sps_extension_present_flag
        assert_eq!(r.bit(), 1); // rbsp stop bit
    }

    #[test]
    fn skip_frames_encode_with_the_skip_tag_and_no_reference() {
        let mut ctx = test_ctx();
        ctx.allocate_session_buffers().unwrap();
        let pic = ctx
            .session
            .derive_picture_state(&PictureDesc::new(PictureType::Skip, 3, PictureHandle(1)));
        Hevc11.encode(&mut ctx, &pic, &test_io()).unwrap();

        // [pic type, max size, luma hi/lo, chroma hi/lo, pitches, mode,
        // reference index, reconstructed index]
        let body = packet_body(ctx.cs.dwords(), fw::IB_PARAM_ENCODE_PARAMS);
        assert_eq!(body[0], fw::PICTURE_TYPE_SKIP);
        assert_eq!(body[9], fw::REFERENCE_INDEX_NONE);
        assert_eq!(body[10], 1); // frame 3 reconstructs into the odd slot
    }

    #[rstest]
    #[case(QualityPreset::Balance, fw::IB_OP_SET_BALANCE_ENCODING_MODE)]
    #[case(QualityPreset::Quality, fw::IB_OP_SET_QUALITY_ENCODING_MODE)]
    fn the_configured_preset_op_replaces_the_speed_op(
        #[case] preset: QualityPreset,
        #[case] op_tag: u32,
    ) {
        let mut cfg = SessionConfig::new(Codec::Hevc, 1920, 1080, GpuGeneration::Gfx9);
        cfg.quality_preset = preset;
        let mut ctx = ctx_for(cfg);
        ctx.allocate_session_buffers().unwrap();
        let pic = ctx
            .session
            .derive_picture_state(&PictureDesc::new(PictureType::Idr, 0, PictureHandle(1)));
        Hevc11.encode(&mut ctx, &pic, &test_io()).unwrap();

        let tags = collect_packet_tags(ctx.cs.dwords());
        assert!(tags.contains(&op_tag));
        assert!(!tags.contains(&fw::IB_OP_SET_SPEED_ENCODING_MODE));
    }

    #[test]
    fn slice_header_packet_has_fixed_footprint() {
        let mut ctx = test_ctx();
        let pic = ctx
            .session
            .derive_picture_state(&PictureDesc::new(PictureType::Idr, 0, PictureHandle(1)));
        Hevc11.slice_header(&mut ctx, &pic);

        let dwords = ctx.cs.dwords();
        assert_eq!(dwords[0], fw::IB_PARAM_SLICE_HEADER);
        let expected_len = (2 + fw::SLICE_HEADER_TEMPLATE_MAX_DWORDS
            + 2 * fw::SLICE_HEADER_MAX_INSTRUCTIONS) as u32
            * 4;
        assert_eq!(dwords[1], expected_len);

        // Instruction pairs start after the template region; the first
        // instruction copies the start code and NAL header.
        let inst_base = 2 + fw::SLICE_HEADER_TEMPLATE_MAX_DWORDS;
        assert_eq!(dwords[inst_base], fw::HEADER_INSTRUCTION_COPY);
        assert_eq!(dwords[inst_base + 1], 48);
        assert_eq!(dwords[inst_base + 2], fw::HEADER_INSTRUCTION_FIRST_SLICE);
        // The instruction list terminates with END.
        let tail: Vec<u32> = (0..fw::SLICE_HEADER_MAX_INSTRUCTIONS)
            .map(|i| dwords[inst_base + 2 * i])
            .collect();
        assert!(tail.contains(&fw::HEADER_INSTRUCTION_END));
    }

    #[test]
    fn begin_sequence_orders_packets() {
        let mut ctx = test_ctx();
        ctx.allocate_session_buffers().unwrap();
        let pic = ctx
            .session
            .derive_picture_state(&PictureDesc::new(PictureType::Idr, 0, PictureHandle(1)));
        Hevc11.begin(&mut ctx, &pic).unwrap();

        let tags = collect_packet_tags(ctx.cs.dwords());
        assert_eq!(
            tags,
            vec![
                fw::IB_PARAM_SESSION_INFO,
                fw::IB_PARAM_TASK_INFO,
                fw::IB_OP_INITIALIZE,
                fw::IB_PARAM_SESSION_INIT,
                fw::IB_PARAM_SLICE_CONTROL,
                fw::IB_PARAM_SPEC_MISC,
                fw::IB_PARAM_DEBLOCKING_FILTER,
                fw::IB_PARAM_LAYER_CONTROL,
                fw::IB_PARAM_RATE_CONTROL_SESSION_INIT,
                fw::IB_PARAM_QUALITY_PARAMS,
                fw::IB_PARAM_LAYER_SELECT,
                fw::IB_PARAM_RATE_CONTROL_LAYER_INIT,
                fw::IB_PARAM_LAYER_SELECT,
                fw::IB_PARAM_RATE_CONTROL_PER_PICTURE,
                fw::IB_OP_INIT_RC,
                fw::IB_OP_INIT_RC_VBV_BUFFER_LEVEL,
            ]
        );
    }

    #[test]
    fn begin_without_buffers_fails() {
        let mut ctx = test_ctx();
        let pic = ctx
            .session
            .derive_picture_state(&PictureDesc::new(PictureType::Idr, 0, PictureHandle(1)));
        assert!(matches!(
            Hevc11.begin(&mut ctx, &pic),
            Err(EncodeError::SessionNotStarted)
        ));
    }

    /// Walks the packet framing: every packet self-reports its length, so
    /// the stream can be chunked without knowing the packet bodies.
    pub(super) fn collect_packet_tags(dwords: &[u32]) -> Vec<u32> {
        let mut tags = Vec::new();
        let mut cursor = 0;
        while cursor < dwords.len() {
            tags.push(dwords[cursor]);
            let len = dwords[cursor + 1] as usize;
            assert!(len >= 8 && len % 4 == 0, "bad packet length {len}");
            cursor += len / 4;
        }
        tags
    }

    #[test]
    fn encode_sequence_orders_packets_and_patches_task_size() {
        let mut ctx = test_ctx();
        ctx.allocate_session_buffers().unwrap();
        let pic = ctx
            .session
            .derive_picture_state(&PictureDesc::new(PictureType::Idr, 0, PictureHandle(1)));
        Hevc11.encode(&mut ctx, &pic, &test_io()).unwrap();

        let tags = collect_packet_tags(ctx.cs.dwords());
        assert_eq!(
            tags,
            vec![
                fw::IB_PARAM_SESSION_INFO,
                fw::IB_PARAM_TASK_INFO,
                fw::IB_PARAM_INSERT_NAL_UNIT, // AUD
                fw::IB_PARAM_INSERT_NAL_UNIT, // VPS
                fw::IB_PARAM_INSERT_NAL_UNIT, // PPS
                fw::IB_PARAM_INSERT_NAL_UNIT, // SPS
                fw::IB_PARAM_SLICE_HEADER,
                fw::IB_PARAM_ENCODE_PARAMS,
                fw::IB_PARAM_ENCODE_CONTEXT_BUFFER,
                fw::IB_PARAM_VIDEO_BITSTREAM_BUFFER,
                fw::IB_PARAM_FEEDBACK_BUFFER,
                fw::IB_PARAM_INTRA_REFRESH,
                fw::IB_OP_SET_SPEED_ENCODING_MODE,
                fw::IB_OP_ENCODE,
            ]
        );

        // Task size covers everything from task-info onward.
        let dwords = ctx.cs.dwords();
        let session_info_len = dwords[1] as usize;
        let task_size = dwords[session_info_len / 4 + 2];
        let total: u32 = (dwords.len() * 4) as u32 - session_info_len as u32;
        assert_eq!(task_size, total);
    }

    #[test]
    fn non_intra_frames_skip_parameter_sets() {
        let mut ctx = test_ctx();
        ctx.allocate_session_buffers().unwrap();
        let pic = ctx
            .session
            .derive_picture_state(&PictureDesc::new(PictureType::P, 1, PictureHandle(1)));
        Hevc11.encode(&mut ctx, &pic, &test_io()).unwrap();

        let nal_count = collect_packet_tags(ctx.cs.dwords())
            .iter()
            .filter(|&&t| t == fw::IB_PARAM_INSERT_NAL_UNIT)
            .count();
        assert_eq!(nal_count, 1); // AUD only
    }

    #[test]
    fn destroy_sequence_closes_the_session() {
        let mut ctx = test_ctx();
        ctx.allocate_session_buffers().unwrap();
        Hevc11.destroy(&mut ctx, GpuBuffer(9)).unwrap();
        let tags = collect_packet_tags(ctx.cs.dwords());
        assert_eq!(
            tags,
            vec![
                fw::IB_PARAM_SESSION_INFO,
                fw::IB_PARAM_TASK_INFO,
                fw::IB_PARAM_FEEDBACK_BUFFER,
                fw::IB_OP_CLOSE_SESSION,
            ]
        );
    }

    #[test]
    fn ctx_buffer_lists_one_offset_pair_per_cpb_slot() {
        let mut ctx = test_ctx();
        ctx.allocate_session_buffers().unwrap();
        Hevc11.ctx_buffer(&mut ctx).unwrap();

        let dwords = ctx.cs.dwords();
        let slots = ctx.session.geometry.cpb_slots as usize;
        // tag, len, addr hi/lo, mode, pitches, count, then the pairs.
        assert_eq!(dwords[7], slots as u32);
        assert_eq!(dwords.len(), 8 + 2 * slots);
        let slot_size =
            (ctx.session.geometry.rec_luma_size + ctx.session.geometry.rec_chroma_size) as u32;
        assert_eq!(dwords[8], 0);
        assert_eq!(dwords[9], ctx.session.geometry.rec_luma_size as u32);
        assert_eq!(dwords[10], slot_size);
    }
}
