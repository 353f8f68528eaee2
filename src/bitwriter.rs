//! MSB-first bit packer with Exp-Golomb coding and start-code emulation
//! prevention, emitting into the command stream's dword buffer.
//!
//! All packer state lives in this struct and is only re-entered through
//! [`BitWriter::reset`]; every NAL region resets it before writing.

use crate::cmdstream::CmdStream;

#[derive(Debug, Default)]
pub struct BitWriter {
    shifter: u32,
    bits_in_shifter: u32,
    bits_output: u32,
    num_zeros: u32,
    byte_index: usize,
    emulation_prevention: bool,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns to a clean state with emulation prevention disabled. Must be
    /// called before starting any independent byte-stream region.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Switching modes also clears the zero-run counter so a run never
    /// carries across the toggle.
    pub fn set_emulation_prevention(&mut self, enabled: bool) {
        if enabled != self.emulation_prevention {
            self.emulation_prevention = enabled;
            self.num_zeros = 0;
        }
    }

    /// Exact number of bits encoded since the last reset, including any
    /// inserted emulation-prevention bytes.
    pub fn bits_output(&self) -> u32 {
        self.bits_output
    }

    /// Byte size of the emitted stream, `ceil(bits_output / 8)`.
    pub fn byte_size(&self) -> u32 {
        self.bits_output.div_ceil(8)
    }

    /// Bits written since reset including those still in the shifter.
    /// Used for segment accounting before the region is flushed.
    pub fn total_bits(&self) -> u32 {
        self.bits_output + self.bits_in_shifter
    }

    /// Packs the low `width` bits of `value`, most significant bit first.
    /// `width` must be in `[0, 32]`; wider requests are a caller bug.
    pub fn write_bits(&mut self, cs: &mut CmdStream, value: u32, width: u32) {
        debug_assert!(width <= 32, "bit width out of range: {width}");
        let mut num_bits = width;
        while num_bits > 0 {
            let mask = if num_bits == 32 {
                u32::MAX
            } else {
                (1u32 << num_bits) - 1
            };
            let bits_to_pack = num_bits.min(32 - self.bits_in_shifter);
            let mut chunk = value & mask;
            if bits_to_pack < num_bits {
                chunk >>= num_bits - bits_to_pack;
            }
            self.shifter |= chunk << (32 - self.bits_in_shifter - bits_to_pack);
            num_bits -= bits_to_pack;
            self.bits_in_shifter += bits_to_pack;

            while self.bits_in_shifter >= 8 {
                let byte = (self.shifter >> 24) as u8;
                self.shifter <<= 8;
                self.emit_byte(cs, byte);
                self.bits_in_shifter -= 8;
                self.bits_output += 8;
            }
        }
    }

    /// Order-0 unsigned Exp-Golomb: one combined code word of width
    /// `2 * floor(log2(value + 1)) + 1` holding `value + 1`. Codes wider
    /// than 32 bits split at the implicit-zero prefix, which leaves the
    /// emitted bit pattern identical.
    pub fn write_ue(&mut self, cs: &mut CmdStream, value: u32) {
        debug_assert!(value != u32::MAX, "ue(v) operand overflow");
        let code = value + 1;
        let x = 31 - code.leading_zeros();
        let width = 2 * x + 1;
        if width <= 32 {
            self.write_bits(cs, code, width);
        } else {
            self.write_bits(cs, 0, width - 32);
            self.write_bits(cs, code, 32);
        }
    }

    /// Signed Exp-Golomb mapped onto `write_ue`.
    pub fn write_se(&mut self, cs: &mut CmdStream, value: i32) {
        let v = match value {
            0 => 0,
            v if v < 0 => 2 * v.unsigned_abs(),
            v => 2 * v as u32 - 1,
        };
        self.write_ue(cs, v);
    }

    /// Zero-pads up to the next byte boundary.
    pub fn byte_align(&mut self, cs: &mut CmdStream) {
        let padding = (32 - self.bits_in_shifter) % 8;
        if padding > 0 {
            self.write_bits(cs, 0, padding);
        }
    }

    /// Forces out any partial byte left in the shifter and re-arms the
    /// byte cursor on a fresh dword. After this call `bits_output` is
    /// final for the region.
    pub fn flush(&mut self, cs: &mut CmdStream) {
        if self.bits_in_shifter != 0 {
            let byte = (self.shifter >> 24) as u8;
            self.emit_byte(cs, byte);
            self.bits_output += self.bits_in_shifter;
            self.shifter = 0;
            self.bits_in_shifter = 0;
            self.num_zeros = 0;
        }
        self.byte_index = 0;
    }

    fn emit_byte(&mut self, cs: &mut CmdStream, byte: u8) {
        if self.emulation_prevention {
            if self.num_zeros >= 2 && byte <= 0x03 {
                self.output_byte(cs, 0x03);
                self.bits_output += 8;
                self.num_zeros = 0;
            }
            self.num_zeros = if byte == 0 { self.num_zeros + 1 } else { 0 };
        }
        self.output_byte(cs, byte);
    }

    fn output_byte(&mut self, cs: &mut CmdStream, byte: u8) {
        cs.push_packed_byte(self.byte_index, byte);
        self.byte_index += 1;
    }
}
